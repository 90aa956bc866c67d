use super::*;

#[tokio::test]
async fn test_database_creation() {
    let (db, _file) = test_db().await;

    let mut conn = db.pool.acquire().await.unwrap();
    let tables: Vec<String> =
        sqlx::query_scalar("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .fetch_all(&mut *conn)
            .await
            .unwrap();

    assert!(tables.contains(&"jobs".to_string()));
    assert!(tables.contains(&"job_groups".to_string()));
    assert!(tables.contains(&"schema_version".to_string()));

    let version: i64 = sqlx::query_scalar("SELECT MAX(version) FROM schema_version")
        .fetch_one(&mut *conn)
        .await
        .unwrap();
    assert_eq!(version, 1);

    drop(conn);
    db.close().await;
}

#[tokio::test]
async fn test_reopen_does_not_rerun_migrations() {
    let temp_file = NamedTempFile::new().unwrap();

    let db = Database::new(temp_file.path()).await.unwrap();
    let job = new_job(&[("a", &["https://x.test/1.pdf"])]);
    db.insert_job(&job).await.unwrap();
    db.close().await;

    let db = Database::new(temp_file.path()).await.unwrap();
    assert!(db.job_exists(&job.id).await.unwrap());

    let applied: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM schema_version")
        .fetch_one(db.pool())
        .await
        .unwrap();
    assert_eq!(applied, 1);

    db.close().await;
}

#[tokio::test]
async fn test_creates_missing_parent_directory() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("state").join("batch.db");

    let db = Database::new(&path).await.unwrap();
    assert!(path.exists());
    db.close().await;
}

#[tokio::test]
async fn test_query_after_close_returns_error() {
    let (db, _file) = test_db().await;
    let job = new_job(&[("a", &["https://x.test/1.pdf"])]);
    db.insert_job(&job).await.unwrap();

    db.pool().close().await;

    let result = db.get_job(&job.id).await;
    assert!(
        matches!(result, Err(Error::Database(DatabaseError::QueryFailed(_)))),
        "expected QueryFailed after close, got: {:?}",
        result
    );
}
