use super::*;

#[tokio::test]
async fn test_group_transitions_are_guarded() {
    let (db, _file) = test_db().await;
    let job = new_job(&[("a", &["https://x.test/a.pdf"]), ("b", &["https://x.test/b.pdf"])]);
    db.insert_job(&job).await.unwrap();
    let groups = db.list_groups(&job.id).await.unwrap();

    assert!(db.mark_group_processing(groups[0].id).await.unwrap());
    assert!(!db.mark_group_processing(groups[0].id).await.unwrap());

    assert!(db.complete_group(groups[0].id, "/out/a.pdf", 2048, 50).await.unwrap());
    // Terminal groups ignore later reports
    assert!(!db.fail_group(groups[0].id, "late failure", 60).await.unwrap());
    assert!(!db.complete_group(groups[0].id, "/out/other.pdf", 1, 60).await.unwrap());

    assert!(db.fail_group(groups[1].id, "all 1 sources failed", 70).await.unwrap());
    assert!(!db.complete_group(groups[1].id, "/out/b.pdf", 1, 80).await.unwrap());

    let a = db.get_group(&job.id, "a").await.unwrap().unwrap();
    assert_eq!(a.status(), GroupStatus::Completed);
    assert_eq!(a.file_path.as_deref(), Some("/out/a.pdf"));
    assert_eq!(a.file_size, Some(2048));
    assert_eq!(a.completed_at, Some(50));

    let b = db.get_group(&job.id, "b").await.unwrap().unwrap();
    assert_eq!(b.status(), GroupStatus::Failed);
    assert_eq!(b.error_message.as_deref(), Some("all 1 sources failed"));
    assert!(b.file_path.is_none());

    db.close().await;
}

#[tokio::test]
async fn test_get_group_unknown_name() {
    let (db, _file) = test_db().await;
    let job = new_job(&[("a", &["https://x.test/a.pdf"])]);
    db.insert_job(&job).await.unwrap();

    assert!(db.get_group(&job.id, "nope").await.unwrap().is_none());

    db.close().await;
}

#[tokio::test]
async fn test_clear_group_files() {
    let (db, _file) = test_db().await;
    let job = new_job(&[("a", &["https://x.test/a.pdf"]), ("b", &["https://x.test/b.pdf"])]);
    db.insert_job(&job).await.unwrap();
    let groups = db.list_groups(&job.id).await.unwrap();
    db.complete_group(groups[0].id, "/out/a.pdf", 1, 1).await.unwrap();
    db.fail_group(groups[1].id, "boom", 1).await.unwrap();

    assert_eq!(db.clear_group_files(&job.id).await.unwrap(), 1);
    assert_eq!(db.clear_group_files(&job.id).await.unwrap(), 0);

    let a = db.get_group(&job.id, "a").await.unwrap().unwrap();
    assert!(a.file_path.is_none());
    assert_eq!(a.status(), GroupStatus::Completed);

    db.close().await;
}

#[tokio::test]
async fn test_count_groups_by_status() {
    let (db, _file) = test_db().await;
    assert_eq!(db.count_groups_by_status().await.unwrap(), GroupStats::default());

    let job = new_job(&[
        ("a", &["https://x.test/a.pdf"]),
        ("b", &["https://x.test/b.pdf"]),
        ("c", &["https://x.test/c.pdf"]),
    ]);
    db.insert_job(&job).await.unwrap();
    let groups = db.list_groups(&job.id).await.unwrap();
    db.mark_group_processing(groups[0].id).await.unwrap();
    db.fail_group(groups[1].id, "boom", 1).await.unwrap();

    let stats = db.count_groups_by_status().await.unwrap();
    assert_eq!(
        stats,
        GroupStats {
            pending: 1,
            processing: 1,
            completed: 0,
            failed: 1,
        }
    );

    db.close().await;
}
