use super::*;
use std::sync::Arc;

fn three_page_fetcher() -> MockFetcher {
    MockFetcher::new()
        .with(&src("a1"), marked_pdf("A1"))
        .with(&src("a2"), marked_pdf("A2"))
        .with(&src("a3"), marked_pdf("A3"))
        .with(&src("b1"), marked_pdf("B1"))
}

#[tokio::test]
async fn test_all_groups_succeed_job_completed() {
    let (engine, _temp_dir) =
        create_test_engine_with(Arc::new(three_page_fetcher()), |_| {}).await;
    let mut events = engine.subscribe();

    let request = job_request(
        DEAD_WEBHOOK,
        vec![
            ("alpha", vec![src("a1"), src("a2"), src("a3")]),
            ("beta", vec![src("b1")]),
        ],
    );
    let (job_id, status) = submit_and_process(&engine, request).await;
    assert_eq!(status, JobStatus::Completed);

    let job = engine.db.get_job(&job_id).await.unwrap().unwrap();
    assert_eq!(job.completed, 2);
    assert_eq!(job.failed, 0);
    let completed_at = job.completed_at.unwrap();
    assert_eq!(
        job.expires_at.unwrap(),
        completed_at + engine.config.storage.retention.as_secs() as i64
    );

    let groups = engine.db.list_groups(&job_id).await.unwrap();
    assert!(groups.iter().all(|g| g.status() == GroupStatus::Completed));

    let alpha = std::fs::read(groups[0].file_path.as_ref().unwrap()).unwrap();
    assert_eq!(page_markers(&alpha), vec!["A1", "A2", "A3"]);
    assert_eq!(groups[0].file_size, Some(alpha.len() as i64));
    assert!(groups[0].file_path.as_ref().unwrap().ends_with("alpha.pdf"));

    let finished = wait_for_event(&mut events, Duration::from_secs(5), |e| {
        matches!(e, Event::JobFinished { .. })
    })
    .await;
    assert!(matches!(
        finished,
        Event::JobFinished {
            status: JobStatus::Completed,
            ..
        }
    ));
}

#[tokio::test]
async fn test_mixed_outcomes_job_partial() {
    let (engine, _temp_dir) =
        create_test_engine_with(Arc::new(three_page_fetcher()), |_| {}).await;

    let request = job_request(
        DEAD_WEBHOOK,
        vec![
            ("good", vec![src("a1")]),
            ("bad", vec![src("missing-1"), src("missing-2")]),
        ],
    );
    let (job_id, status) = submit_and_process(&engine, request).await;
    assert_eq!(status, JobStatus::Partial);

    let bad = engine.db.get_group(&job_id, "bad").await.unwrap().unwrap();
    assert_eq!(bad.status(), GroupStatus::Failed);
    let error = bad.error_message.unwrap();
    assert!(error.contains("all 2 sources failed"), "got: {}", error);
    assert!(bad.file_path.is_none());
}

#[tokio::test]
async fn test_all_groups_fail_job_failed() {
    let fetcher = MockFetcher::new()
        .with_error(&src("t"), FetchError::Timeout { timeout_ms: 10_000 })
        .with(&src("text"), b"plain text body".to_vec());
    let (engine, _temp_dir) = create_test_engine_with(Arc::new(fetcher), |_| {}).await;

    let request = job_request(
        DEAD_WEBHOOK,
        vec![("one", vec![src("t")]), ("two", vec![src("text")])],
    );
    let (job_id, status) = submit_and_process(&engine, request).await;
    assert_eq!(status, JobStatus::Failed);

    let job = engine.db.get_job(&job_id).await.unwrap().unwrap();
    assert_eq!(job.completed, 0);
    assert_eq!(job.failed, 2);

    // An unmergeable only source fails its group
    let two = engine.db.get_group(&job_id, "two").await.unwrap().unwrap();
    assert_eq!(two.status(), GroupStatus::Failed);
    assert!(two.error_message.unwrap().contains("unsupported"));

    // Nothing was written for a failed job
    let dir = crate::utils::job_dir(&engine.config.storage.storage_dir, &job_id);
    let written = std::fs::read_dir(&dir).map(|d| d.count()).unwrap_or(0);
    assert_eq!(written, 0);
}

#[tokio::test]
async fn test_one_bad_source_is_tolerated() {
    let (engine, _temp_dir) =
        create_test_engine_with(Arc::new(three_page_fetcher()), |_| {}).await;
    let mut events = engine.subscribe();

    let request = job_request(
        DEAD_WEBHOOK,
        vec![("mixed", vec!["https://unknown.test/nope.pdf".to_string(), src("b1")])],
    );
    let (job_id, status) = submit_and_process(&engine, request).await;
    assert_eq!(status, JobStatus::Completed);

    let group = engine.db.get_group(&job_id, "mixed").await.unwrap().unwrap();
    let bytes = std::fs::read(group.file_path.unwrap()).unwrap();
    assert_eq!(page_markers(&bytes), vec!["B1"]);

    let event = wait_for_event(&mut events, Duration::from_secs(5), |e| {
        matches!(e, Event::SourceFailed { .. })
    })
    .await;
    match event {
        Event::SourceFailed { index, url, .. } => {
            assert_eq!(index, 0);
            assert_eq!(url, "https://unknown.test/nope.pdf");
        }
        other => panic!("unexpected event {:?}", other),
    }
}

#[tokio::test]
async fn test_counters_never_exceed_total_during_processing() {
    let (engine, _temp_dir) =
        create_test_engine_with(Arc::new(three_page_fetcher()), |_| {}).await;
    let mut events = engine.subscribe();

    let request = job_request(
        DEAD_WEBHOOK,
        vec![
            ("g1", vec![src("a1")]),
            ("g2", vec![src("missing")]),
            ("g3", vec![src("a2")]),
        ],
    );
    let (job_id, status) = submit_and_process(&engine, request).await;
    assert_eq!(status, JobStatus::Partial);

    let mut observed = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let Event::JobProgress {
            id,
            completed,
            failed,
            total,
        } = event
        {
            assert_eq!(id, job_id);
            assert!(completed + failed <= total);
            observed.push((completed, failed));
        }
    }
    assert_eq!(observed, vec![(1, 0), (1, 1), (2, 1)]);
}

#[tokio::test]
async fn test_requeued_job_skips_finished_groups() {
    let fetcher = Arc::new(three_page_fetcher());
    let (engine, _temp_dir) = create_test_engine_with(fetcher.clone(), |_| {}).await;

    let submitted = engine
        .submit_job(
            OWNER,
            job_request(
                DEAD_WEBHOOK,
                vec![("first", vec![src("a1")]), ("second", vec![src("a2")])],
            ),
        )
        .await
        .unwrap();
    let job_id = submitted.job_id;

    // Simulate a crash after the first group finished
    engine.db.claim_next_queued_job().await.unwrap();
    let groups = engine.db.list_groups(&job_id).await.unwrap();
    engine.db.fail_group(groups[0].id, "earlier failure", 1).await.unwrap();
    engine.db.increment_job_counter(&job_id, false).await.unwrap();
    engine.db.mark_group_processing(groups[1].id).await.unwrap();

    engine.requeue_stale_jobs().await;
    let processed = engine.process_next_job().await.unwrap();
    assert_eq!(processed, Some(job_id.clone()));

    // Only the second group was fetched again
    assert_eq!(fetcher.calls(), 1);

    let job = engine.db.get_job(&job_id).await.unwrap().unwrap();
    assert_eq!(job.status(), JobStatus::Partial);
    assert_eq!(job.completed, 1);
    assert_eq!(job.failed, 1);
}

#[tokio::test]
async fn test_process_next_job_empty_queue() {
    let (engine, _temp_dir) = create_test_engine().await;

    assert!(engine.process_next_job().await.unwrap().is_none());
}

#[tokio::test]
async fn test_process_job_rejects_unclaimed_job() {
    let (engine, _temp_dir) = create_test_engine().await;
    let submitted = engine
        .submit_job(OWNER, job_request(DEAD_WEBHOOK, vec![("g", vec![src("a1")])]))
        .await
        .unwrap();

    let result = engine.process_job(&submitted.job_id).await;
    assert!(matches!(
        result,
        Err(Error::Job(JobError::InvalidState { .. }))
    ));

    let missing = engine.process_job(&JobId::from("missing")).await;
    assert!(matches!(missing, Err(Error::Job(JobError::NotFound { .. }))));
}

#[tokio::test]
async fn test_job_metadata_reaches_output() {
    let (engine, _temp_dir) =
        create_test_engine_with(Arc::new(three_page_fetcher()), |_| {}).await;

    let mut request = job_request(DEAD_WEBHOOK, vec![("report", vec![src("a1")])]);
    request.metadata = Some(crate::types::JobMetadata {
        author: Some("Finance".to_string()),
        subject: Some("Quarterly".to_string()),
        keywords: vec!["q1".to_string(), "2026".to_string()],
    });
    let (job_id, _) = submit_and_process(&engine, request).await;

    let group = engine.db.get_group(&job_id, "report").await.unwrap().unwrap();
    let doc = lopdf::Document::load(group.file_path.unwrap()).unwrap();
    let info_ref = doc.trailer.get(b"Info").unwrap().as_reference().unwrap();
    let info = doc.get_dictionary(info_ref).unwrap();
    assert_eq!(info.get(b"Author").unwrap().as_str().unwrap(), b"Finance");
    assert_eq!(info.get(b"Keywords").unwrap().as_str().unwrap(), b"q1, 2026");
    assert_eq!(info.get(b"Title").unwrap().as_str().unwrap(), b"report");
}
