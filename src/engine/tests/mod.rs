use super::test_helpers::{MockFetcher, create_test_engine, create_test_engine_with};
use super::*;
use crate::error::{FetchError, JobError, MergeError};
use crate::merge::test_fixtures::{marked_pdf, page_markers, png_bytes};
use crate::types::{GroupRequest, GroupStatus, JobId, JobRequest, JobStatus};
use std::time::Duration;

mod orchestrator;

const OWNER: &str = "owner-a";

fn job_request(webhook_url: &str, groups: Vec<(&str, Vec<String>)>) -> JobRequest {
    JobRequest {
        webhook_url: webhook_url.to_string(),
        groups: groups
            .into_iter()
            .map(|(name, sources)| GroupRequest {
                name: name.to_string(),
                sources,
            })
            .collect(),
        metadata: None,
    }
}

/// Source URL on the mock fetcher's fake host
fn src(name: &str) -> String {
    format!("https://src.test/{}", name)
}

/// Webhook URL nothing listens on; delivery fails fast
const DEAD_WEBHOOK: &str = "http://127.0.0.1:9/hook";

/// Wait until an event matching `pred` arrives, or panic after `timeout`
async fn wait_for_event(
    rx: &mut tokio::sync::broadcast::Receiver<Event>,
    timeout: Duration,
    pred: impl Fn(&Event) -> bool,
) -> Event {
    tokio::time::timeout(timeout, async {
        loop {
            match rx.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(e) => panic!("event channel closed: {}", e),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

/// Submit and process a job synchronously; returns its id and final status
async fn submit_and_process(engine: &BatchEngine, request: JobRequest) -> (JobId, JobStatus) {
    let submitted = engine.submit_job(OWNER, request).await.unwrap();
    let processed = engine.process_next_job().await.unwrap();
    assert_eq!(processed.as_ref(), Some(&submitted.job_id));

    let row = engine.db.get_job(&submitted.job_id).await.unwrap().unwrap();
    (submitted.job_id, row.status())
}
