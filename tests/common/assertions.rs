//! Custom test assertions for E2E tests

use docbatch::{BatchEngine, Event, JobId, JobStatus};
use std::time::Duration;
use tokio::sync::broadcast::Receiver;
use tokio::sync::broadcast::error::RecvError;

/// Wait for a job to reach a terminal status
///
/// Returns `None` on timeout or when the event channel closes.
pub async fn wait_for_finished(
    events: &mut Receiver<Event>,
    id: &JobId,
    timeout: Duration,
) -> Option<JobStatus> {
    let event = wait_for_event(events, timeout, |event| {
        matches!(event, Event::JobFinished { id: finished, .. } if finished == id)
    })
    .await?;

    match event {
        Event::JobFinished { status, .. } => Some(status),
        _ => None,
    }
}

/// Wait until an event matching `pred` arrives
pub async fn wait_for_event(
    events: &mut Receiver<Event>,
    timeout: Duration,
    pred: impl Fn(&Event) -> bool,
) -> Option<Event> {
    tokio::time::timeout(timeout, async {
        loop {
            match events.recv().await {
                Ok(event) if pred(&event) => return Some(event),
                Ok(_) | Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => return None,
            }
        }
    })
    .await
    .ok()
    .flatten()
}

/// Assert that a stored job has the expected status
pub async fn assert_job_status(engine: &BatchEngine, id: &JobId, expected: JobStatus) {
    let job = engine
        .db
        .get_job(id)
        .await
        .expect("Failed to query job")
        .expect("Job should exist");
    assert_eq!(job.status(), expected, "unexpected status for job {}", id);
}
