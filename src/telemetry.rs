//! Fire-and-forget usage telemetry
//!
//! The fetch and group paths report what they did through a [`Telemetry`]
//! handle. Events travel over an unbounded channel to a detached task that
//! hands them to a [`TelemetrySink`], so recording never blocks the caller and
//! a slow or failing sink never affects a job.

use crate::types::JobId;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// What gets reported
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TelemetryEvent {
    /// One source retrieval finished (after retries)
    SourceFetched {
        /// Source URL
        url: String,
        /// HTTP status when the remote answered
        status_code: Option<u16>,
        /// Wall time including retries
        elapsed: Duration,
        /// Failure reason, if any
        error: Option<String>,
    },

    /// One group finished
    GroupProcessed {
        /// Owning job
        job_id: JobId,
        /// Group name
        group: String,
        /// Whether an output was produced
        success: bool,
        /// Wall time for fetch and merge
        elapsed: Duration,
    },
}

/// Destination for telemetry events
#[async_trait]
pub trait TelemetrySink: Send + Sync + 'static {
    /// Persist or forward one event. Failures must be handled inside the sink.
    async fn record(&self, event: TelemetryEvent);
}

/// Sink that writes events to the `tracing` log at debug level
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingTelemetry;

#[async_trait]
impl TelemetrySink for TracingTelemetry {
    async fn record(&self, event: TelemetryEvent) {
        match event {
            TelemetryEvent::SourceFetched {
                url,
                status_code,
                elapsed,
                error,
            } => {
                tracing::debug!(
                    url = %url,
                    status_code = ?status_code,
                    elapsed_ms = elapsed.as_millis() as u64,
                    error = ?error,
                    "source fetched"
                );
            }
            TelemetryEvent::GroupProcessed {
                job_id,
                group,
                success,
                elapsed,
            } => {
                tracing::debug!(
                    job_id = %job_id,
                    group = %group,
                    success,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "group processed"
                );
            }
        }
    }
}

/// Cheap, cloneable handle for recording telemetry
#[derive(Clone, Debug)]
pub struct Telemetry {
    tx: Option<mpsc::UnboundedSender<TelemetryEvent>>,
}

impl Telemetry {
    /// Start a forwarding task for `sink`
    ///
    /// Must be called from within a Tokio runtime. The task ends once every
    /// handle has been dropped.
    pub fn spawn(sink: Arc<dyn TelemetrySink>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<TelemetryEvent>();

        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                sink.record(event).await;
            }
            tracing::debug!("telemetry channel closed");
        });

        Self { tx: Some(tx) }
    }

    /// Handle that drops every event
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Queue an event for the sink
    pub fn record(&self, event: TelemetryEvent) {
        if let Some(tx) = &self.tx {
            // Receiver gone means the runtime is shutting down
            tx.send(event).ok();
        }
    }
}
