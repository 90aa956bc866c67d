//! Batch engine split into focused submodules.
//!
//! The `BatchEngine` struct and its methods are organized by domain:
//! - [`submit`] - Submission, status queries, output resolution, deletion, sync merge
//! - [`orchestrator`] - Job state machine and status aggregation
//! - [`group`] - Bounded-concurrency ordered fetch and merge of one group
//! - [`worker`] - Single-slot polling loop that claims queued jobs
//! - [`reaper`] - Expiry sweep and orphan sweep
//! - [`webhooks`] - Completion callback delivery
//! - [`lifecycle`] - Startup and shutdown coordination

mod group;
mod lifecycle;
mod orchestrator;
mod reaper;
mod submit;
mod webhooks;
mod worker;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

pub use lifecycle::BackgroundTasks;

use crate::config::Config;
use crate::db::Database;
use crate::error::{Error, Result};
use crate::fetcher::{HttpFetcher, SourceFetcher};
use crate::telemetry::{Telemetry, TracingTelemetry};
use crate::types::Event;
use std::sync::Arc;

/// Capacity of the event broadcast channel
const EVENT_CHANNEL_CAPACITY: usize = 1000;

/// Batch engine instance (cloneable - all fields are Arc-wrapped or cheap handles)
#[derive(Clone)]
pub struct BatchEngine {
    /// Durable store, created once and shared with every component
    /// Public for integration tests to inspect job and group rows
    pub db: Arc<Database>,
    /// Event broadcast channel sender (multiple subscribers supported)
    pub(crate) event_tx: tokio::sync::broadcast::Sender<Event>,
    /// Configuration (wrapped in Arc for sharing across tasks)
    pub(crate) config: Arc<Config>,
    /// Source retrieval
    pub(crate) fetcher: Arc<dyn SourceFetcher>,
    /// Fire-and-forget usage telemetry
    pub(crate) telemetry: Telemetry,
    /// Single permit held while a worker cycle runs; the re-entrancy guard
    pub(crate) worker_slot: Arc<tokio::sync::Semaphore>,
    /// Cancelled once shutdown begins; stops the worker and reaper loops
    pub(crate) shutdown_token: tokio_util::sync::CancellationToken,
}

impl std::fmt::Debug for BatchEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchEngine")
            .field("storage_dir", &self.config.storage.storage_dir)
            .field("shutting_down", &self.shutdown_token.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl BatchEngine {
    /// Create a new BatchEngine instance
    ///
    /// This initializes all core components:
    /// - Validates the configuration
    /// - Creates the storage directory
    /// - Opens/creates the SQLite database and runs migrations
    /// - Starts the telemetry forwarder (logs at debug level)
    /// - Builds the HTTP fetcher
    ///
    /// Background loops are not started; call [`BatchEngine::start`].
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let db = Database::new(&config.storage.database_path).await?;
        let telemetry = Telemetry::spawn(Arc::new(TracingTelemetry));
        let fetcher = HttpFetcher::new(config.fetch.clone(), telemetry.clone())?;

        Self::with_components(config, db, Arc::new(fetcher), telemetry).await
    }

    /// Create an engine from pre-built components
    ///
    /// Lets embedders inject their own store handle, transport or telemetry
    /// sink. The storage directory is created if missing.
    pub async fn with_components(
        config: Config,
        db: Database,
        fetcher: Arc<dyn SourceFetcher>,
        telemetry: Telemetry,
    ) -> Result<Self> {
        tokio::fs::create_dir_all(&config.storage.storage_dir)
            .await
            .map_err(|e| {
                Error::Io(std::io::Error::new(
                    e.kind(),
                    format!(
                        "Failed to create storage directory '{}': {}",
                        config.storage.storage_dir.display(),
                        e
                    ),
                ))
            })?;

        // Create broadcast channel with buffer size of 1000 events
        let (event_tx, _rx) = tokio::sync::broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Ok(Self {
            db: Arc::new(db),
            event_tx,
            config: Arc::new(config),
            fetcher,
            telemetry,
            worker_slot: Arc::new(tokio::sync::Semaphore::new(1)),
            shutdown_token: tokio_util::sync::CancellationToken::new(),
        })
    }

    /// Subscribe to batch events
    ///
    /// Multiple subscribers are supported. Each subscriber receives all events independently.
    /// Events are buffered, but if a subscriber falls behind by more than 1000 events,
    /// it will receive a `RecvError::Lagged` error.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use docbatch::{BatchEngine, Config};
    ///
    /// #[tokio::main]
    /// async fn main() -> Result<(), Box<dyn std::error::Error>> {
    ///     let engine = BatchEngine::new(Config::default()).await?;
    ///
    ///     let mut events = engine.subscribe();
    ///     tokio::spawn(async move {
    ///         while let Ok(event) = events.recv().await {
    ///             tracing::info!(?event, "batch event");
    ///         }
    ///     });
    ///
    ///     Ok(())
    /// }
    /// ```
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Get the current configuration
    pub fn get_config(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }

    /// Emit an event to all subscribers
    ///
    /// If there are no active subscribers, the event is silently dropped.
    pub(crate) fn emit_event(&self, event: Event) {
        // send() returns Err if there are no receivers, which is fine - we just drop the event
        self.event_tx.send(event).ok();
    }
}
