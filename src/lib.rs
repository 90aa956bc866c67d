//! # docbatch
//!
//! Batch document-merge engine: callers submit a job made of named groups of
//! source URLs, a background worker fetches every source and merges each group
//! into one PDF, and a completion callback reports where the outputs can be
//! retrieved until they expire.
//!
//! ## Design Philosophy
//!
//! docbatch is designed to be:
//! - **Durable** - Jobs and groups live in SQLite; a restart picks queued work back up
//! - **Tolerant** - A bad source is skipped, a bad group fails alone
//! - **Library-first** - No HTTP surface, purely a Rust crate for embedding
//! - **Event-driven** - Consumers subscribe to events, no polling required
//!
//! ## Quick Start
//!
//! ```no_run
//! use docbatch::{BatchEngine, Config, GroupRequest, JobRequest};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = BatchEngine::new(Config::default()).await?;
//!     let _tasks = engine.start();
//!
//!     // Subscribe to events
//!     let mut events = engine.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let submitted = engine
//!         .submit_job(
//!             "tenant-1",
//!             JobRequest {
//!                 webhook_url: "https://example.com/hooks/batch".to_string(),
//!                 groups: vec![GroupRequest {
//!                     name: "invoices".to_string(),
//!                     sources: vec![
//!                         "https://files.example.com/a.pdf".to_string(),
//!                         "https://files.example.com/b.png".to_string(),
//!                     ],
//!                 }],
//!                 metadata: None,
//!             },
//!         )
//!         .await?;
//!     println!("queued {}", submitted.job_id);
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// Database persistence layer
pub mod db;
/// Core engine implementation (decomposed into focused submodules)
pub mod engine;
/// Error types
pub mod error;
/// Source retrieval over HTTP
pub mod fetcher;
/// PDF assembly
pub mod merge;
/// Retry logic with exponential backoff
pub mod retry;
/// Fire-and-forget usage telemetry
pub mod telemetry;
/// Core types and events
pub mod types;
/// Utility functions
pub mod utils;
/// Request validation
pub mod validation;

// Re-export commonly used types
pub use config::{
    Config, FetchConfig, NotificationConfig, ReaperConfig, RetryConfig, StorageConfig,
    WorkerConfig,
};
pub use db::Database;
pub use engine::{BackgroundTasks, BatchEngine};
pub use error::{
    ApiError, DatabaseError, Error, ErrorDetail, FetchError, JobError, MergeError, Result,
    ToHttpStatus,
};
pub use fetcher::{HttpFetcher, SourceFetcher};
pub use telemetry::{Telemetry, TelemetryEvent, TelemetrySink, TracingTelemetry};
pub use types::{
    CleanupReport, Event, GroupOutput, GroupRequest, GroupStats, GroupStatus,
    GroupStatusResponse, JobId, JobMetadata, JobRequest, JobStatus, JobStatusResponse,
    MergeOutput, MergeRequest, Progress, SkippedSource, SubmitResponse, WebhookPayload,
    WebhookResult, WebhookSummary,
};

/// Helper function to run the engine with graceful signal handling.
///
/// Starts the worker and reaper, waits for a termination signal and then
/// calls the engine's `shutdown()` method.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use docbatch::{BatchEngine, Config, run_with_shutdown};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = Config::default();
///     let engine = BatchEngine::new(config).await?;
///
///     // Run with automatic signal handling
///     run_with_shutdown(engine).await?;
///
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(engine: BatchEngine) -> Result<()> {
    let tasks = engine.start();
    wait_for_signal().await;
    engine.shutdown().await?;

    for (name, handle) in [("worker", tasks.worker), ("reaper", tasks.reaper)] {
        if let Err(e) = handle.await {
            tracing::warn!(task = name, error = %e, "background task ended abnormally");
        }
    }

    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Set up signal handlers - these may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
