//! Startup and shutdown coordination.

use crate::error::Result;
use crate::types::Event;
use std::time::Duration;

use super::BatchEngine;

/// How long shutdown waits for an in-flight job cycle
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Handles of the background loops started by [`BatchEngine::start`]
#[derive(Debug)]
pub struct BackgroundTasks {
    /// Worker loop
    pub worker: tokio::task::JoinHandle<()>,
    /// Reaper loop
    pub reaper: tokio::task::JoinHandle<()>,
}

impl BatchEngine {
    /// Start the worker loop and the reaper
    ///
    /// Both run until [`BatchEngine::shutdown`] is called.
    pub fn start(&self) -> BackgroundTasks {
        let worker = self.start_worker();
        let reaper = self.start_reaper();

        tracing::info!(
            storage_dir = %self.config.storage.storage_dir.display(),
            "batch engine started"
        );

        BackgroundTasks { worker, reaper }
    }

    /// Whether shutdown has begun
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown_token.is_cancelled()
    }

    /// Gracefully shut down the engine
    ///
    /// This method performs a graceful shutdown sequence:
    /// 1. Stops accepting submissions and stops the worker and reaper loops
    /// 2. Waits for the in-flight job cycle to finish with a timeout (30 seconds)
    /// 3. Emits the shutdown event
    /// 4. Closes database connections
    ///
    /// A job interrupted by the timeout stays `processing` and is requeued on
    /// the next start when `worker.requeue_stale_on_start` is set.
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("Initiating graceful shutdown");

        // 1. Stop accepting work and signal the background loops
        self.shutdown_token.cancel();

        // 2. Wait for the running cycle to release the worker slot
        match tokio::time::timeout(SHUTDOWN_TIMEOUT, self.worker_slot.acquire()).await {
            Ok(Ok(_permit)) => {
                tracing::info!("Worker idle, no job in flight");
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Worker slot closed while waiting for shutdown");
            }
            Err(_) => {
                tracing::warn!(
                    "Timeout waiting for in-flight job to complete, proceeding with shutdown"
                );
            }
        }

        // 3. Emit shutdown event
        self.emit_event(Event::Shutdown);

        // 4. Close database connections
        self.db.close().await;

        tracing::info!("Graceful shutdown complete");
        Ok(())
    }
}
