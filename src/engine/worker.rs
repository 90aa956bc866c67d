//! Worker loop: claims the oldest queued job and hands it to the orchestrator.

use crate::error::{Error, Result};
use crate::types::{Event, JobId};

use super::BatchEngine;

impl BatchEngine {
    /// Start the worker loop task
    ///
    /// This method spawns a background task that:
    /// 1. Puts jobs stranded in `processing` back in the queue (if configured)
    /// 2. Runs a cycle immediately, then once per `worker.poll_interval`
    /// 3. Stops when shutdown begins
    ///
    /// Each cycle holds the single worker slot. A tick that fires while the
    /// previous cycle is still running (a job slower than the poll interval)
    /// is skipped, so at most one job is processed at a time.
    pub fn start_worker(&self) -> tokio::task::JoinHandle<()> {
        let engine = self.clone();

        tokio::spawn(async move {
            if engine.config.worker.requeue_stale_on_start {
                engine.requeue_stale_jobs().await;
            }

            // First tick completes immediately
            let mut interval = tokio::time::interval(engine.config.worker.poll_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            tracing::info!(
                poll_interval_secs = engine.config.worker.poll_interval.as_secs(),
                "worker started"
            );

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        engine.trigger_cycle();
                    }
                    _ = engine.shutdown_token.cancelled() => {
                        tracing::info!("worker shutting down");
                        break;
                    }
                }
            }
        })
    }

    /// Claim and process the oldest queued job, if any
    ///
    /// Waits for the worker slot, so it never overlaps a running cycle.
    /// Returns the id of the job that was processed.
    pub async fn process_next_job(&self) -> Result<Option<JobId>> {
        let _permit = self
            .worker_slot
            .acquire()
            .await
            .map_err(|_| Error::ShuttingDown)?;

        self.claim_and_process().await
    }

    /// Spawn a cycle unless one is already running
    fn trigger_cycle(&self) {
        let permit = match self.worker_slot.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                tracing::debug!("previous worker cycle still running, skipping tick");
                return;
            }
        };

        let engine = self.clone();
        tokio::spawn(async move {
            let _permit = permit;
            engine.drain_queue().await;
        });
    }

    /// Process queued jobs one after another until the queue is empty
    async fn drain_queue(&self) {
        while !self.shutdown_token.is_cancelled() {
            match self.claim_and_process().await {
                Ok(Some(_)) => continue,
                Ok(None) => break,
                Err(e) => {
                    tracing::error!(error = %e, "worker cycle failed");
                    break;
                }
            }
        }
    }

    async fn claim_and_process(&self) -> Result<Option<JobId>> {
        let Some(job_id) = self.db.claim_next_queued_job().await? else {
            return Ok(None);
        };

        tracing::debug!(job_id = %job_id, "claimed queued job");

        if let Err(e) = self.process_job(&job_id).await {
            tracing::error!(job_id = %job_id, error = %e, "job processing failed");
        }

        Ok(Some(job_id))
    }

    /// Move jobs left in `processing` by a previous process back to `queued`
    pub(crate) async fn requeue_stale_jobs(&self) {
        match self.db.requeue_stale_jobs().await {
            Ok(ids) if ids.is_empty() => {}
            Ok(ids) => {
                tracing::warn!(count = ids.len(), "requeued jobs interrupted by a previous shutdown");
                self.emit_event(Event::JobsRequeued { count: ids.len() });
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to requeue stale jobs");
            }
        }
    }
}
