//! Job orchestration: the queued → processing → terminal state machine.

use crate::error::{Error, JobError, Result};
use crate::types::{Event, GroupStatus, JobId, JobStatus, WebhookResult};
use crate::utils;

use super::BatchEngine;
use super::group::GroupOutcome;
use super::webhooks::NotifyParams;

impl BatchEngine {
    /// Process a job that has already been claimed (`processing`)
    ///
    /// Groups run one at a time in submission order. A group's failure only
    /// shifts the final status toward `partial`/`failed`; it never aborts the
    /// job. Groups that are already terminal (left over from an interrupted
    /// run) are counted as they are and not reprocessed.
    ///
    /// Counter updates are best-effort. The final status is computed from the
    /// outcomes collected here, so a failed counter write cannot change it.
    /// The completion callback is triggered exactly once.
    pub(crate) async fn process_job(&self, job_id: &JobId) -> Result<JobStatus> {
        let job = self
            .db
            .get_job(job_id)
            .await?
            .ok_or_else(|| JobError::NotFound {
                id: job_id.to_string(),
            })?;

        let status = job.status();
        if status != JobStatus::Processing {
            return Err(Error::Job(JobError::InvalidState {
                id: job_id.to_string(),
                operation: "process".to_string(),
                current_state: status.to_string(),
            }));
        }

        let groups = self.db.list_groups(job_id).await?;
        let metadata = job.metadata();

        tracing::info!(job_id = %job_id, groups = groups.len(), "job started");
        self.emit_event(Event::JobStarted { id: job_id.clone() });

        let mut outcomes: Vec<GroupOutcome> = Vec::with_capacity(groups.len());

        for group in &groups {
            match group.status() {
                GroupStatus::Completed | GroupStatus::Failed => {
                    tracing::debug!(job_id = %job_id, group = %group.name, "group already finished, skipping");
                    outcomes.push(GroupOutcome {
                        name: group.name.clone(),
                        success: group.status() == GroupStatus::Completed,
                        error: group.error_message.clone(),
                        skipped: Vec::new(),
                    });
                    continue;
                }
                GroupStatus::Pending | GroupStatus::Processing => {}
            }

            let outcome = self.process_group(job_id, &metadata, group).await;
            self.record_group_result(job_id, outcome.success).await;
            outcomes.push(outcome);
        }

        let success = outcomes.iter().filter(|o| o.success).count();
        let failed = outcomes.len() - success;
        let final_status = JobStatus::classify(success, failed);

        let completed_at = chrono::Utc::now().timestamp();
        let retention_secs = i64::try_from(self.config.storage.retention.as_secs()).unwrap_or(i64::MAX);
        let expires_at = completed_at.saturating_add(retention_secs);

        let finish_result = self
            .db
            .finish_job(job_id, final_status, completed_at, expires_at)
            .await;

        match &finish_result {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(job_id = %job_id, status = %final_status, "job left processing before it finished");
            }
            Err(e) => {
                tracing::error!(job_id = %job_id, status = %final_status, error = %e, "failed to persist final job status");
            }
        }

        tracing::info!(
            job_id = %job_id,
            status = %final_status,
            success,
            failed,
            "job finished"
        );
        self.emit_event(Event::JobFinished {
            id: job_id.clone(),
            status: final_status,
        });

        self.notify_completion(NotifyParams {
            job_id: job_id.clone(),
            webhook_url: job.webhook_url.clone(),
            status: final_status,
            results: self.webhook_results(job_id, outcomes, expires_at),
            completed_at,
        });

        finish_result?;
        Ok(final_status)
    }

    /// Count one group against the job, best-effort
    async fn record_group_result(&self, job_id: &JobId, success: bool) {
        match self.db.increment_job_counter(job_id, success).await {
            Ok(Some(progress)) => {
                self.emit_event(Event::JobProgress {
                    id: job_id.clone(),
                    completed: progress.completed,
                    failed: progress.failed,
                    total: progress.total,
                });
            }
            Ok(None) => {
                tracing::warn!(job_id = %job_id, "job counter not updated, counters already at total");
            }
            Err(e) => {
                tracing::error!(job_id = %job_id, error = %e, "failed to update job counters");
            }
        }
    }

    fn webhook_results(
        &self,
        job_id: &JobId,
        outcomes: Vec<GroupOutcome>,
        expires_at: i64,
    ) -> Vec<WebhookResult> {
        let base_url = &self.config.storage.public_base_url;
        let expires_at = utils::timestamp_to_datetime(expires_at);

        outcomes
            .into_iter()
            .map(|outcome| {
                if outcome.success {
                    WebhookResult {
                        download_url: Some(utils::download_url(base_url, job_id, &outcome.name)),
                        expires_at: Some(expires_at),
                        error: None,
                        skipped_sources: outcome.skipped,
                        name: outcome.name,
                    }
                } else {
                    WebhookResult {
                        download_url: None,
                        expires_at: None,
                        error: Some(
                            outcome
                                .error
                                .unwrap_or_else(|| "group failed".to_string()),
                        ),
                        skipped_sources: Vec::new(),
                        name: outcome.name,
                    }
                }
            })
            .collect()
    }
}
