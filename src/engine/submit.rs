//! Caller-facing operations: submission, status, output resolution, deletion, sync merge.

use crate::db::{JobRow, NewGroup, NewJob};
use crate::error::{Error, JobError, Result};
use crate::types::{
    Event, GroupOutput, GroupStats, GroupStatus, GroupStatusResponse, JobId, JobRequest,
    JobStatus, JobStatusResponse, MergeOutput, MergeRequest, Progress, SubmitResponse,
};
use crate::utils;
use crate::validation;
use std::path::PathBuf;

use super::BatchEngine;
use super::group::{ensure_any_fetched, fetch_ordered, merge_blocking};

impl BatchEngine {
    /// Submit a batch job
    ///
    /// The request is validated first; nothing is stored when it is rejected.
    /// On success the job is `queued`, every group is `pending`, and the worker
    /// picks it up on its next cycle.
    ///
    /// # Errors
    ///
    /// - [`Error::Validation`] for a malformed request
    /// - [`Error::ShuttingDown`] once shutdown has begun
    pub async fn submit_job(&self, owner: &str, request: JobRequest) -> Result<SubmitResponse> {
        if self.shutdown_token.is_cancelled() {
            return Err(Error::ShuttingDown);
        }

        validation::validate_job_request(&request)?;

        let JobRequest {
            webhook_url,
            groups,
            metadata,
        } = request;

        let job = NewJob {
            id: JobId::generate(),
            owner: owner.to_string(),
            webhook_url,
            metadata,
            groups: groups
                .into_iter()
                .map(|group| NewGroup {
                    name: group.name,
                    sources: group.sources,
                })
                .collect(),
        };

        let created_at = self.db.insert_job(&job).await?;
        let group_count = job.groups.len();

        tracing::info!(job_id = %job.id, owner = %owner, groups = group_count, "job queued");
        self.emit_event(Event::JobQueued {
            id: job.id.clone(),
            groups: group_count,
        });

        Ok(SubmitResponse {
            job_id: job.id,
            status: JobStatus::Queued,
            group_count,
            created_at: utils::timestamp_to_datetime(created_at),
        })
    }

    /// Current state of a job owned by `owner`
    ///
    /// Retrieval references are only included for completed groups of a job
    /// that has not expired.
    pub async fn get_job_status(&self, job_id: &JobId, owner: &str) -> Result<JobStatusResponse> {
        let job = self.owned_job(job_id, owner).await?;
        let groups = self.db.list_groups(job_id).await?;

        let status = job.status();
        let retrievable = matches!(status, JobStatus::Completed | JobStatus::Partial)
            && !job.is_past_expiry(chrono::Utc::now().timestamp());
        let base_url = &self.config.storage.public_base_url;

        let groups = groups
            .into_iter()
            .map(|group| {
                let group_status = group.status();
                let download_url = (retrievable
                    && group_status == GroupStatus::Completed
                    && group.file_path.is_some())
                .then(|| utils::download_url(base_url, job_id, &group.name));
                let error = match group_status {
                    GroupStatus::Failed => group.error_message,
                    _ => None,
                };

                GroupStatusResponse {
                    name: group.name,
                    status: group_status,
                    download_url,
                    error,
                }
            })
            .collect();

        Ok(JobStatusResponse {
            id: job.id.clone(),
            status,
            progress: Progress {
                total: job.total_groups as u32,
                completed: job.completed as u32,
                failed: job.failed as u32,
            },
            groups,
            created_at: utils::timestamp_to_datetime(job.created_at),
            started_at: job.started_at.map(utils::timestamp_to_datetime),
            completed_at: job.completed_at.map(utils::timestamp_to_datetime),
            expires_at: job.expires_at.map(utils::timestamp_to_datetime),
        })
    }

    /// Locate a completed group's output for download
    ///
    /// # Errors
    ///
    /// - [`JobError::NotFound`] when the job does not exist for `owner`
    /// - [`JobError::Expired`] ("gone") once the retention window has passed,
    ///   even if the reaper has not run yet
    /// - [`JobError::GroupNotFound`] for an unknown group name
    /// - [`JobError::OutputNotReady`] when the group has no output (yet)
    pub async fn resolve_group_output(
        &self,
        job_id: &JobId,
        group_name: &str,
        owner: &str,
    ) -> Result<GroupOutput> {
        let job = self.owned_job(job_id, owner).await?;

        let now = chrono::Utc::now().timestamp();
        if job.status() == JobStatus::Expired || job.is_past_expiry(now) {
            return Err(Error::Job(JobError::Expired {
                id: job_id.to_string(),
            }));
        }

        let group = self
            .db
            .get_group(job_id, group_name)
            .await?
            .ok_or_else(|| JobError::GroupNotFound {
                id: job_id.to_string(),
                name: group_name.to_string(),
            })?;

        let not_ready = || {
            Error::Job(JobError::OutputNotReady {
                id: job_id.to_string(),
                name: group_name.to_string(),
            })
        };

        if group.status() != GroupStatus::Completed {
            return Err(not_ready());
        }

        let path = PathBuf::from(group.file_path.as_deref().ok_or_else(not_ready)?);
        let size = match tokio::fs::metadata(&path).await {
            Ok(meta) => meta.len(),
            Err(e) => {
                tracing::warn!(job_id = %job_id, group = %group_name, path = %path.display(), error = %e, "recorded output is missing");
                return Err(not_ready());
            }
        };

        Ok(GroupOutput {
            path,
            file_name: utils::output_file_name(&group.name),
            size: Some(size),
        })
    }

    /// Delete a job that the worker has not touched yet
    ///
    /// Only a `queued` job whose groups are all `pending` can be deleted.
    /// Anything further along is kept for its audit history.
    pub async fn delete_job(&self, job_id: &JobId, owner: &str) -> Result<()> {
        let job = self.owned_job(job_id, owner).await?;

        let groups = self.db.list_groups(job_id).await?;
        if groups.iter().any(|g| g.status() != GroupStatus::Pending) {
            return Err(Error::Job(JobError::HasProcessedGroups {
                id: job_id.to_string(),
            }));
        }

        let status = job.status();
        if status != JobStatus::Queued {
            return Err(Error::Job(JobError::InvalidState {
                id: job_id.to_string(),
                operation: "delete".to_string(),
                current_state: status.to_string(),
            }));
        }

        // The worker may have claimed it between the checks and the delete
        if !self.db.delete_job(job_id).await? {
            let current_state = self
                .db
                .get_job(job_id)
                .await?
                .map(|row| row.status().to_string())
                .unwrap_or_else(|| "deleted".to_string());
            return Err(Error::Job(JobError::InvalidState {
                id: job_id.to_string(),
                operation: "delete".to_string(),
                current_state,
            }));
        }

        tracing::info!(job_id = %job_id, "job deleted");
        Ok(())
    }

    /// Group counts by status across all jobs
    pub async fn group_stats(&self) -> Result<GroupStats> {
        self.db.count_groups_by_status().await
    }

    /// Fetch and merge `request.sources` right away, outside the job queue
    ///
    /// Uses the same fetcher pool and accumulator as batch groups. Sources that
    /// fail are skipped and listed in [`MergeOutput::skipped`].
    ///
    /// # Errors
    ///
    /// - [`Error::Validation`] for an empty or malformed source list
    /// - [`crate::error::MergeError::AllSourcesFailed`] when no source could be merged
    pub async fn merge_now(&self, request: MergeRequest) -> Result<MergeOutput> {
        if self.shutdown_token.is_cancelled() {
            return Err(Error::ShuttingDown);
        }

        validation::validate_sources(&request.sources, "sources")?;
        validation::validate_metadata(&request.metadata)?;

        let MergeRequest {
            sources,
            title,
            metadata,
        } = request;

        let fetched = fetch_ordered(
            &self.fetcher,
            &sources,
            self.config.fetch.effective_concurrency(),
        )
        .await;
        ensure_any_fetched(&fetched).map_err(Error::Merge)?;

        let output = merge_blocking(fetched, title, metadata).await?;

        tracing::info!(
            sources = sources.len(),
            pages = output.page_count,
            skipped = output.skipped.len(),
            "synchronous merge finished"
        );

        Ok(output)
    }

    async fn owned_job(&self, job_id: &JobId, owner: &str) -> Result<JobRow> {
        self.db
            .get_job_for_owner(job_id, owner)
            .await?
            .ok_or_else(|| {
                Error::Job(JobError::NotFound {
                    id: job_id.to_string(),
                })
            })
    }
}
