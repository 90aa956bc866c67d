//! Reaper: expiry sweep and orphan sweep over the storage directory.

use crate::db::JobRow;
use crate::error::Result;
use crate::types::{CleanupReport, Event, JobId};
use crate::utils;
use std::path::{Path, PathBuf};

use super::BatchEngine;

impl BatchEngine {
    /// Start the reaper task
    ///
    /// Runs a cleanup pass immediately, then once per `reaper.interval`, until
    /// shutdown begins.
    pub fn start_reaper(&self) -> tokio::task::JoinHandle<()> {
        let engine = self.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(engine.config.reaper.interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        match engine.run_cleanup().await {
                            Ok(report) => {
                                if report != CleanupReport::default() {
                                    tracing::info!(
                                        expired_jobs = report.expired_jobs,
                                        files_deleted = report.files_deleted,
                                        orphans_removed = report.orphans_removed,
                                        errors = report.errors,
                                        "cleanup pass finished"
                                    );
                                }
                            }
                            Err(e) => {
                                tracing::error!(error = %e, "cleanup pass failed");
                            }
                        }
                    }
                    _ = engine.shutdown_token.cancelled() => {
                        tracing::info!("reaper shutting down");
                        break;
                    }
                }
            }
        })
    }

    /// Run the expiry sweep, then the orphan sweep
    ///
    /// Per-item failures are logged, counted in [`CleanupReport::errors`] and
    /// skipped. An error is returned only when a sweep cannot start at all
    /// (the expired-job query or the storage directory listing failed).
    pub async fn run_cleanup(&self) -> Result<CleanupReport> {
        let mut report = CleanupReport::default();

        self.expire_jobs(&mut report).await?;
        self.remove_orphans(&mut report).await?;

        Ok(report)
    }

    /// Reclaim outputs of `completed`/`partial` jobs past their retention window
    ///
    /// An already-`expired` job is never listed again, so re-running the sweep
    /// is a no-op for it.
    async fn expire_jobs(&self, report: &mut CleanupReport) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let jobs = self.db.list_expired_jobs(now).await?;

        for job in jobs {
            if self.expire_job(&job, report).await {
                report.expired_jobs += 1;
            }
        }

        Ok(())
    }

    /// Expire one job; returns whether it moved to `expired`
    async fn expire_job(&self, job: &JobRow, report: &mut CleanupReport) -> bool {
        let groups = match self.db.list_groups(&job.id).await {
            Ok(groups) => groups,
            Err(e) => {
                tracing::warn!(job_id = %job.id, error = %e, "failed to list groups for expiry");
                report.errors += 1;
                return false;
            }
        };

        let storage_dir = &self.config.storage.storage_dir;
        for group in &groups {
            // The derived location covers outputs whose reference was never recorded
            let derived = utils::group_output_path(storage_dir, &job.id, &group.name);
            let mut candidates = vec![utils::partial_path(&derived), derived];
            if let Some(recorded) = group.file_path.as_deref().map(PathBuf::from) {
                if !candidates.contains(&recorded) {
                    candidates.push(recorded);
                }
            }

            for path in &candidates {
                self.remove_output(job, path, report).await;
            }
        }

        let dir = utils::job_dir(&self.config.storage.storage_dir, &job.id);
        if let Err(e) = utils::remove_dir_if_empty(&dir).await {
            tracing::warn!(job_id = %job.id, path = %dir.display(), error = %e, "failed to remove job directory");
            report.errors += 1;
        }

        let expired = match self.db.mark_job_expired(&job.id).await {
            Ok(changed) => changed,
            Err(e) => {
                tracing::warn!(job_id = %job.id, error = %e, "failed to mark job expired");
                report.errors += 1;
                return false;
            }
        };

        if let Err(e) = self.db.clear_group_files(&job.id).await {
            tracing::warn!(job_id = %job.id, error = %e, "failed to clear group file references");
            report.errors += 1;
        }

        if expired {
            tracing::info!(job_id = %job.id, "job expired");
            self.emit_event(Event::JobExpired { id: job.id.clone() });
        }

        expired
    }

    async fn remove_output(&self, job: &JobRow, path: &Path, report: &mut CleanupReport) {
        match tokio::fs::remove_file(path).await {
            Ok(()) => report.files_deleted += 1,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::trace!(job_id = %job.id, path = %path.display(), "no output at path");
            }
            Err(e) => {
                tracing::warn!(job_id = %job.id, path = %path.display(), error = %e, "failed to delete output");
                report.errors += 1;
            }
        }
    }

    /// Remove job directories that no job record refers to
    ///
    /// A directory is only removed when the store positively reports that no
    /// such job exists; a failed lookup leaves it alone.
    async fn remove_orphans(&self, report: &mut CleanupReport) -> Result<()> {
        let root = &self.config.storage.storage_dir;

        let mut entries = match tokio::fs::read_dir(root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();

            match entry.file_type().await {
                Ok(file_type) if file_type.is_dir() => {}
                Ok(_) => continue,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "failed to inspect storage entry");
                    report.errors += 1;
                    continue;
                }
            }

            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };

            match self.db.job_exists(&JobId::from(name)).await {
                Ok(true) => {}
                Ok(false) => match tokio::fs::remove_dir_all(&path).await {
                    Ok(()) => {
                        tracing::info!(path = %path.display(), "removed orphaned job directory");
                        report.orphans_removed += 1;
                        self.emit_event(Event::OrphanRemoved { path });
                    }
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "failed to remove orphaned directory");
                        report.errors += 1;
                    }
                },
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "job lookup failed, keeping directory");
                    report.errors += 1;
                }
            }
        }

        Ok(())
    }
}
