//! Job rows: insertion, queue claim, counters, terminal transitions, expiry.

use crate::error::DatabaseError;
use crate::types::{GroupStatus, JobId, JobStatus, Progress};
use crate::{Error, Result};

use super::{Database, JobRow, NewJob};

const JOB_COLUMNS: &str = "id, owner, webhook_url, metadata, total_groups, completed, failed, \
     status, created_at, started_at, completed_at, expires_at";

impl Database {
    /// Insert a job and all of its groups atomically
    ///
    /// The job starts `queued` with zero counters; every group starts `pending`.
    /// Returns the creation timestamp.
    pub async fn insert_job(&self, job: &NewJob) -> Result<i64> {
        let now = chrono::Utc::now().timestamp();
        let metadata = job
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let mut tx = self.pool.begin().await.map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to begin transaction: {}",
                e
            )))
        })?;

        sqlx::query(
            r#"
            INSERT INTO jobs (
                id, owner, webhook_url, metadata, total_groups,
                completed, failed, status, created_at
            ) VALUES (?, ?, ?, ?, ?, 0, 0, ?, ?)
            "#,
        )
        .bind(&job.id)
        .bind(&job.owner)
        .bind(&job.webhook_url)
        .bind(&metadata)
        .bind(job.groups.len() as i64)
        .bind(JobStatus::Queued.to_i32())
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_insert_error("job", e))?;

        for (position, group) in job.groups.iter().enumerate() {
            let sources = serde_json::to_string(&group.sources)?;

            sqlx::query(
                r#"
                INSERT INTO job_groups (job_id, position, name, sources, status)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(&job.id)
            .bind(position as i64)
            .bind(&group.name)
            .bind(&sources)
            .bind(GroupStatus::Pending.to_i32())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_insert_error("group", e))?;
        }

        tx.commit().await.map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to commit job insert: {}",
                e
            )))
        })?;

        Ok(now)
    }

    /// Get a job by ID
    pub async fn get_job(&self, id: &JobId) -> Result<Option<JobRow>> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {} FROM jobs WHERE id = ?",
            JOB_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to get job: {}",
                e
            )))
        })?;

        Ok(row)
    }

    /// Get a job by ID, only if it belongs to `owner`
    pub async fn get_job_for_owner(&self, id: &JobId, owner: &str) -> Result<Option<JobRow>> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {} FROM jobs WHERE id = ? AND owner = ?",
            JOB_COLUMNS
        ))
        .bind(id)
        .bind(owner)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to get job for owner: {}",
                e
            )))
        })?;

        Ok(row)
    }

    /// Whether any job row has this id (any status, any owner)
    pub async fn job_exists(&self, id: &JobId) -> Result<bool> {
        let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to check job existence: {}",
                    e
                )))
            })?;

        Ok(found.is_some())
    }

    /// List jobs with a specific status, oldest first
    pub async fn list_jobs_by_status(&self, status: JobStatus) -> Result<Vec<JobRow>> {
        let rows = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {} FROM jobs WHERE status = ? ORDER BY created_at ASC, rowid ASC",
            JOB_COLUMNS
        ))
        .bind(status.to_i32())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list jobs by status: {}",
                e
            )))
        })?;

        Ok(rows)
    }

    /// Atomically claim the oldest queued job
    ///
    /// Moves it to `processing` and stamps `started_at`. The `status = queued`
    /// re-check in the outer `WHERE` makes a concurrent claim of the same row
    /// a no-op.
    pub async fn claim_next_queued_job(&self) -> Result<Option<JobId>> {
        let now = chrono::Utc::now().timestamp();
        let queued = JobStatus::Queued.to_i32();

        let claimed: Option<JobId> = sqlx::query_scalar(
            r#"
            UPDATE jobs
            SET status = ?, started_at = ?
            WHERE id = (
                SELECT id FROM jobs
                WHERE status = ?
                ORDER BY created_at ASC, rowid ASC
                LIMIT 1
            )
            AND status = ?
            RETURNING id
            "#,
        )
        .bind(JobStatus::Processing.to_i32())
        .bind(now)
        .bind(queued)
        .bind(queued)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to claim queued job: {}",
                e
            )))
        })?;

        Ok(claimed)
    }

    /// Count one finished group against a processing job
    ///
    /// The `completed + failed < total_groups` guard keeps the counters within
    /// bounds even if a group is reported twice. Returns the new counters, or
    /// `None` when the guard rejected the increment.
    pub async fn increment_job_counter(&self, id: &JobId, success: bool) -> Result<Option<Progress>> {
        let column = if success { "completed" } else { "failed" };

        let row: Option<(i64, i64, i64)> = sqlx::query_as(&format!(
            r#"
            UPDATE jobs
            SET {column} = {column} + 1
            WHERE id = ? AND status = ? AND completed + failed < total_groups
            RETURNING total_groups, completed, failed
            "#
        ))
        .bind(id)
        .bind(JobStatus::Processing.to_i32())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to increment {} counter: {}",
                column, e
            )))
        })?;

        Ok(row.map(|(total, completed, failed)| Progress {
            total: total as u32,
            completed: completed as u32,
            failed: failed as u32,
        }))
    }

    /// Move a processing job to its terminal status
    ///
    /// Only applies while the job is `processing`. Returns whether a row changed.
    pub async fn finish_job(
        &self,
        id: &JobId,
        status: JobStatus,
        completed_at: i64,
        expires_at: i64,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = ?, completed_at = ?, expires_at = ?
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(status.to_i32())
        .bind(completed_at)
        .bind(expires_at)
        .bind(id)
        .bind(JobStatus::Processing.to_i32())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to finish job: {}",
                e
            )))
        })?;

        Ok(result.rows_affected() > 0)
    }

    /// Jobs whose retention window has passed and still hold outputs
    ///
    /// Only `completed` and `partial` jobs are eligible; `failed` jobs have no
    /// outputs to reclaim.
    pub async fn list_expired_jobs(&self, now: i64) -> Result<Vec<JobRow>> {
        let rows = sqlx::query_as::<_, JobRow>(&format!(
            r#"
            SELECT {} FROM jobs
            WHERE status IN (?, ?) AND expires_at IS NOT NULL AND expires_at <= ?
            ORDER BY expires_at ASC
            "#,
            JOB_COLUMNS
        ))
        .bind(JobStatus::Completed.to_i32())
        .bind(JobStatus::Partial.to_i32())
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list expired jobs: {}",
                e
            )))
        })?;

        Ok(rows)
    }

    /// Move a `completed` or `partial` job to `expired`
    pub async fn mark_job_expired(&self, id: &JobId) -> Result<bool> {
        let result = sqlx::query("UPDATE jobs SET status = ? WHERE id = ? AND status IN (?, ?)")
            .bind(JobStatus::Expired.to_i32())
            .bind(id)
            .bind(JobStatus::Completed.to_i32())
            .bind(JobStatus::Partial.to_i32())
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to mark job expired: {}",
                    e
                )))
            })?;

        Ok(result.rows_affected() > 0)
    }

    /// Delete a job that has not been touched by the worker
    ///
    /// Only a `queued` job whose groups are all still `pending` is removed
    /// (groups cascade). Returns whether a row was deleted.
    pub async fn delete_job(&self, id: &JobId) -> Result<bool> {
        let result = sqlx::query(
            r#"
            DELETE FROM jobs
            WHERE id = ? AND status = ?
            AND NOT EXISTS (
                SELECT 1 FROM job_groups WHERE job_id = jobs.id AND status != ?
            )
            "#,
        )
        .bind(id)
        .bind(JobStatus::Queued.to_i32())
        .bind(GroupStatus::Pending.to_i32())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to delete job: {}",
                e
            )))
        })?;

        Ok(result.rows_affected() > 0)
    }

    /// Put jobs left in `processing` back in the queue
    ///
    /// Their `processing` groups return to `pending`; terminal groups are kept
    /// and the counters are recomputed from them. Returns the requeued ids.
    pub async fn requeue_stale_jobs(&self) -> Result<Vec<JobId>> {
        let processing = JobStatus::Processing.to_i32();

        let mut tx = self.pool.begin().await.map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to begin transaction: {}",
                e
            )))
        })?;

        let ids: Vec<JobId> = sqlx::query_scalar(
            "SELECT id FROM jobs WHERE status = ? ORDER BY created_at ASC, rowid ASC",
        )
        .bind(processing)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list stale jobs: {}",
                e
            )))
        })?;

        if ids.is_empty() {
            return Ok(ids);
        }

        sqlx::query(
            r#"
            UPDATE job_groups SET status = ?
            WHERE status = ? AND job_id IN (SELECT id FROM jobs WHERE status = ?)
            "#,
        )
        .bind(GroupStatus::Pending.to_i32())
        .bind(GroupStatus::Processing.to_i32())
        .bind(processing)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to reset stale groups: {}",
                e
            )))
        })?;

        sqlx::query(
            r#"
            UPDATE jobs SET
                status = ?,
                started_at = NULL,
                completed = (SELECT COUNT(*) FROM job_groups WHERE job_id = jobs.id AND status = ?),
                failed = (SELECT COUNT(*) FROM job_groups WHERE job_id = jobs.id AND status = ?)
            WHERE status = ?
            "#,
        )
        .bind(JobStatus::Queued.to_i32())
        .bind(GroupStatus::Completed.to_i32())
        .bind(GroupStatus::Failed.to_i32())
        .bind(processing)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to requeue stale jobs: {}",
                e
            )))
        })?;

        tx.commit().await.map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to commit requeue: {}",
                e
            )))
        })?;

        Ok(ids)
    }
}

fn map_insert_error(what: &str, e: sqlx::Error) -> Error {
    let is_unique = e
        .as_database_error()
        .is_some_and(|db| db.is_unique_violation());

    if is_unique {
        Error::Database(DatabaseError::ConstraintViolation(format!(
            "Duplicate {}: {}",
            what, e
        )))
    } else {
        Error::Database(DatabaseError::QueryFailed(format!(
            "Failed to insert {}: {}",
            what, e
        )))
    }
}
