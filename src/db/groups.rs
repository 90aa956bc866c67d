//! Group rows and their transitions.

use crate::error::DatabaseError;
use crate::types::{GroupStats, GroupStatus, JobId};
use crate::{Error, Result};

use super::{Database, GroupRow};

const GROUP_COLUMNS: &str = "id, job_id, position, name, sources, status, file_path, file_size, \
     error_message, completed_at";

impl Database {
    /// List a job's groups in submission order
    pub async fn list_groups(&self, job_id: &JobId) -> Result<Vec<GroupRow>> {
        let rows = sqlx::query_as::<_, GroupRow>(&format!(
            "SELECT {} FROM job_groups WHERE job_id = ? ORDER BY position ASC",
            GROUP_COLUMNS
        ))
        .bind(job_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list groups: {}",
                e
            )))
        })?;

        Ok(rows)
    }

    /// Get one group of a job by name
    pub async fn get_group(&self, job_id: &JobId, name: &str) -> Result<Option<GroupRow>> {
        let row = sqlx::query_as::<_, GroupRow>(&format!(
            "SELECT {} FROM job_groups WHERE job_id = ? AND name = ?",
            GROUP_COLUMNS
        ))
        .bind(job_id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to get group: {}",
                e
            )))
        })?;

        Ok(row)
    }

    /// Move a pending group to `processing`
    pub async fn mark_group_processing(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("UPDATE job_groups SET status = ? WHERE id = ? AND status = ?")
            .bind(GroupStatus::Processing.to_i32())
            .bind(id)
            .bind(GroupStatus::Pending.to_i32())
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to mark group processing: {}",
                    e
                )))
            })?;

        Ok(result.rows_affected() > 0)
    }

    /// Record a group's output; a terminal group is left unchanged
    pub async fn complete_group(
        &self,
        id: i64,
        file_path: &str,
        file_size: i64,
        completed_at: i64,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE job_groups
            SET status = ?, file_path = ?, file_size = ?, error_message = NULL, completed_at = ?
            WHERE id = ? AND status NOT IN (?, ?)
            "#,
        )
        .bind(GroupStatus::Completed.to_i32())
        .bind(file_path)
        .bind(file_size)
        .bind(completed_at)
        .bind(id)
        .bind(GroupStatus::Completed.to_i32())
        .bind(GroupStatus::Failed.to_i32())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to complete group: {}",
                e
            )))
        })?;

        Ok(result.rows_affected() > 0)
    }

    /// Record a group's failure; a terminal group is left unchanged
    pub async fn fail_group(&self, id: i64, error: &str, completed_at: i64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE job_groups
            SET status = ?, error_message = ?, completed_at = ?
            WHERE id = ? AND status NOT IN (?, ?)
            "#,
        )
        .bind(GroupStatus::Failed.to_i32())
        .bind(error)
        .bind(completed_at)
        .bind(id)
        .bind(GroupStatus::Completed.to_i32())
        .bind(GroupStatus::Failed.to_i32())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to fail group: {}",
                e
            )))
        })?;

        Ok(result.rows_affected() > 0)
    }

    /// Forget output paths of a job's groups once the files are gone
    pub async fn clear_group_files(&self, job_id: &JobId) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE job_groups SET file_path = NULL WHERE job_id = ? AND file_path IS NOT NULL",
        )
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to clear group files: {}",
                e
            )))
        })?;

        Ok(result.rows_affected())
    }

    /// Count groups per status across all jobs
    pub async fn count_groups_by_status(&self) -> Result<GroupStats> {
        let rows: Vec<(i32, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM job_groups GROUP BY status")
                .fetch_all(&self.pool)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::QueryFailed(format!(
                        "Failed to count groups: {}",
                        e
                    )))
                })?;

        let mut stats = GroupStats::default();
        for (status, count) in rows {
            let count = count as u64;
            match GroupStatus::from_i32(status) {
                GroupStatus::Pending => stats.pending += count,
                GroupStatus::Processing => stats.processing += count,
                GroupStatus::Completed => stats.completed += count,
                GroupStatus::Failed => stats.failed += count,
            }
        }

        Ok(stats)
    }
}
