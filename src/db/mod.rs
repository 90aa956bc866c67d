//! Database layer for docbatch
//!
//! SQLite is the single source of truth for job and group status. Every
//! status transition is a guarded `UPDATE` so a stale caller can never move a
//! row backwards.
//!
//! ## Submodules
//!
//! Methods on [`Database`] are organized by domain:
//! - [`migrations`]: database lifecycle, schema migrations
//! - [`jobs`]: job rows, queue claim, counters, expiry
//! - [`groups`]: group rows and their transitions

use crate::types::{GroupStatus, JobId, JobMetadata, JobStatus};
use crate::{Error, Result};
use sqlx::{FromRow, sqlite::SqlitePool};

mod groups;
mod jobs;
mod migrations;

/// Job to be inserted together with its groups
#[derive(Debug, Clone)]
pub struct NewJob {
    /// Pre-generated job id
    pub id: JobId,
    /// Principal that submitted the job
    pub owner: String,
    /// Completion callback
    pub webhook_url: String,
    /// Document metadata applied to every group
    pub metadata: Option<JobMetadata>,
    /// Groups in submission order
    pub groups: Vec<NewGroup>,
}

/// Group to be inserted with its job
#[derive(Debug, Clone)]
pub struct NewGroup {
    /// Output name, unique within the job
    pub name: String,
    /// Source URLs in merge order
    pub sources: Vec<String>,
}

/// Job record from database
#[derive(Debug, Clone, FromRow)]
pub struct JobRow {
    /// Job id
    pub id: JobId,
    /// Principal that submitted the job
    pub owner: String,
    /// Completion callback
    pub webhook_url: String,
    /// JSON-encoded [`JobMetadata`]
    pub metadata: Option<String>,
    /// Number of groups
    pub total_groups: i64,
    /// Groups that produced an output
    pub completed: i64,
    /// Groups that failed
    pub failed: i64,
    /// Status code (see [`JobStatus::from_i32`])
    pub status: i32,
    /// Unix timestamp of submission
    pub created_at: i64,
    /// Unix timestamp of the worker claim
    pub started_at: Option<i64>,
    /// Unix timestamp of the terminal transition
    pub completed_at: Option<i64>,
    /// Unix timestamp after which outputs are gone
    pub expires_at: Option<i64>,
}

impl JobRow {
    /// Decoded status
    pub fn status(&self) -> JobStatus {
        JobStatus::from_i32(self.status)
    }

    /// Decoded metadata; unreadable metadata is treated as absent
    pub fn metadata(&self) -> JobMetadata {
        match self.metadata.as_deref().map(serde_json::from_str::<JobMetadata>) {
            Some(Ok(metadata)) => metadata,
            Some(Err(e)) => {
                tracing::warn!(job_id = %self.id, error = %e, "ignoring unreadable job metadata");
                JobMetadata::default()
            }
            None => JobMetadata::default(),
        }
    }

    /// Whether the retention window has passed at `now` (unix seconds)
    pub fn is_past_expiry(&self, now: i64) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }
}

/// Group record from database
#[derive(Debug, Clone, FromRow)]
pub struct GroupRow {
    /// Row id
    pub id: i64,
    /// Owning job
    pub job_id: JobId,
    /// Submission order within the job
    pub position: i64,
    /// Output name
    pub name: String,
    /// JSON-encoded source URL list
    pub sources: String,
    /// Status code (see [`GroupStatus::from_i32`])
    pub status: i32,
    /// Output path once completed
    pub file_path: Option<String>,
    /// Output size once completed
    pub file_size: Option<i64>,
    /// Failure reason once failed
    pub error_message: Option<String>,
    /// Unix timestamp of the terminal transition
    pub completed_at: Option<i64>,
}

impl GroupRow {
    /// Decoded status
    pub fn status(&self) -> GroupStatus {
        GroupStatus::from_i32(self.status)
    }

    /// Decoded source list
    pub fn source_urls(&self) -> Result<Vec<String>> {
        serde_json::from_str(&self.sources).map_err(Error::Serialization)
    }
}

/// Database handle for docbatch
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
