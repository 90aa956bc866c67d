//! Core types for docbatch

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Unique identifier for a batch job
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a fresh random identifier
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Borrow the identifier as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for JobId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for JobId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<JobId> for String {
    fn from(id: JobId) -> Self {
        id.0
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for JobId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_string()))
    }
}

// Implement sqlx Type, Encode, and Decode for database operations
impl sqlx::Type<sqlx::Sqlite> for JobId {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <String as sqlx::Type<sqlx::Sqlite>>::type_info()
    }

    fn compatible(ty: &sqlx::sqlite::SqliteTypeInfo) -> bool {
        <String as sqlx::Type<sqlx::Sqlite>>::compatible(ty)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for JobId {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        sqlx::Encode::<sqlx::Sqlite>::encode_by_ref(&self.0, buf)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for JobId {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let id = <String as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        Ok(Self(id))
    }
}

/// Job lifecycle status
///
/// ```text
/// queued -> processing -> completed | partial | failed
/// completed | partial -> expired
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Waiting for the worker
    Queued,
    /// Claimed by the worker
    Processing,
    /// Every group produced an output
    Completed,
    /// Some groups produced an output
    Partial,
    /// No group produced an output
    Failed,
    /// Outputs reclaimed after the retention window
    Expired,
}

impl JobStatus {
    /// Convert integer status code from database to JobStatus enum
    pub fn from_i32(status: i32) -> Self {
        match status {
            0 => JobStatus::Queued,
            1 => JobStatus::Processing,
            2 => JobStatus::Completed,
            3 => JobStatus::Partial,
            4 => JobStatus::Failed,
            5 => JobStatus::Expired,
            _ => JobStatus::Failed, // Default to Failed for unknown status
        }
    }

    /// Convert JobStatus enum to integer status code
    pub fn to_i32(&self) -> i32 {
        match self {
            JobStatus::Queued => 0,
            JobStatus::Processing => 1,
            JobStatus::Completed => 2,
            JobStatus::Partial => 3,
            JobStatus::Failed => 4,
            JobStatus::Expired => 5,
        }
    }

    /// Lowercase name as exposed to callers
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Partial => "partial",
            JobStatus::Failed => "failed",
            JobStatus::Expired => "expired",
        }
    }

    /// Whether processing has finished for this job
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Partial | JobStatus::Failed | JobStatus::Expired
        )
    }

    /// Final status for a processed job from its group outcomes
    pub fn classify(success: usize, failed: usize) -> Self {
        if failed == 0 {
            JobStatus::Completed
        } else if success == 0 {
            JobStatus::Failed
        } else {
            JobStatus::Partial
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Group lifecycle status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupStatus {
    /// Not yet started
    Pending,
    /// Sources are being fetched and merged
    Processing,
    /// Merged output written
    Completed,
    /// No output produced
    Failed,
}

impl GroupStatus {
    /// Convert integer status code from database to GroupStatus enum
    pub fn from_i32(status: i32) -> Self {
        match status {
            0 => GroupStatus::Pending,
            1 => GroupStatus::Processing,
            2 => GroupStatus::Completed,
            3 => GroupStatus::Failed,
            _ => GroupStatus::Failed,
        }
    }

    /// Convert GroupStatus enum to integer status code
    pub fn to_i32(&self) -> i32 {
        match self {
            GroupStatus::Pending => 0,
            GroupStatus::Processing => 1,
            GroupStatus::Completed => 2,
            GroupStatus::Failed => 3,
        }
    }

    /// Whether the group has reached `completed` or `failed`
    pub fn is_terminal(&self) -> bool {
        matches!(self, GroupStatus::Completed | GroupStatus::Failed)
    }
}

/// Optional document metadata applied to every group output of a job
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobMetadata {
    /// Document author
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    /// Document subject
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    /// Document keywords
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,
}

/// One named output group in a submission
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupRequest {
    /// Output name, unique within the job
    pub name: String,
    /// Source URLs, merged in this order
    pub sources: Vec<String>,
}

/// Batch job submission
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRequest {
    /// Completion callback
    pub webhook_url: String,
    /// Output groups
    pub groups: Vec<GroupRequest>,
    /// Document metadata for all groups
    #[serde(default)]
    pub metadata: Option<JobMetadata>,
}

/// Returned from a successful submission
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SubmitResponse {
    /// New job id
    pub job_id: JobId,
    /// Always `queued`
    pub status: JobStatus,
    /// Number of groups created
    pub group_count: usize,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

/// Progress counters for a job
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    /// Total groups
    pub total: u32,
    /// Groups that produced an output
    pub completed: u32,
    /// Groups that failed
    pub failed: u32,
}

/// Per-group view in a status query
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GroupStatusResponse {
    /// Group name
    pub name: String,
    /// Current status
    pub status: GroupStatus,
    /// Retrieval reference, once completed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    /// Failure reason, once failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Status query response
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JobStatusResponse {
    /// Job id
    pub id: JobId,
    /// Current status
    pub status: JobStatus,
    /// Group counters
    pub progress: Progress,
    /// Groups in submission order
    pub groups: Vec<GroupStatusResponse>,
    /// Submission time
    pub created_at: DateTime<Utc>,
    /// When the worker claimed the job
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// When the job reached a terminal status
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// When outputs stop being retrievable
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

/// Resolved location of a completed group's output
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GroupOutput {
    /// Path on disk
    pub path: PathBuf,
    /// Suggested download file name (`<group>.pdf`)
    pub file_name: String,
    /// Size in bytes, as recorded at write time
    pub size: Option<u64>,
}

/// A source that was left out of a merge
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedSource {
    /// Position in the submitted source list
    pub index: usize,
    /// Source URL
    pub url: String,
    /// Why it was skipped
    pub error: String,
}

/// Counts of groups per status across all jobs
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupStats {
    /// Groups not yet started
    pub pending: u64,
    /// Groups in progress
    pub processing: u64,
    /// Groups with an output
    pub completed: u64,
    /// Groups without an output
    pub failed: u64,
}

/// Synchronous merge request
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeRequest {
    /// Source URLs, merged in this order
    pub sources: Vec<String>,
    /// Document title
    #[serde(default)]
    pub title: Option<String>,
    /// Document metadata
    #[serde(default)]
    pub metadata: JobMetadata,
}

/// Result of a synchronous merge
#[derive(Clone, Debug)]
pub struct MergeOutput {
    /// Serialized document
    pub bytes: Vec<u8>,
    /// Pages in the merged document
    pub page_count: usize,
    /// Sources that could not be fetched or merged
    pub skipped: Vec<SkippedSource>,
}

/// Summary block of a webhook payload
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookSummary {
    /// Groups in the job
    pub total: usize,
    /// Groups with an output
    pub success: usize,
    /// Groups without an output
    pub failed: usize,
}

/// Per-group entry of a webhook payload
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookResult {
    /// Group name
    pub name: String,
    /// Retrieval reference when the group completed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    /// When the reference stops working
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    /// Failure reason when the group failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Sources left out of a completed group
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skipped_sources: Vec<SkippedSource>,
}

/// Completion callback body, sent once per job
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WebhookPayload {
    /// Job id
    pub job_id: JobId,
    /// Terminal status (completed, partial or failed)
    pub status: JobStatus,
    /// Group results in processing order
    pub results: Vec<WebhookResult>,
    /// Counts
    pub summary: WebhookSummary,
    /// When the job finished
    pub completed_at: DateTime<Utc>,
}

/// Outcome of one reaper pass
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    /// Jobs moved to `expired`
    pub expired_jobs: usize,
    /// Output files deleted
    pub files_deleted: usize,
    /// Storage directories removed because no job references them
    pub orphans_removed: usize,
    /// Per-item failures that were logged and skipped
    pub errors: usize,
}

/// Event emitted during the job lifecycle
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Job accepted and queued
    JobQueued {
        /// Job ID
        id: JobId,
        /// Number of groups
        groups: usize,
    },

    /// Worker claimed the job
    JobStarted {
        /// Job ID
        id: JobId,
    },

    /// Group processing began
    GroupStarted {
        /// Job ID
        id: JobId,
        /// Group name
        group: String,
        /// Number of sources
        sources: usize,
    },

    /// A single source could not be fetched or merged
    SourceFailed {
        /// Job ID
        id: JobId,
        /// Group name
        group: String,
        /// Source index
        index: usize,
        /// Source URL
        url: String,
        /// Failure reason
        error: String,
    },

    /// Group produced its output
    GroupCompleted {
        /// Job ID
        id: JobId,
        /// Group name
        group: String,
        /// Pages in the output
        pages: usize,
        /// Output size in bytes
        size_bytes: u64,
    },

    /// Group failed
    GroupFailed {
        /// Job ID
        id: JobId,
        /// Group name
        group: String,
        /// Failure reason
        error: String,
    },

    /// Job counters changed
    JobProgress {
        /// Job ID
        id: JobId,
        /// Completed groups
        completed: u32,
        /// Failed groups
        failed: u32,
        /// Total groups
        total: u32,
    },

    /// Job reached a terminal status
    JobFinished {
        /// Job ID
        id: JobId,
        /// Final status
        status: JobStatus,
    },

    /// Webhook accepted by the receiver
    WebhookDelivered {
        /// Job ID
        id: JobId,
        /// Webhook URL
        url: String,
    },

    /// Webhook could not be delivered
    WebhookFailed {
        /// Job ID
        id: JobId,
        /// Webhook URL
        url: String,
        /// Failure reason
        error: String,
    },

    /// Job outputs reclaimed
    JobExpired {
        /// Job ID
        id: JobId,
    },

    /// Storage directory without a job removed
    OrphanRemoved {
        /// Directory path
        path: PathBuf,
    },

    /// Jobs left in `processing` were put back in the queue
    JobsRequeued {
        /// Number of jobs requeued
        count: usize,
    },

    /// Engine is shutting down
    Shutdown,
}
