//! Utility functions for output paths, retrieval references and timestamps

use crate::types::JobId;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

/// Suffix used while an output is being written
const PARTIAL_SUFFIX: &str = "part";

/// Directory holding all outputs of one job
pub fn job_dir(storage_dir: &Path, job_id: &JobId) -> PathBuf {
    storage_dir.join(job_id.as_str())
}

/// Final path of a group's merged output
///
/// Group names are restricted to `[A-Za-z0-9_-]` before they get here, so the
/// name can be used as a file stem verbatim.
pub fn group_output_path(storage_dir: &Path, job_id: &JobId, group: &str) -> PathBuf {
    job_dir(storage_dir, job_id).join(output_file_name(group))
}

/// Download file name of a group's output
pub fn output_file_name(group: &str) -> String {
    format!("{}.pdf", group)
}

/// Temporary path an output is written to before it is renamed into place
pub fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".");
    name.push(PARTIAL_SUFFIX);
    path.with_file_name(name)
}

/// Retrieval reference for a completed group
///
/// # Examples
///
/// ```
/// use docbatch::types::JobId;
/// use docbatch::utils::download_url;
///
/// let url = download_url("https://docs.example.com/", &JobId::from("abc"), "q1-report");
/// assert_eq!(url, "https://docs.example.com/batch/abc/download/q1-report");
/// ```
pub fn download_url(base_url: &str, job_id: &JobId, group: &str) -> String {
    format!(
        "{}/batch/{}/download/{}",
        base_url.trim_end_matches('/'),
        urlencoding::encode(job_id.as_str()),
        urlencoding::encode(group)
    )
}

/// Convert a stored unix timestamp (seconds) into a UTC datetime
///
/// Out-of-range values clamp to the representable range rather than failing
/// a status query.
pub fn timestamp_to_datetime(timestamp: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(timestamp, 0).unwrap_or(if timestamp > 0 {
        DateTime::<Utc>::MAX_UTC
    } else {
        DateTime::<Utc>::MIN_UTC
    })
}

/// Write `bytes` to `path` through a `.part` file and an atomic rename
///
/// A crash mid-write leaves only the `.part` file behind, never a truncated
/// output at `path`.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp = partial_path(path);

    if let Err(e) = tokio::fs::write(&tmp, bytes).await {
        tokio::fs::remove_file(&tmp).await.ok();
        return Err(e);
    }

    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        tokio::fs::remove_file(&tmp).await.ok();
        return Err(e);
    }

    Ok(())
}

/// Remove `dir` if it exists and has no entries
///
/// Returns `Ok(true)` when the directory was removed. A missing directory is
/// not an error.
pub async fn remove_dir_if_empty(dir: &Path) -> std::io::Result<bool> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e),
    };

    if entries.next_entry().await?.is_some() {
        return Ok(false);
    }

    tokio::fs::remove_dir(dir).await?;
    Ok(true)
}
