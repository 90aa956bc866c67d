//! Group processing: bounded-concurrency ordered fetch, then a sequential merge.

use crate::db::GroupRow;
use crate::error::{Error, FetchError, MergeError, Result};
use crate::fetcher::SourceFetcher;
use crate::merge::MergeAccumulator;
use crate::telemetry::TelemetryEvent;
use crate::types::{Event, JobId, JobMetadata, MergeOutput, SkippedSource};
use crate::utils;
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use super::BatchEngine;

/// Result of fetching one source, tagged with its submission index
pub(crate) struct FetchedSource {
    pub(crate) index: usize,
    pub(crate) url: String,
    pub(crate) result: std::result::Result<Vec<u8>, FetchError>,
}

/// What happened to one group, as reported in the completion callback
#[derive(Debug, Clone)]
pub(crate) struct GroupOutcome {
    pub(crate) name: String,
    pub(crate) success: bool,
    pub(crate) error: Option<String>,
    pub(crate) skipped: Vec<SkippedSource>,
}

/// Written output of a successful group
struct GroupArtifact {
    path: PathBuf,
    size: u64,
    pages: usize,
    skipped: Vec<SkippedSource>,
}

/// Fetch every source with at most `concurrency` requests in flight
///
/// Results come back sorted by submission index regardless of completion
/// order. Failures are kept in place so their index survives for diagnostics.
pub(crate) async fn fetch_ordered(
    fetcher: &Arc<dyn SourceFetcher>,
    sources: &[String],
    concurrency: usize,
) -> Vec<FetchedSource> {
    let mut fetched: Vec<FetchedSource> = stream::iter(sources.iter().cloned().enumerate())
        .map(|(index, url)| {
            let fetcher = Arc::clone(fetcher);
            async move {
                let result = fetcher.fetch(&url).await;
                FetchedSource { index, url, result }
            }
        })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    fetched.sort_by_key(|source| source.index);
    fetched
}

/// Merge fetched sources in index order
///
/// Fetch failures and buffers that cannot be merged become [`SkippedSource`]s.
/// Fails with [`MergeError::AllSourcesFailed`] when nothing could be appended.
/// CPU-bound; call from `spawn_blocking`.
pub(crate) fn merge_fetched(
    fetched: Vec<FetchedSource>,
    title: Option<&str>,
    metadata: &JobMetadata,
) -> std::result::Result<MergeOutput, MergeError> {
    let count = fetched.len();
    let mut accumulator = MergeAccumulator::new();
    accumulator.set_info(title, metadata);

    let mut skipped = Vec::new();
    for source in fetched {
        let outcome = match source.result {
            Ok(bytes) => accumulator.append_buffer(&bytes).map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };

        if let Err(error) = outcome {
            skipped.push(SkippedSource {
                index: source.index,
                url: source.url,
                error,
            });
        }
    }

    if accumulator.page_count() == 0 {
        return Err(MergeError::AllSourcesFailed {
            count,
            first_error: skipped.first().map(|s| s.error.clone()),
        });
    }

    let page_count = accumulator.page_count();
    let bytes = accumulator.finish()?;

    Ok(MergeOutput {
        bytes,
        page_count,
        skipped,
    })
}

/// Fail fast when no source could even be fetched; nothing to merge
pub(crate) fn ensure_any_fetched(fetched: &[FetchedSource]) -> std::result::Result<(), MergeError> {
    if fetched.iter().any(|source| source.result.is_ok()) {
        return Ok(());
    }

    Err(MergeError::AllSourcesFailed {
        count: fetched.len(),
        first_error: fetched
            .iter()
            .find_map(|source| source.result.as_ref().err().map(|e| e.to_string())),
    })
}

/// Run `merge_fetched` on the blocking pool
pub(crate) async fn merge_blocking(
    fetched: Vec<FetchedSource>,
    title: Option<String>,
    metadata: JobMetadata,
) -> Result<MergeOutput> {
    let output = tokio::task::spawn_blocking(move || {
        merge_fetched(fetched, title.as_deref(), &metadata)
    })
    .await
    .map_err(|e| Error::Other(format!("merge task failed: {}", e)))??;

    Ok(output)
}

impl BatchEngine {
    /// Run one group from `pending` to `completed` or `failed`
    ///
    /// Never returns an error: anything that goes wrong is recorded as the
    /// group's failure and reported in the outcome.
    pub(crate) async fn process_group(
        &self,
        job_id: &JobId,
        metadata: &JobMetadata,
        group: &GroupRow,
    ) -> GroupOutcome {
        let started = Instant::now();

        match self.db.mark_group_processing(group.id).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(job_id = %job_id, group = %group.name, "group was not pending when processing started");
            }
            Err(e) => {
                tracing::error!(job_id = %job_id, group = %group.name, error = %e, "failed to mark group processing");
            }
        }

        let result = self.build_group_output(job_id, metadata, group).await;
        let now = chrono::Utc::now().timestamp();

        let outcome = match result {
            Ok(artifact) => {
                let path = artifact.path.to_string_lossy().into_owned();
                match self
                    .db
                    .complete_group(group.id, &path, artifact.size as i64, now)
                    .await
                {
                    Ok(true) => {}
                    Ok(false) => {
                        tracing::warn!(job_id = %job_id, group = %group.name, "group was already terminal, output not recorded");
                    }
                    Err(e) => {
                        tracing::error!(job_id = %job_id, group = %group.name, error = %e, "failed to record group completion");
                    }
                }

                tracing::info!(
                    job_id = %job_id,
                    group = %group.name,
                    pages = artifact.pages,
                    size_bytes = artifact.size,
                    skipped = artifact.skipped.len(),
                    "group completed"
                );

                self.emit_event(Event::GroupCompleted {
                    id: job_id.clone(),
                    group: group.name.clone(),
                    pages: artifact.pages,
                    size_bytes: artifact.size,
                });

                GroupOutcome {
                    name: group.name.clone(),
                    success: true,
                    error: None,
                    skipped: artifact.skipped,
                }
            }
            Err(e) => {
                let error = e.to_string();

                if let Err(db_err) = self.db.fail_group(group.id, &error, now).await {
                    tracing::error!(job_id = %job_id, group = %group.name, error = %db_err, "failed to record group failure");
                }

                tracing::warn!(job_id = %job_id, group = %group.name, error = %error, "group failed");

                self.emit_event(Event::GroupFailed {
                    id: job_id.clone(),
                    group: group.name.clone(),
                    error: error.clone(),
                });

                GroupOutcome {
                    name: group.name.clone(),
                    success: false,
                    error: Some(error),
                    skipped: Vec::new(),
                }
            }
        };

        self.telemetry.record(TelemetryEvent::GroupProcessed {
            job_id: job_id.clone(),
            group: group.name.clone(),
            success: outcome.success,
            elapsed: started.elapsed(),
        });

        outcome
    }

    /// Fetch, merge and write one group's output
    async fn build_group_output(
        &self,
        job_id: &JobId,
        metadata: &JobMetadata,
        group: &GroupRow,
    ) -> Result<GroupArtifact> {
        let sources = group.source_urls()?;

        self.emit_event(Event::GroupStarted {
            id: job_id.clone(),
            group: group.name.clone(),
            sources: sources.len(),
        });

        let fetched = fetch_ordered(
            &self.fetcher,
            &sources,
            self.config.fetch.effective_concurrency(),
        )
        .await;

        for source in &fetched {
            if let Err(e) = &source.result {
                self.emit_source_failed(job_id, &group.name, source.index, &source.url, &e.to_string());
            }
        }

        ensure_any_fetched(&fetched)?;

        let fetch_failed: HashSet<usize> = fetched
            .iter()
            .filter(|s| s.result.is_err())
            .map(|s| s.index)
            .collect();
        let output = merge_blocking(fetched, Some(group.name.clone()), metadata.clone()).await?;

        // Sources that fetched fine but could not be merged
        for source in output
            .skipped
            .iter()
            .filter(|s| !fetch_failed.contains(&s.index))
        {
            self.emit_source_failed(job_id, &group.name, source.index, &source.url, &source.error);
        }

        let dir = utils::job_dir(&self.config.storage.storage_dir, job_id);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| MergeError::WriteFailed {
                path: dir.clone(),
                reason: e.to_string(),
            })?;

        let path = utils::group_output_path(&self.config.storage.storage_dir, job_id, &group.name);
        utils::write_atomic(&path, &output.bytes)
            .await
            .map_err(|e| MergeError::WriteFailed {
                path: path.clone(),
                reason: e.to_string(),
            })?;

        Ok(GroupArtifact {
            path,
            size: output.bytes.len() as u64,
            pages: output.page_count,
            skipped: output.skipped,
        })
    }

    fn emit_source_failed(&self, job_id: &JobId, group: &str, index: usize, url: &str, error: &str) {
        tracing::warn!(job_id = %job_id, group = %group, index, url = %url, error = %error, "source skipped");
        self.emit_event(Event::SourceFailed {
            id: job_id.clone(),
            group: group.to_string(),
            index,
            url: url.to_string(),
            error: error.to_string(),
        });
    }
}
