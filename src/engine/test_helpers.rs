//! Shared test helpers for creating BatchEngine instances in tests.

use crate::config::Config;
use crate::db::Database;
use crate::engine::BatchEngine;
use crate::error::FetchError;
use crate::fetcher::SourceFetcher;
use crate::telemetry::Telemetry;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::tempdir;

/// Canned answer for one URL
#[derive(Clone, Debug)]
pub(crate) enum MockResponse {
    /// Return these bytes after an optional delay
    Bytes(Vec<u8>, Duration),
    /// Fail with this error
    Fail(FetchError),
}

/// In-memory fetcher; unknown URLs answer 404
#[derive(Default)]
pub(crate) struct MockFetcher {
    responses: HashMap<String, MockResponse>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockFetcher {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with(mut self, url: &str, bytes: Vec<u8>) -> Self {
        self.responses
            .insert(url.to_string(), MockResponse::Bytes(bytes, Duration::ZERO));
        self
    }

    pub(crate) fn with_delay(mut self, url: &str, bytes: Vec<u8>, delay: Duration) -> Self {
        self.responses
            .insert(url.to_string(), MockResponse::Bytes(bytes, delay));
        self
    }

    pub(crate) fn with_error(mut self, url: &str, error: FetchError) -> Self {
        self.responses
            .insert(url.to_string(), MockResponse::Fail(error));
        self
    }

    /// Total fetches performed
    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of fetches observed running at once
    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceFetcher for MockFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let result = match self.responses.get(url) {
            Some(MockResponse::Bytes(bytes, delay)) => {
                if !delay.is_zero() {
                    tokio::time::sleep(*delay).await;
                }
                Ok(bytes.clone())
            }
            Some(MockResponse::Fail(error)) => Err(error.clone()),
            None => Err(FetchError::HttpStatus {
                status: 404,
                reason: Some("Not Found".to_string()),
            }),
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

/// Config rooted in `dir` with a short retention window
pub(crate) fn test_config(dir: &std::path::Path) -> Config {
    let mut config = Config::default();
    config.storage.database_path = dir.join("test.db");
    config.storage.storage_dir = dir.join("storage");
    config.storage.public_base_url = "http://files.test".to_string();
    config.notifications.webhook_timeout = Duration::from_secs(2);
    config.worker.poll_interval = Duration::from_millis(50);
    config
}

/// Helper to create a test BatchEngine with an empty mock fetcher.
/// Returns the engine and the tempdir (which must be kept alive).
pub(crate) async fn create_test_engine() -> (BatchEngine, tempfile::TempDir) {
    create_test_engine_with(Arc::new(MockFetcher::new()), |_| {}).await
}

/// Helper to create a test BatchEngine with the given fetcher and config tweaks.
pub(crate) async fn create_test_engine_with(
    fetcher: Arc<dyn SourceFetcher>,
    configure: impl FnOnce(&mut Config),
) -> (BatchEngine, tempfile::TempDir) {
    let temp_dir = tempdir().unwrap();
    let mut config = test_config(temp_dir.path());
    configure(&mut config);

    let db = Database::new(&config.storage.database_path).await.unwrap();

    let engine = BatchEngine::with_components(config, db, fetcher, Telemetry::disabled())
        .await
        .unwrap();

    (engine, temp_dir)
}
