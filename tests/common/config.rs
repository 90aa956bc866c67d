//! Engine configuration for E2E tests

use docbatch::{BatchEngine, Config, RetryConfig};
use std::time::Duration;
use tempfile::TempDir;

/// Config rooted in `temp_dir` with fast polling and quick retries
pub fn test_config(temp_dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.storage.database_path = temp_dir.path().join("batch.db");
    config.storage.storage_dir = temp_dir.path().join("storage");
    config.storage.public_base_url = "https://downloads.test".to_string();
    config.fetch.concurrency = 3;
    config.fetch.request_timeout = Duration::from_secs(5);
    config.fetch.retry = RetryConfig::fixed(1, Duration::from_millis(20));
    config.worker.poll_interval = Duration::from_millis(50);
    config.notifications.webhook_timeout = Duration::from_secs(2);
    config
}

/// Build a started engine; returns the engine and the tempdir (which must be kept alive)
pub async fn start_engine(configure: impl FnOnce(&mut Config)) -> (BatchEngine, TempDir) {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let mut config = test_config(&temp_dir);
    configure(&mut config);

    let engine = BatchEngine::new(config)
        .await
        .expect("Failed to create engine");
    // Loops stop on shutdown; the handles are not needed
    let _tasks = engine.start();

    (engine, temp_dir)
}
