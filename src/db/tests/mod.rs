use super::*;
use crate::error::DatabaseError;
use crate::types::{GroupStats, Progress};
use tempfile::NamedTempFile;

mod groups;
mod migrations;

/// Fresh database backed by a temp file; keep the file alive for the test
async fn test_db() -> (Database, NamedTempFile) {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();
    (db, temp_file)
}

fn new_job(groups: &[(&str, &[&str])]) -> NewJob {
    NewJob {
        id: JobId::generate(),
        owner: "owner-a".to_string(),
        webhook_url: "https://hooks.example.com/done".to_string(),
        metadata: None,
        groups: groups
            .iter()
            .map(|(name, sources)| NewGroup {
                name: name.to_string(),
                sources: sources.iter().map(|s| s.to_string()).collect(),
            })
            .collect(),
    }
}
