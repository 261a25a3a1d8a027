//! JSON file checkpoint store.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::CheckpointResult;
use crate::traits::checkpoint::CheckpointStore;
use crate::types::checkpoint::Checkpoint;

/// Stores the checkpoint as pretty JSON at a fixed path.
///
/// Writes go to a sibling temp file that is then renamed over the target, so
/// a crash mid-write leaves the previous checkpoint intact.
pub struct FileCheckpointStore {
    path: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "checkpoint".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn load(&self) -> CheckpointResult<Option<Checkpoint>> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let checkpoint: Checkpoint = serde_json::from_slice(&bytes)?;
        tracing::debug!(
            path = %self.path.display(),
            run_id = %checkpoint.run_id,
            targets = checkpoint.targets.len(),
            sunk_keys = checkpoint.sunk_keys.len(),
            "Loaded checkpoint"
        );
        Ok(Some(checkpoint))
    }

    async fn save(&self, checkpoint: &Checkpoint) -> CheckpointResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let json = serde_json::to_vec_pretty(checkpoint)?;
        let temp = self.temp_path();
        tokio::fs::write(&temp, json).await?;
        tokio::fs::rename(&temp, &self.path).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::checkpoint::ResumePoint;

    #[tokio::test]
    async fn test_missing_file_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path().join("none.json"));
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path().join("state/checkpoint.json"));

        let mut checkpoint = Checkpoint::new("run-7");
        checkpoint.advance(
            2,
            Some("30".into()),
            ResumePoint {
                cursor: Some("60".into()),
                next_page: 2,
                exhausted: false,
            },
        );
        store.save(&checkpoint).await.unwrap();

        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded, checkpoint);
        assert!(!store.temp_path().exists());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_a_serde_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoint.json");
        tokio::fs::write(&path, b"{not json").await.unwrap();

        let err = FileCheckpointStore::new(path).load().await.unwrap_err();
        assert!(matches!(err, crate::error::CheckpointError::Serde(_)));
    }
}
