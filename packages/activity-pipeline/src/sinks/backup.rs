//! Filesystem backup store.

use std::path::PathBuf;

use async_trait::async_trait;

use crate::error::{CollaboratorError, CollaboratorResult};
use crate::traits::sink::BackupStore;
use crate::types::record::CanonicalRecord;

/// Writes each batch as a pretty JSON file: `<root>/<name>.json`.
///
/// Batch names may contain `/` to nest files, e.g. `backups/<run>/batch-3`.
pub struct FsBackupStore {
    root: PathBuf,
}

impl FsBackupStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, name: &str) -> CollaboratorResult<PathBuf> {
        let mut path = self.root.clone();
        for part in name.split('/') {
            if part.is_empty() || part == "." || part == ".." {
                return Err(CollaboratorError::Rejected(format!("invalid backup name: {name}")));
            }
            path.push(part);
        }
        path.set_extension("json");
        Ok(path)
    }
}

#[async_trait]
impl BackupStore for FsBackupStore {
    async fn archive(&self, name: &str, records: &[CanonicalRecord]) -> CollaboratorResult<()> {
        let path = self.path_for(name)?;
        let io_err = |e: std::io::Error| CollaboratorError::Unavailable(format!("{}: {e}", path.display()));

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }

        let json = serde_json::to_vec_pretty(records)
            .map_err(|e| CollaboratorError::Rejected(format!("unserializable batch: {e}")))?;
        tokio::fs::write(&path, json).await.map_err(io_err)?;

        tracing::debug!(path = %path.display(), records = records.len(), "Archived batch");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::canonical;

    #[tokio::test]
    async fn test_archive_writes_nested_json() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBackupStore::new(dir.path());

        store
            .archive("run-1/batch-0", &[canonical("1", "Lisbon"), canonical("2", "Porto")])
            .await
            .unwrap();

        let bytes = std::fs::read(dir.path().join("run-1/batch-0.json")).unwrap();
        let records: Vec<CanonicalRecord> = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].key.to_string(), "ext:tripadvisor:1");
    }

    #[tokio::test]
    async fn test_rejects_path_escapes() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBackupStore::new(dir.path());
        let err = store.archive("../outside", &[]).await.unwrap_err();
        assert!(matches!(err, CollaboratorError::Rejected(_)));
    }
}
