//! In-memory checkpoint store for testing and dry runs.

use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;

use crate::error::CheckpointResult;
use crate::traits::checkpoint::CheckpointStore;
use crate::types::checkpoint::Checkpoint;

#[derive(Default)]
pub struct MemoryCheckpointStore {
    checkpoint: RwLock<Option<Checkpoint>>,
    saves: RwLock<usize>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing checkpoint, as if a previous run had saved it.
    pub fn with_checkpoint(checkpoint: Checkpoint) -> Self {
        Self {
            checkpoint: RwLock::new(Some(checkpoint)),
            saves: RwLock::new(0),
        }
    }

    /// The last saved checkpoint.
    pub fn latest(&self) -> Option<Checkpoint> {
        self.checkpoint
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn save_count(&self) -> usize {
        *self.saves.read().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn load(&self) -> CheckpointResult<Option<Checkpoint>> {
        Ok(self.latest())
    }

    async fn save(&self, checkpoint: &Checkpoint) -> CheckpointResult<()> {
        *self.checkpoint.write().unwrap_or_else(PoisonError::into_inner) = Some(checkpoint.clone());
        *self.saves.write().unwrap_or_else(PoisonError::into_inner) += 1;
        Ok(())
    }
}
