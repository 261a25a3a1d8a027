use async_trait::async_trait;

use crate::error::CheckpointResult;
use crate::types::checkpoint::Checkpoint;

/// Storage for run resumption state.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// The last saved checkpoint, or `None` if nothing was saved yet.
    async fn load(&self) -> CheckpointResult<Option<Checkpoint>>;

    async fn save(&self, checkpoint: &Checkpoint) -> CheckpointResult<()>;
}
