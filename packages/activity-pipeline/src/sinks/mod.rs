//! Collaborator adapters behind the sink traits.

pub mod backup;
pub mod memory;
pub mod openai;
pub mod pinecone;

pub use backup::FsBackupStore;
pub use memory::{MemoryBackupStore, MemoryEmbedder, MemoryVectorStore};
pub use openai::OpenAiEmbedder;
pub use pinecone::PineconeStore;

use reqwest::StatusCode;

use crate::error::CollaboratorError;

/// Throttling and server errors are worth retrying; anything else is a refusal.
pub(crate) fn classify_status(status: StatusCode, body: String) -> CollaboratorError {
    let message = format!("{}: {}", status.as_u16(), body);
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        CollaboratorError::Unavailable(message)
    } else {
        CollaboratorError::Rejected(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(matches!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, String::new()),
            CollaboratorError::Unavailable(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_GATEWAY, String::new()),
            CollaboratorError::Unavailable(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_REQUEST, "too long".into()),
            CollaboratorError::Rejected(_)
        ));
    }
}
