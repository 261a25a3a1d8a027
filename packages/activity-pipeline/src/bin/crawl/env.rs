use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result};

/// Collaborator settings loaded from environment variables
#[derive(Debug, Clone)]
pub struct Env {
    pub upstream_url: String,
    pub upstream_query_id: Option<String>,
    pub upstream_typeahead_query_id: Option<String>,
    pub openai_api_key: Option<String>,
    pub openai_embedding_model: Option<String>,
    pub pinecone_api_key: Option<String>,
    pub pinecone_index_host: Option<String>,
    pub backup_dir: PathBuf,
    pub checkpoint_path: PathBuf,
}

impl Env {
    /// Load settings; `.env` is read by the caller before this runs.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            upstream_url: env::var("UPSTREAM_URL")
                .unwrap_or_else(|_| tripadvisor_client::DEFAULT_BASE_URL.to_string()),
            upstream_query_id: env::var("UPSTREAM_QUERY_ID").ok(),
            upstream_typeahead_query_id: non_empty("UPSTREAM_TYPEAHEAD_QUERY_ID"),
            openai_api_key: non_empty("OPENAI_API_KEY"),
            openai_embedding_model: non_empty("OPENAI_EMBEDDING_MODEL"),
            pinecone_api_key: non_empty("PINECONE_API_KEY"),
            pinecone_index_host: non_empty("PINECONE_INDEX_HOST"),
            backup_dir: env::var("BACKUP_DIR")
                .unwrap_or_else(|_| "backups".to_string())
                .into(),
            checkpoint_path: env::var("CHECKPOINT_PATH")
                .unwrap_or_else(|_| "state/checkpoint.json".to_string())
                .into(),
        })
    }

    pub fn openai_api_key(&self) -> Result<&str> {
        self.openai_api_key
            .as_deref()
            .context("OPENAI_API_KEY must be set (or pass --dry-run)")
    }

    pub fn pinecone(&self) -> Result<(&str, &str)> {
        let key = self
            .pinecone_api_key
            .as_deref()
            .context("PINECONE_API_KEY must be set (or pass --dry-run)")?;
        let host = self
            .pinecone_index_host
            .as_deref()
            .context("PINECONE_INDEX_HOST must be set (or pass --dry-run)")?;
        Ok((key, host))
    }
}

fn non_empty(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}
