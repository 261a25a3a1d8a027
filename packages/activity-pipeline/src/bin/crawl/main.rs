//! Activity crawl
//!
//! Crawls every (city, category) target of the catalogue and feeds the
//! normalized records to the embedding, vector store and backup sinks.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use activity_pipeline::sinks::{
    FsBackupStore, MemoryBackupStore, MemoryEmbedder, MemoryVectorStore, OpenAiEmbedder,
    PineconeStore,
};
use activity_pipeline::stores::{FileCheckpointStore, MemoryCheckpointStore};
use activity_pipeline::upstream::TripAdvisorUpstream;
use activity_pipeline::{
    load_catalogue, CheckpointStore, Pipeline, PipelineConfig, PipelineError, RunMode,
    SinkAdapter, TargetEnumerator,
};
use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use tripadvisor_client::TripAdvisorClient;

mod env;

use env::Env;

#[derive(Parser)]
#[command(name = "crawl")]
#[command(about = "Crawl activity listings into the vector store")]
#[command(version)]
struct Cli {
    /// City catalogue (JSON array of cities)
    #[arg(long)]
    cities: PathBuf,

    /// Category to crawl for every city; repeatable, overrides the config
    #[arg(long = "category")]
    categories: Vec<String>,

    /// Pipeline config (JSON); missing fields take their defaults
    #[arg(long)]
    config: Option<PathBuf>,

    /// Continue the previous run from its checkpoint
    #[arg(long, conflicts_with = "retry_failed")]
    resume: bool,

    /// Only run targets the previous run recorded as failed
    #[arg(long)]
    retry_failed: bool,

    /// Dispatch at most N targets
    #[arg(long, value_name = "N")]
    max_targets: Option<usize>,

    /// Number of targets processed concurrently
    #[arg(long, value_name = "N")]
    concurrency: Option<usize>,

    /// Keep embeddings, vectors, backups and checkpoint in memory
    #[arg(long)]
    dry_run: bool,
}

impl Cli {
    fn mode(&self) -> RunMode {
        if self.retry_failed {
            RunMode::RetryFailed
        } else if self.resume {
            RunMode::Resume
        } else {
            RunMode::Fresh
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,activity_pipeline=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_line_number(true),
        )
        .init();

    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if let Some(summary) = e.downcast_ref::<PipelineError>().and_then(|p| p.summary()) {
                println!("{summary}");
            }
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let env = Env::from_env()?;
    let config = load_config(&cli).await?;

    let cities = load_catalogue(&cli.cities)
        .await
        .with_context(|| format!("Failed to load city catalogue {}", cli.cities.display()))?;
    let categories = if cli.categories.is_empty() {
        config.categories.clone()
    } else {
        cli.categories.clone()
    };
    let enumerator = TargetEnumerator::new(cities, categories);

    let mut client = TripAdvisorClient::new(&env.upstream_url, config.request_timeout())
        .context("Failed to build upstream client")?;
    if let Some(query_id) = &env.upstream_query_id {
        client = client.with_query_id(query_id);
    }
    if let Some(query_id) = &env.upstream_typeahead_query_id {
        client = client.with_typeahead_query_id(query_id);
    }
    let upstream = TripAdvisorUpstream::new(client);

    let (sink, checkpoints) = collaborators(&cli, &env)?;
    let pipeline = Pipeline::new(enumerator, upstream, sink, checkpoints, config);

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, finishing in-flight pages");
            on_signal.cancel();
        }
    });

    let summary = pipeline.run(cli.mode(), cancel).await?;
    if summary.is_noop() {
        tracing::info!("Catalogue already complete, nothing to do");
    }
    println!("{summary}");
    Ok(())
}

async fn load_config(cli: &Cli) -> Result<PipelineConfig> {
    let mut config = match &cli.config {
        Some(path) => read_config(path).await?,
        None => PipelineConfig::default(),
    };
    if let Some(concurrency) = cli.concurrency {
        config = config.with_concurrency(concurrency);
    }
    if let Some(max) = cli.max_targets {
        config = config.with_max_targets_per_run(max);
    }
    Ok(config)
}

async fn read_config(path: &Path) -> Result<PipelineConfig> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read config {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Invalid config {}", path.display()))
}

fn collaborators(cli: &Cli, env: &Env) -> Result<(SinkAdapter, Arc<dyn CheckpointStore>)> {
    if cli.dry_run {
        tracing::info!("Dry run: sinks and checkpoint are in memory");
        let sink = SinkAdapter::new(
            Arc::new(MemoryEmbedder::default()),
            Arc::new(MemoryVectorStore::new()),
            Arc::new(MemoryBackupStore::new()),
        );
        let checkpoints: Arc<dyn CheckpointStore> = Arc::new(MemoryCheckpointStore::new());
        return Ok((sink, checkpoints));
    }

    let mut embedder =
        OpenAiEmbedder::new(env.openai_api_key()?).context("Failed to build embedding client")?;
    if let Some(model) = &env.openai_embedding_model {
        embedder = embedder.with_model(model);
    }
    let (pinecone_key, pinecone_host) = env.pinecone()?;
    let vectors =
        PineconeStore::new(pinecone_key, pinecone_host).context("Failed to build vector store client")?;

    let sink = SinkAdapter::new(
        Arc::new(embedder),
        Arc::new(vectors),
        Arc::new(FsBackupStore::new(&env.backup_dir)),
    );
    let checkpoints: Arc<dyn CheckpointStore> =
        Arc::new(FileCheckpointStore::new(&env.checkpoint_path));
    Ok((sink, checkpoints))
}
