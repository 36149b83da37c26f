//! reelindex CLI
//!
//! Subcommands: `run` the pipeline over the configured sources,
//! `search` the index, `init-db` to create an empty store, `status`
//! to report row and index state.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use reelindex::core::ai::{OpenAiProvider, RetryPolicy};
use reelindex::core::config::RunConfig;
use reelindex::core::convert::FfmpegTranscoder;
use reelindex::core::pipeline::{CancelToken, Orchestrator};
use reelindex::core::search::SearchService;
use reelindex::core::store::VectorStore;

#[derive(Parser, Debug)]
#[command(
    name = "reelindex",
    about = "Convert, summarize and semantically index directories of video"
)]
struct Cli {
    /// Path to the JSON configuration file
    #[arg(long, short, default_value = "reelindex.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Discover, convert and index all configured sources
    Run {
        /// Rebuild the index when its stored parameters differ
        #[arg(long, default_value_t = false)]
        rebuild_index: bool,
    },
    /// Query the index for the closest videos
    Search {
        /// Query text
        text: String,

        /// Number of results
        #[arg(long, short, default_value_t = 5)]
        k: i64,
    },
    /// Create the database schema without running the pipeline
    InitDb,
    /// Report row counts and index state
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = RunConfig::load(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;

    match cli.command {
        Command::Run { rebuild_index } => {
            config.index.rebuild = config.index.rebuild || rebuild_index;
            run_pipeline(config).await
        }
        Command::Search { text, k } => run_search(config, &text, k).await,
        Command::InitDb => {
            let store = VectorStore::open(&config.db_path, config.index.dimension)?;
            store.ensure_schema()?;
            let decision = store.ensure_index(&config.index)?;
            info!(db = %config.db_path.display(), ?decision, "Database initialized");
            Ok(())
        }
        Command::Status => {
            let store = VectorStore::open(&config.db_path, config.index.dimension)?;
            let stats = store.stats()?;
            println!("rows:       {}", stats.rows);
            println!("unassigned: {}", stats.unassigned_rows);
            match stats.index {
                Some(meta) => println!(
                    "index:      {} (built {})",
                    meta.describe(),
                    meta.built_at.to_rfc3339()
                ),
                None => println!("index:      none"),
            }
            Ok(())
        }
    }
}

async fn run_pipeline(config: RunConfig) -> Result<()> {
    let store = Arc::new(VectorStore::open(&config.db_path, config.index.dimension)?);
    let provider = Arc::new(OpenAiProvider::new(&config.ai)?);
    let transcoder = Arc::new(FfmpegTranscoder::new());

    let cancel = CancelToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing in-flight items");
            signal_token.cancel();
        }
    });

    let orchestrator = Orchestrator::new(config, transcoder, provider, store);
    let summary = orchestrator.run(cancel).await?;

    println!("discovered: {}", summary.discovered);
    println!("skipped:    {}", summary.skipped);
    println!("converted:  {}", summary.converted);
    println!("persisted:  {}", summary.persisted);
    println!("failed:     {}", summary.failures.len());
    if summary.cancelled > 0 {
        println!("cancelled:  {}", summary.cancelled);
    }
    for failure in &summary.failures {
        println!(
            "  {} failed at {}: {}",
            failure.source.display(),
            failure.stage,
            failure.reason
        );
    }
    for error in &summary.discovery_errors {
        println!("  discovery: {}", error);
    }

    if !summary.is_clean() {
        anyhow::bail!("run finished with errors");
    }
    Ok(())
}

async fn run_search(config: RunConfig, text: &str, k: i64) -> Result<()> {
    let store = Arc::new(VectorStore::open(&config.db_path, config.index.dimension)?);
    let provider = Arc::new(OpenAiProvider::new(&config.ai)?);
    let service = SearchService::new(
        provider,
        store,
        RetryPolicy::from(&config.ai.retry),
        config.index.clone(),
    );

    let results = service.query(text, k).await?;
    if results.is_empty() {
        println!("no matches");
        return Ok(());
    }
    for (rank, result) in results.iter().enumerate() {
        println!(
            "{:>2}. [{:.4}] {}\n    {}",
            rank + 1,
            result.distance,
            result.path,
            result.summary
        );
    }
    Ok(())
}
