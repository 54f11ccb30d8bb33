//! Hybrid allocator indexer.
//!
//! Replays decoded allocator events and block ticks into the SQLite
//! projection, and prints a snapshot of it.
//!
//! ## Usage
//!
//! ```bash
//! # Project a JSON-lines file of chain inputs
//! hybrid-indexer run --config indexer.yaml --input inputs.jsonl
//!
//! # Print chain statistics, allocator instances and latest tracked blocks
//! hybrid-indexer status --data-dir ./data
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use hybrid_indexer::commands;
use hybrid_indexer::{init_tracing, resolve_config, IndexerConfig, IndexerError, Overrides};

#[derive(Parser)]
#[command(name = "hybrid-indexer")]
#[command(about = "Hybrid allocator event projection")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a JSON-lines input file into the projection
    Run(RunArgs),
    /// Print the current projection state as JSON
    Status(CommonArgs),
}

#[derive(Debug, Clone, Args)]
struct CommonArgs {
    /// Config YAML path (built-in defaults if omitted)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Data directory override
    #[arg(long)]
    data_dir: Option<String>,

    /// Log level override
    #[arg(long)]
    log_level: Option<String>,
}

#[derive(Debug, Clone, Args)]
struct RunArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// JSON-lines file with one chain input per line
    #[arg(long)]
    input: PathBuf,
}

impl CommonArgs {
    fn resolve(&self) -> Result<IndexerConfig, IndexerError> {
        let overrides = Overrides {
            data_dir: self.data_dir.clone(),
            log_level: self.log_level.clone(),
        };
        Ok(resolve_config(self.config.as_deref(), &overrides)?)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run(args) => run(args).await,
        Commands::Status(args) => status(args),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: RunArgs) -> Result<(), IndexerError> {
    let config = args.common.resolve()?;
    init_tracing(&config.observability.log_level);
    tracing::info!(database = %config.database_path().display(), "=== hybrid-indexer ===");

    let summary = commands::run(&config, &args.input).await?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    summary.into_result().map(|_| ())
}

fn status(args: CommonArgs) -> Result<(), IndexerError> {
    let config = args.resolve()?;
    init_tracing(&config.observability.log_level);

    let store = commands::open_store(&config)?;
    let snapshot = commands::status(&store)?;
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}
