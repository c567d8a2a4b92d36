//! # DriveSmart CLI (`dsm`)
//!
//! The `dsm` binary answers driving questions from the command line and
//! serves the chat API.
//!
//! ## Usage
//!
//! ```bash
//! dsm --config ./config/drivesmart.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `dsm init` | Create the answer cache database |
//! | `dsm corpus` | Load the rule corpus and list jurisdictions |
//! | `dsm search "<query>"` | Rank corpus chunks for a question |
//! | `dsm ask "<question>"` | Run the full answer pipeline once |
//! | `dsm topics` | List chat topics and example questions |
//! | `dsm cache stats` | Show answer cache size and location |
//! | `dsm cache clear` | Delete every cached answer |
//! | `dsm serve` | Start the HTTP chat server |
//!
//! ## Examples
//!
//! ```bash
//! dsm search "fire hydrant parking" --jurisdiction washington --explain
//! dsm ask "What is the speed limit in school zones?" --profile quick
//! RUST_LOG=drivesmart=debug dsm serve
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use drivesmart::config::{self, Profile};
use drivesmart::{cache, corpus, db, fallback, migrate, pipeline, search, server};

/// DriveSmart: bounded-latency answers to driving-test questions.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. A missing file is an error; every setting inside it is optional.
#[derive(Parser)]
#[command(
    name = "dsm",
    about = "DriveSmart: bounded-latency answers to driving-test questions",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/drivesmart.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the answer cache database. Idempotent.
    Init,

    /// Load the rule corpus and list jurisdictions with chunk counts.
    Corpus,

    /// Rank corpus chunks for a query.
    Search {
        /// The question or keywords to search for.
        query: String,

        /// Jurisdiction to search (defaults to `pipeline.default_jurisdiction`).
        #[arg(long)]
        jurisdiction: Option<String>,

        /// Maximum number of chunks to show.
        #[arg(long)]
        limit: Option<usize>,

        /// Show the per-signal score breakdown.
        #[arg(long)]
        explain: bool,
    },

    /// Answer one question through the full pipeline.
    Ask {
        question: String,

        #[arg(long)]
        jurisdiction: Option<String>,

        /// Deployment profile: `quick` or `full`.
        #[arg(long, default_value = "full")]
        profile: String,
    },

    /// List chat topics and example questions.
    Topics,

    /// Inspect or clear the answer cache.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Start the HTTP chat server on `[server].bind`.
    Serve,
}

#[derive(Subcommand)]
enum CacheAction {
    /// Show entry count, capacity, and store location.
    Stats,
    /// Delete every cached answer.
    Clear,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .try_init()
        .ok();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => match (&cfg.cache.path, cfg.cache.enabled) {
            (Some(path), true) => {
                let pool = db::connect(path).await?;
                migrate::run_migrations(&pool).await?;
                pool.close().await;
                println!("Answer cache initialized at {}.", path.display());
            }
            _ => println!("Answer cache is memory-only; nothing to initialize."),
        },
        Commands::Corpus => {
            corpus::run_corpus(&cfg)?;
        }
        Commands::Search {
            query,
            jurisdiction,
            limit,
            explain,
        } => {
            search::run_search(&cfg, &query, jurisdiction, limit, explain)?;
        }
        Commands::Ask {
            question,
            jurisdiction,
            profile,
        } => {
            let profile = Profile::parse(&profile)?;
            pipeline::run_ask(&cfg, &question, jurisdiction, profile).await?;
        }
        Commands::Topics => {
            fallback::run_topics(&fallback::FallbackLibrary::new(&cfg.fallback));
        }
        Commands::Cache { action } => match action {
            CacheAction::Stats => cache::run_cache_stats(&cfg).await?,
            CacheAction::Clear => cache::run_cache_clear(&cfg).await?,
        },
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
