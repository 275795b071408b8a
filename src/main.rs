//! # Docs Q&A CLI (`docsqa`)
//!
//! The `docsqa` binary is the primary interface for Docs Q&A. It provides
//! commands for index lifecycle management, asking questions, offline
//! evaluation, and starting the HTTP server.
//!
//! ## Usage
//!
//! ```bash
//! docsqa --config ./config/docsqa.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docsqa index` | Build the index from the corpus (no-op if one exists) |
//! | `docsqa index --rebuild` | Destroy and recreate the index |
//! | `docsqa query "<question>"` | Answer a question with confidence and sources |
//! | `docsqa status` | Show the persisted index manifest |
//! | `docsqa eval` | Run the offline keyword-overlap evaluation |
//! | `docsqa serve` | Start the JSON HTTP server |

use anyhow::bail;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use docs_qa::config::{self, Config};
use docs_qa::evaluator;
use docs_qa::index::{self, IndexLoad, Indexer};
use docs_qa::model_set::ModelSet;
use docs_qa::query::{self, QueryEngine};
use docs_qa::server;

/// Docs Q&A — grounded question answering over technical documentation.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/docsqa.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "docsqa",
    about = "Grounded Q&A over technical documentation with confidence scoring",
    version,
    long_about = "Docs Q&A ingests a markdown documentation tree, indexes it into a persistent \
    vector collection, and answers natural-language questions by retrieving similar chunks, \
    filtering by similarity, and generating a grounded answer with cited sources."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/docsqa.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the index from the corpus.
    ///
    /// Loads all markdown documents, chunks and embeds them, and persists
    /// the vector collection plus manifest. Does nothing when a usable
    /// index already exists; pass `--rebuild` to destroy and recreate it.
    Index {
        /// Destroy the persisted index and rebuild it from scratch.
        #[arg(long)]
        rebuild: bool,
    },

    /// Answer a question against the persisted index.
    ///
    /// Requires an index; run `docsqa index` first.
    Query {
        /// The natural-language question.
        question: String,

        /// Emit the structured result as JSON instead of text.
        #[arg(long)]
        json: bool,
    },

    /// Show the persisted index manifest and health.
    Status,

    /// Run the offline evaluation harness.
    ///
    /// Scores keyword overlap between generated answers and expected
    /// keywords, per case. Uses built-in smoke cases unless `--cases`
    /// points to a TOML file with a `[[cases]]` array.
    Eval {
        /// Path to a TOML file of evaluation cases.
        #[arg(long)]
        cases: Option<PathBuf>,
    },

    /// Start the JSON HTTP server.
    Serve,
}

/// Load the persisted index into a query engine, with actionable errors.
async fn load_engine(config: &Config, models: Arc<ModelSet>) -> anyhow::Result<QueryEngine> {
    let indexer = Indexer::new(config, models.clone());
    match indexer.load_existing_index().await {
        IndexLoad::Ready(index) => Ok(QueryEngine::new(
            index,
            models,
            config.retrieval.clone(),
        )),
        IndexLoad::Absent => bail!(
            "No index found at {}. Run `docsqa index` first.",
            config.storage.persist_dir.display()
        ),
        IndexLoad::Corrupt { reason } => bail!(
            "Index is unusable ({}). Run `docsqa index --rebuild`.",
            reason
        ),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("docs_qa=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    let models = ModelSet::configure(&cfg)?;

    match cli.command {
        Commands::Index { rebuild } => {
            index::run_index(&cfg, models, rebuild).await?;
        }
        Commands::Query { question, json } => {
            let engine = load_engine(&cfg, models).await?;
            query::run_query(&engine, &question, json).await?;
            engine.close().await;
        }
        Commands::Status => {
            index::run_status(&cfg, models).await?;
        }
        Commands::Eval { cases } => {
            let engine = load_engine(&cfg, models).await?;
            evaluator::run_eval(&engine, cases.as_deref()).await?;
            engine.close().await;
        }
        Commands::Serve => {
            server::run_server(&cfg, models).await?;
        }
    }

    Ok(())
}
