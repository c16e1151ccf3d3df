//! # Research Harness CLI (`rh`)
//!
//! The `rh` binary drives the document index and the research pipelines:
//! schema setup, document import, one-shot questions, gap checks,
//! retrieval evaluation, and the HTTP server.
//!
//! ## Usage
//!
//! ```bash
//! rh --config ./config/rh.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `rh init` | Create the SQLite database and run schema migrations |
//! | `rh import <file.jsonl>` | Import (and embed) documents |
//! | `rh ask "<question>"` | Simple path: classify, hybrid search, rerank |
//! | `rh research "<question>"` | Routed path with decomposition and synthesis |
//! | `rh gap --description .. --resolution ..` | Knowledge-gap check for a resolved ticket |
//! | `rh draft --description .. --resolution ..` | Draft a KB article from a resolved ticket |
//! | `rh eval <cases.jsonl>` | Retrieval evaluation against ground truth |
//! | `rh serve` | Start the HTTP server |
//!
//! Command results are printed to stdout as pretty JSON; logs go to
//! stderr and are filtered with `RUST_LOG` (default `info`).

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use research_harness::agents::{DraftRequest, GapTicket, Pipeline};
use research_harness::{config, eval, import, migrate, server};

/// Research Harness: hybrid retrieval and multi-step research over
/// support scripts, knowledge articles, and past ticket resolutions.
#[derive(Parser)]
#[command(name = "rh", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/rh.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Idempotent.
    Init,

    /// Import documents from a JSONL file.
    ///
    /// Unchanged documents (same content hash) are skipped.
    Import {
        /// One JSON document per line: id, pool, title, body, category?, metadata?
        path: PathBuf,
    },

    /// Answer a question with the simple path.
    Ask { question: String },

    /// Answer a question with complexity routing, decomposition and synthesis.
    Research { question: String },

    /// Check whether a resolved ticket holds knowledge the KB lacks.
    Gap {
        #[arg(long)]
        description: String,
        #[arg(long)]
        resolution: String,
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        ticket_id: Option<String>,
    },

    /// Draft a KB article from a resolved ticket, for review.
    Draft {
        #[arg(long)]
        description: String,
        #[arg(long)]
        resolution: String,
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        ticket_id: Option<String>,
        #[arg(long)]
        module: Option<String>,
        #[arg(long)]
        root_cause: Option<String>,
        /// Read the conversation transcript from this file.
        #[arg(long)]
        transcript: Option<PathBuf>,
        #[arg(long)]
        script_title: Option<String>,
        #[arg(long)]
        script_id: Option<String>,
        /// Title proposed by `rh gap`.
        #[arg(long)]
        suggested_title: Option<String>,
    },

    /// Evaluate retrieval against ground-truth questions.
    Eval {
        /// One case per line: question, expected_pool, expected_ids[]
        path: PathBuf,
        /// Only run the first N cases.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Start the HTTP server on `[server].bind`.
    Serve,
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Import { path } => {
            import::run_import(&cfg, &path).await?;
        }
        Commands::Ask { question } => {
            let pipeline = Pipeline::from_config(&cfg).await?;
            print_json(&pipeline.ask(&question).await?)?;
        }
        Commands::Research { question } => {
            let pipeline = Pipeline::from_config(&cfg).await?;
            print_json(&pipeline.research(&question).await?)?;
        }
        Commands::Gap {
            description,
            resolution,
            category,
            ticket_id,
        } => {
            let pipeline = Pipeline::from_config(&cfg).await?;
            let ticket = GapTicket {
                ticket_id,
                description,
                resolution,
                category,
            };
            print_json(&pipeline.evaluate_gap(ticket).await?)?;
        }
        Commands::Draft {
            description,
            resolution,
            category,
            ticket_id,
            module,
            root_cause,
            transcript,
            script_title,
            script_id,
            suggested_title,
        } => {
            let transcript = match transcript {
                Some(path) => Some(std::fs::read_to_string(&path).with_context(|| {
                    format!("Failed to read transcript: {}", path.display())
                })?),
                None => None,
            };
            let pipeline = Pipeline::from_config(&cfg).await?;
            let request = DraftRequest {
                ticket_id,
                description,
                resolution,
                category,
                module,
                root_cause,
                transcript,
                script_title,
                script_id,
                suggested_title,
            };
            print_json(&pipeline.draft_kb(request).await?)?;
        }
        Commands::Eval { path, limit } => {
            let report = eval::run_eval(&cfg, &path, limit).await?;
            print_json(&report)?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
