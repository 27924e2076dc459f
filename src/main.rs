//! # ragline CLI
//!
//! ## Usage
//!
//! ```bash
//! ragline --config ./config/ragline.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ragline init` | Create the SQLite database and schema |
//! | `ragline ingest <project> <file>` | Submit a file and index it |
//! | `ragline process <id>` | Index a `pending` document |
//! | `ragline reprocess <id>` | Re-index a completed or failed document |
//! | `ragline requeue-stalled <project>` | Reset documents stuck in `processing` |
//! | `ragline search <project> "<query>"` | Semantic search |
//! | `ragline ask <project> "<question>"` | Grounded answer with sources |
//! | `ragline documents <project>` | List documents |
//! | `ragline show <id>` | Document details |
//! | `ragline delete <id>` | Soft-delete a document |
//! | `ragline history <conversation>` | Messages of a conversation |
//! | `ragline usage <project>` | Monthly usage against plan limits |

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use ragline::{config, documents, ingest_cmd, logging, migrate, query, usage_cmd};
use ragline_core::metering::ModelTier;
use ragline_core::models::DocumentStatus;

/// Retrieval-augmented chat over project documents.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. A missing file means built-in defaults plus `RAGLINE_*` overrides.
#[derive(Parser)]
#[command(name = "ragline", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/ragline.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Submit a text file to a project and index it.
    Ingest {
        project: String,
        file: PathBuf,

        /// Document title. Defaults to the file name.
        #[arg(long)]
        title: Option<String>,

        /// Source URL shown alongside search results.
        #[arg(long)]
        url: Option<String>,
    },

    /// Index a document that is `pending`.
    Process { id: String },

    /// Reset a completed or failed document and index it again.
    Reprocess { id: String },

    /// Move documents stuck in `processing` back to `pending`.
    RequeueStalled {
        project: String,

        /// Only documents untouched for at least this many minutes.
        #[arg(long, default_value_t = 30)]
        older_than_mins: i64,
    },

    /// Semantic search over a project's completed documents.
    Search { project: String, query: String },

    /// Ask a question answered from the project's documents.
    Ask {
        project: String,
        query: String,

        /// Model tier: `mini` or `premium`.
        #[arg(long, default_value = "mini")]
        tier: ModelTier,

        /// Continue an existing conversation.
        #[arg(long)]
        conversation: Option<String>,

        /// Print the full response as JSON.
        #[arg(long)]
        json: bool,
    },

    /// List documents of a project.
    Documents {
        project: String,

        /// Filter by status: pending, processing, completed, failed.
        #[arg(long)]
        status: Option<DocumentStatus>,
    },

    /// Show a document with its chunk and embedding counts.
    Show { id: String },

    /// Soft-delete a document.
    Delete { id: String },

    /// Print the messages of a conversation.
    History { conversation: String },

    /// Show this month's usage for a project.
    Usage {
        project: String,

        /// User to report on. Defaults to `[usage].user_id`.
        #[arg(long)]
        user: Option<String>,

        /// Month as YYYY-MM. Defaults to the current month.
        #[arg(long)]
        month: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();
    let cli = Cli::parse();
    let cfg = config::load_config_or_default(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest {
            project,
            file,
            title,
            url,
        } => {
            ingest_cmd::run_ingest(&cfg, &project, &file, title, url).await?;
        }
        Commands::Process { id } => {
            ingest_cmd::run_process(&cfg, &id).await?;
        }
        Commands::Reprocess { id } => {
            ingest_cmd::run_reprocess(&cfg, &id).await?;
        }
        Commands::RequeueStalled {
            project,
            older_than_mins,
        } => {
            ingest_cmd::run_requeue_stalled(&cfg, &project, older_than_mins).await?;
        }
        Commands::Search { project, query } => {
            query::run_search(&cfg, &project, &query).await?;
        }
        Commands::Ask {
            project,
            query,
            tier,
            conversation,
            json,
        } => {
            query::run_ask(&cfg, &project, &query, tier, conversation, json).await?;
        }
        Commands::Documents { project, status } => {
            documents::run_documents(&cfg, &project, status).await?;
        }
        Commands::Show { id } => {
            documents::run_show(&cfg, &id).await?;
        }
        Commands::Delete { id } => {
            documents::run_delete(&cfg, &id).await?;
        }
        Commands::History { conversation } => {
            documents::run_history(&cfg, &conversation).await?;
        }
        Commands::Usage {
            project,
            user,
            month,
        } => {
            usage_cmd::run_usage(&cfg, user, &project, month).await?;
        }
    }

    Ok(())
}
