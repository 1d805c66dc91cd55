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
//! | `ragline upload <file>` | Register a local file in the document store |
//! | `ragline index init` | Create the k-NN index if it does not exist |
//! | `ragline ingest <id>` | Extract, chunk, embed and index a document |
//! | `ragline query "<question>"` | Answer a question from the indexed documents |
//! | `ragline status <id>` | Show a document's processing status |
//! | `ragline delete <id>` | Remove a document's chunks from the index |

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use ragline::{app, config, logging};

/// ragline: retrieval-augmented question answering over uploaded documents.
#[derive(Parser)]
#[command(name = "ragline", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/ragline.toml")]
    config: PathBuf,

    /// Log debug output to stderr.
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a local file as a new document.
    ///
    /// The media type is detected from the file extension. Prints the id
    /// to pass to `ingest`.
    Upload {
        /// Path to the file.
        path: PathBuf,
    },

    /// Manage the vector index.
    Index {
        #[command(subcommand)]
        action: IndexAction,
    },

    /// Run the ingestion pipeline for an uploaded document.
    Ingest {
        /// Document id returned by `upload`.
        id: String,
    },

    /// Ask a question.
    Query {
        /// The question.
        question: String,

        /// Number of chunks to retrieve. Values <= 0 use the configured default;
        /// larger values are capped at `[query] max_k`.
        #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
        k: i64,
    },

    /// Show the processing status of a document.
    Status {
        /// Document id.
        id: String,
    },

    /// Remove every indexed chunk of a document.
    Delete {
        /// Document id.
        id: String,
    },
}

#[derive(Subcommand)]
enum IndexAction {
    /// Create the index with the configured dimension and metric.
    ///
    /// Idempotent. Fails if an existing index has a different dimension.
    Init,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose)?;

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Upload { path } => app::run_upload(&cfg, &path).await?,
        Commands::Index { action } => match action {
            IndexAction::Init => app::run_index_init(&cfg).await?,
        },
        Commands::Ingest { id } => app::run_ingest(&cfg, &id).await?,
        Commands::Query { question, k } => app::run_query(&cfg, &question, k).await?,
        Commands::Status { id } => app::run_status(&cfg, &id).await?,
        Commands::Delete { id } => app::run_delete(&cfg, &id).await?,
    }

    Ok(())
}
