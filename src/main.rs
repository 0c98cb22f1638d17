//! # Health RAG CLI (`hrag`)
//!
//! ## Usage
//!
//! ```bash
//! hrag --config ./config/hrag.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `hrag index` | Build the index from the corpus and print statistics |
//! | `hrag search "<query>"` | Fused retrieval only, no generation |
//! | `hrag ask "<query>"` | Answer one question |
//! | `hrag chat` | Interactive conversation with session memory |
//! | `hrag history --user <id>` | List or show archived chats |
//! | `hrag eval <dataset.json>` | Answer and grade an evaluation dataset |
//! | `hrag serve` | Start the HTTP API |
//!
//! ## Examples
//!
//! ```bash
//! hrag search "당뇨병 식단" --top-k 3
//! hrag ask "고혈압에 좋은 음식은?" --show-context
//! hrag eval ./eval/dataset.json --criteria correctness,groundedness --out ./eval/report.json
//! RUST_LOG=debug hrag serve
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use health_rag::{chat, config, context::AppContext, corpus, eval, logging, search, server};

/// Health RAG: grounded health Q&A over crawled articles.
#[derive(Parser)]
#[command(
    name = "hrag",
    about = "Health RAG — grounded health Q&A over crawled articles",
    version,
    long_about = "Answers health questions from a crawled corpus of medical articles: \
    hybrid dense + BM25 retrieval, per-session conversation memory, and a single \
    grounded generation call per turn."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/hrag.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the index from `[corpus].paths` and print statistics.
    Index,

    /// Retrieve fused context for a query without generating an answer.
    Search {
        query: String,

        /// Results per sub-retriever; the fused list holds at most twice this.
        #[arg(long)]
        top_k: Option<usize>,
    },

    /// Answer a single question.
    Ask {
        query: String,

        /// Session id; omit for a history-free answer.
        #[arg(long)]
        session: Option<String>,

        /// Also print the retrieved context.
        #[arg(long)]
        show_context: bool,
    },

    /// Interactive chat on stdin.
    Chat {
        /// Session id; a random one is generated when omitted.
        #[arg(long)]
        session: Option<String>,
    },

    /// Show archived chats from `[sessions].db_path`.
    History {
        #[arg(long)]
        user: String,

        /// Print this archived session instead of the title list.
        #[arg(long)]
        session: Option<i64>,
    },

    /// Run the evaluation harness over a dataset.
    Eval {
        /// JSON array of `{ "input": { "text" }, "reference": { "label" } }`.
        dataset: PathBuf,

        /// Criteria to grade (comma-separated or repeated). Defaults to all.
        #[arg(long, value_delimiter = ',')]
        criteria: Vec<String>,

        /// Write the full JSON report here.
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Start the HTTP API on `[server].bind`.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init();

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Index => {
            corpus::run_index(&cfg).await?;
        }
        Commands::Search { query, top_k } => {
            search::run_search(&cfg, &query, top_k).await?;
        }
        Commands::Ask {
            query,
            session,
            show_context,
        } => {
            chat::run_ask(cfg, &query, session, show_context).await?;
        }
        Commands::Chat { session } => {
            chat::run_chat(cfg, session).await?;
        }
        Commands::History { user, session } => {
            chat::run_history(&cfg, &user, session).await?;
        }
        Commands::Eval {
            dataset,
            criteria,
            out,
        } => {
            eval::run_eval(cfg, &dataset, &criteria, out.as_deref()).await?;
        }
        Commands::Serve => {
            let ctx = AppContext::build(cfg).await?;
            server::run_server(Arc::new(ctx)).await?;
        }
    }

    Ok(())
}
