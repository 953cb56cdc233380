//! # docqa CLI
//!
//! The `docqa` binary drives the engine end to end: database setup, document
//! ingestion, semantic search, and grounded question answering.
//!
//! ## Usage
//!
//! ```bash
//! docqa --config ./docqa.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docqa init` | Create the SQLite database and run schema migrations |
//! | `docqa ingest <paths> --user <id>` | Register documents and run the ingestion pool until done |
//! | `docqa documents --user <id>` | List a user's documents and their processing status |
//! | `docqa search "<query>" --user <id>` | Rank the user's chunks against a query |
//! | `docqa ask "<query>" --user <id>` | Answer a question from the user's documents, with citations |
//!
//! The Gemini API key is read from the `GEMINI_API_KEY` environment
//! variable; log verbosity from `RUST_LOG` (default `info`).

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use docqa::chat;
use docqa::config::{self, Config};
use docqa::db;
use docqa::embedding::{self, EmbeddingClient};
use docqa::llm;
use docqa::migrate;
use docqa::models::Document;
use docqa::queue::{IngestJob, JobQueue, MemoryQueue};
use docqa::search;
use docqa::store::{SqliteStore, Store};
use docqa::worker;

/// docqa: ask questions of your own documents.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file with `[db]`, `[chunking]`, `[embedding]`, `[llm]`, `[retrieval]`,
/// and `[worker]` sections.
#[derive(Parser)]
#[command(
    name = "docqa",
    about = "A document ingestion and retrieval-augmented question answering engine",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./docqa.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and the `documents` and
    /// `document_chunks` tables. Idempotent.
    Init,

    /// Register one or more files and ingest them.
    ///
    /// Each file becomes a document in `processing` state, an ingestion job
    /// is enqueued, and the worker pool runs until every job reaches a
    /// terminal outcome. The final status of each document is printed.
    Ingest {
        /// Files to ingest. `.pdf` and `.docx` get format-aware extraction;
        /// anything else is read as plain text.
        paths: Vec<PathBuf>,

        /// Owning user identifier.
        #[arg(long)]
        user: String,
    },

    /// List a user's documents and their processing status.
    Documents {
        /// Owning user identifier.
        #[arg(long)]
        user: String,
    },

    /// Rank the user's chunks against a query.
    Search {
        /// The search query string.
        query: String,

        /// Owning user identifier.
        #[arg(long)]
        user: String,

        /// Restrict the search to one document.
        #[arg(long)]
        document: Option<String>,

        /// Number of results (capped by retrieval.max_top_k).
        #[arg(long)]
        top_k: Option<usize>,
    },

    /// Answer a question from the user's documents, with citations.
    Ask {
        /// The question.
        query: String,

        /// Owning user identifier.
        #[arg(long)]
        user: String,

        /// Restrict retrieval to one document.
        #[arg(long)]
        document: Option<String>,

        /// Number of chunks retrieved for grounding (capped by
        /// retrieval.max_top_k).
        #[arg(long)]
        top_k: Option<usize>,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn effective_top_k(requested: Option<usize>, cfg: &Config) -> usize {
    requested
        .unwrap_or(cfg.retrieval.top_k)
        .clamp(1, cfg.retrieval.max_top_k)
}

fn build_embedder(cfg: &Config) -> anyhow::Result<Arc<EmbeddingClient>> {
    let provider = embedding::create_provider(&cfg.embedding)?;
    Ok(Arc::new(EmbeddingClient::new(provider, &cfg.embedding)))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }

        Commands::Ingest { paths, user } => {
            if paths.is_empty() {
                anyhow::bail!("no files given");
            }

            let pool = db::connect(&cfg).await?;
            let store: Arc<dyn Store> = Arc::new(SqliteStore::new(pool.clone()));
            let embedder = build_embedder(&cfg)?;
            let queue = Arc::new(MemoryQueue::new(cfg.worker.max_attempts));

            let mut ids = Vec::new();
            for path in &paths {
                let absolute = std::fs::canonicalize(path)
                    .map_err(|e| anyhow::anyhow!("cannot read {}: {}", path.display(), e))?;
                let filename = absolute
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_else(|| absolute.display().to_string());

                let doc = Document::new(&user, &filename, &absolute.to_string_lossy());
                store.insert_document(&doc).await?;
                queue.enqueue(IngestJob::new(&doc.id)).await?;
                println!("queued {} as {}", filename, doc.id);
                ids.push(doc.id);
            }

            queue.close();
            worker::run_pool(
                queue,
                Arc::clone(&store),
                embedder,
                cfg.chunking.clone(),
                &cfg.worker,
            )
            .await?;

            for id in &ids {
                if let Some(doc) = store.get_document(id).await? {
                    match doc.error_message {
                        Some(err) => println!("{}  {}  ({})", doc.status, doc.filename, err),
                        None => println!(
                            "{}  {}  ({} chunks)",
                            doc.status,
                            doc.filename,
                            doc.num_chunks.unwrap_or(0)
                        ),
                    }
                }
            }
            pool.close().await;
        }

        Commands::Documents { user } => {
            let pool = db::connect(&cfg).await?;
            let store = SqliteStore::new(pool.clone());

            let docs = store.list_documents(&user).await?;
            if docs.is_empty() {
                println!("No documents.");
            }
            for doc in docs {
                println!("{}  {}  {}", doc.id, doc.status, doc.filename);
                println!("    uploaded: {}", doc.uploaded_at.format("%Y-%m-%d %H:%M"));
                if let Some(ready_at) = doc.ready_at {
                    println!(
                        "    ready: {} ({} chunks)",
                        ready_at.format("%Y-%m-%d %H:%M"),
                        doc.num_chunks.unwrap_or(0)
                    );
                }
                if let Some(err) = doc.error_message {
                    println!("    error: {}", err);
                }
            }
            pool.close().await;
        }

        Commands::Search {
            query,
            user,
            document,
            top_k,
        } => {
            let pool = db::connect(&cfg).await?;
            let store = SqliteStore::new(pool.clone());
            let embedder = build_embedder(&cfg)?;

            let results = search::semantic_search(
                &store,
                &embedder,
                &user,
                &query,
                document.as_deref(),
                effective_top_k(top_k, &cfg),
            )
            .await?;

            if results.is_empty() {
                println!("No results.");
            }
            for (i, result) in results.iter().enumerate() {
                let excerpt: String = result.content.chars().take(240).collect();
                println!("{}. [{:.3}] {}", i + 1, result.score, result.chunk_id);
                println!("    document: {}", result.document_id);
                println!("    excerpt: \"{}\"", excerpt.replace('\n', " "));
                println!();
            }
            pool.close().await;
        }

        Commands::Ask {
            query,
            user,
            document,
            top_k,
        } => {
            let pool = db::connect(&cfg).await?;
            let store = SqliteStore::new(pool.clone());
            let embedder = build_embedder(&cfg)?;
            let model = llm::create_model(&cfg.llm)?;

            let response = chat::answer(
                &store,
                &embedder,
                model.as_ref(),
                &user,
                &query,
                document.as_deref(),
                effective_top_k(top_k, &cfg),
            )
            .await?;

            println!("{}", response.answer);
            if !response.sources.is_empty() {
                println!();
                for source in &response.sources {
                    println!("source {}  relevance {:.3}", source.chunk_id, source.relevance);
                }
            }
            pool.close().await;
        }
    }

    Ok(())
}
