//! # Lore CLI (`lore`)
//!
//! The `lore` binary is the primary interface for the retrieval engine. It
//! provides commands for database initialization, indexing, search,
//! collection management, and starting the MCP server.
//!
//! ## Usage
//!
//! ```bash
//! lore --config ./lore.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `lore init` | Create the SQLite database and run schema migrations |
//! | `lore index <collection> <paths...>` | Scan and index files into a collection |
//! | `lore search "<query>"` | Hybrid search across indexed collections |
//! | `lore collections list` | List collections with counts |
//! | `lore collections info <name>` | Detailed collection statistics |
//! | `lore collections delete <name>` | Delete a collection and its contents |
//! | `lore status` | Database and embedding model status |
//! | `lore serve` | Start the MCP-compatible HTTP server |

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use lore::chunker::ChunkParams;
use lore::config::{load_config, Config};
use lore::embedding::HttpEmbedder;
use lore::indexer::Indexer;
use lore::models::{CollectionKind, SearchFilters};
use lore::scan;
use lore::search::{search, SearchRequest};
use lore::server;
use lore::store::Store;

/// Lore — a local-first hybrid retrieval engine for personal knowledge.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `lore.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "lore",
    about = "Lore — local-first hybrid search over notes, documents, and messages",
    version,
    long_about = "Lore indexes notes, documents, and message archives into SQLite, \
    chunks and embeds them via a local embedding service, and answers queries by \
    fusing semantic and keyword retrieval. Exposed as a CLI and an MCP-compatible \
    HTTP server."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./lore.toml")]
    config: PathBuf,

    /// Enable debug logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables. Idempotent;
    /// running it multiple times is safe.
    Init,

    /// Scan paths and index supported files into a collection.
    ///
    /// Unchanged files (same content fingerprint) are skipped without
    /// touching the embedding service. The collection is created on first
    /// use.
    Index {
        /// Target collection name.
        collection: String,

        /// Files or directories to scan.
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Re-index everything, ignoring stored fingerprints.
        #[arg(long)]
        force: bool,
    },

    /// Hybrid search across indexed collections.
    ///
    /// Runs semantic and keyword retrieval concurrently and fuses the two
    /// rankings. Falls back to keyword-only when the embedding service is
    /// unreachable.
    Search {
        /// The search query string.
        query: String,

        /// Restrict results to one collection.
        #[arg(long)]
        collection: Option<String>,

        /// Maximum number of results.
        #[arg(long)]
        top_k: Option<usize>,

        /// Restrict results to one source type (e.g. `markdown`, `email`).
        #[arg(long)]
        source_type: Option<String>,

        /// Only results dated on or after this date (YYYY-MM-DD).
        #[arg(long)]
        date_from: Option<String>,

        /// Only results dated on or before this date (YYYY-MM-DD).
        #[arg(long)]
        date_to: Option<String>,

        /// Substring match on the sender metadata field.
        #[arg(long)]
        sender: Option<String>,

        /// Substring match on the authors metadata field.
        #[arg(long)]
        author: Option<String>,
    },

    /// Manage collections.
    Collections {
        #[command(subcommand)]
        action: CollectionAction,
    },

    /// Show database and embedding model status.
    Status,

    /// Start the MCP-compatible HTTP server.
    Serve,
}

#[derive(Subcommand)]
enum CollectionAction {
    /// List collections with source and chunk counts.
    List,

    /// Detailed statistics for one collection.
    Info {
        /// Collection name.
        name: String,
    },

    /// Delete a collection and everything indexed into it.
    Delete {
        /// Collection name.
        name: String,

        /// Skip the confirmation requirement.
        #[arg(long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let cfg = load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let store = Store::open(&cfg).await?;
            let version = store.schema_version().await?;
            println!(
                "Database initialized at {} (schema v{version}).",
                cfg.db.path.display()
            );
        }
        Commands::Index {
            collection,
            paths,
            force,
        } => {
            run_index(&cfg, &collection, &paths, force).await?;
        }
        Commands::Search {
            query,
            collection,
            top_k,
            source_type,
            date_from,
            date_to,
            sender,
            author,
        } => {
            let filters = SearchFilters {
                collection,
                source_type,
                date_from,
                date_to,
                sender,
                author,
            };
            run_search(&cfg, &query, top_k, filters).await?;
        }
        Commands::Collections { action } => match action {
            CollectionAction::List => run_collections_list(&cfg).await?,
            CollectionAction::Info { name } => run_collection_info(&cfg, &name).await?,
            CollectionAction::Delete { name, yes } => {
                run_collection_delete(&cfg, &name, yes).await?
            }
        },
        Commands::Status => {
            run_status(&cfg).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let default = if verbose { "lore=debug" } else { "lore=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

async fn run_index(
    cfg: &Config,
    collection: &str,
    paths: &[PathBuf],
    force: bool,
) -> anyhow::Result<()> {
    let store = Store::open(cfg).await?;
    let embedder = HttpEmbedder::new(&cfg.embedding)?;

    let outcome = scan::scan_paths(paths, &cfg.scan).await?;
    println!(
        "Scanned {} files ({} failed to read or parse).",
        outcome.records.len() + outcome.failures.len(),
        outcome.failures.len()
    );

    let collection_id = store
        .get_or_create_collection(collection, CollectionKind::Project, None)
        .await?;

    let params = ChunkParams::new(cfg.chunking.chunk_tokens, cfg.chunking.overlap_tokens)?;
    let indexer = Indexer::new(&store, &embedder, cfg.embedding.batch_size, params);
    let mut summary = indexer
        .index_records(collection_id, &outcome.records, force)
        .await?;
    summary.failed += outcome.failures.len() as u64;

    println!("{collection}: {summary}");
    Ok(())
}

async fn run_search(
    cfg: &Config,
    query: &str,
    top_k: Option<usize>,
    filters: SearchFilters,
) -> anyhow::Result<()> {
    let store = Store::open(cfg).await?;
    let embedder = HttpEmbedder::new(&cfg.embedding)?;

    let request = SearchRequest {
        query: query.to_string(),
        top_k: top_k.unwrap_or(cfg.search.top_k),
        filters,
    };
    let response = search(&store, &embedder, &cfg.search, &request).await?;

    if response.degraded {
        println!("(embedding service unavailable — keyword results only)\n");
    }
    if response.results.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, result) in response.results.iter().enumerate() {
        println!(
            "{:2}. [{:.4}] {} — {} ({})",
            i + 1,
            result.score,
            result.title,
            result.source_locator,
            result.collection,
        );
        println!("    {}", snippet(&result.content, 200));
    }
    Ok(())
}

fn snippet(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        return flat;
    }
    let cut: String = flat.chars().take(max_chars).collect();
    format!("{cut}…")
}

async fn run_collections_list(cfg: &Config) -> anyhow::Result<()> {
    let store = Store::open(cfg).await?;
    let collections = store.list_collections().await?;

    if collections.is_empty() {
        println!("No collections. Run `lore index <collection> <paths...>` first.");
        return Ok(());
    }

    println!(
        "{:<20} {:<8} {:>8} {:>8}  {}",
        "NAME", "KIND", "SOURCES", "CHUNKS", "LAST INDEXED"
    );
    for c in collections {
        println!(
            "{:<20} {:<8} {:>8} {:>8}  {}",
            c.collection.name,
            c.collection.kind.as_str(),
            c.source_count,
            c.chunk_count,
            c.last_indexed_at.as_deref().unwrap_or("-"),
        );
    }
    Ok(())
}

async fn run_collection_info(cfg: &Config, name: &str) -> anyhow::Result<()> {
    let store = Store::open(cfg).await?;
    let Some(info) = store.collection_info(name).await? else {
        anyhow::bail!("no collection named: {name}");
    };

    println!("Collection: {}", info.collection.name);
    println!("  kind:         {}", info.collection.kind.as_str());
    if let Some(description) = &info.collection.description {
        println!("  description:  {description}");
    }
    println!("  sources:      {}", info.source_count);
    println!("  chunks:       {}", info.chunk_count);
    println!("  embeddings:   {}", info.embedding_count);
    println!(
        "  last indexed: {}",
        info.last_indexed_at.as_deref().unwrap_or("-")
    );
    if !info.source_types.is_empty() {
        println!("  source types:");
        for (source_type, count) in &info.source_types {
            println!("    {source_type}: {count}");
        }
    }
    Ok(())
}

async fn run_collection_delete(cfg: &Config, name: &str, yes: bool) -> anyhow::Result<()> {
    if !yes {
        anyhow::bail!(
            "deleting '{name}' removes all its indexed content; re-run with --yes to confirm"
        );
    }

    let store = Store::open(cfg).await?;
    if store.delete_collection(name).await? {
        println!("Deleted collection '{name}'.");
    } else {
        println!("No collection named '{name}'.");
    }
    Ok(())
}

async fn run_status(cfg: &Config) -> anyhow::Result<()> {
    let store = Store::open(cfg).await?;
    let version = store.schema_version().await?;
    let (collections, sources, chunks, embeddings) = store.counts().await?;

    println!("Database:  {} (schema v{version})", cfg.db.path.display());
    println!(
        "Embedding: {} ({} dims) via {}",
        cfg.embedding.model, cfg.embedding.dims, cfg.embedding.endpoint
    );
    println!("Collections: {collections}");
    println!("Sources:     {sources}");
    println!("Chunks:      {chunks}");
    println!("Embeddings:  {embeddings}");
    Ok(())
}
