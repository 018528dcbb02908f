use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::{fmt, EnvFilter};
use zapindex::{
    DocId, IdfMode, IndexHandle, IndexSettings, IndexStore, IndexingPipeline, PipelineOptions, TokenizerSettings,
};
use zapindex_cli::load_records;

#[derive(Parser)]
#[command(name = "zapindex")]
#[command(about = "Build and query a full-text index of scraped issues and pull requests", long_about = None)]
struct Cli {
    /// Index file
    #[arg(long, global = true, env = "ZAP_INDEX", default_value = "./index/zapindex.idx")]
    index: PathBuf,
    /// Give up on a disk read or write after this many milliseconds
    #[arg(long, global = true, env = "ZAP_TIMEOUT_MS")]
    timeout_ms: Option<u64>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Add records from JSON/JSONL files (or a directory of them) to the index
    Build {
        /// Input path (file or directory)
        #[arg(long)]
        input: PathBuf,
        /// Flush to disk after this many documents, in addition to the final flush
        #[arg(long, env = "ZAP_FLUSH_EVERY")]
        flush_every: Option<NonZeroUsize>,
        /// Drop English stop words (only applies when creating a new index)
        #[arg(long, default_value_t = false)]
        stopwords: bool,
        /// Stem terms with the English Snowball stemmer (only applies when creating a new index)
        #[arg(long, default_value_t = false)]
        stem: bool,
        /// Weight of a title occurrence relative to a body occurrence
        #[arg(long, default_value_t = 2.0)]
        title_boost: f32,
        /// Use IDF = ln(N/(1+df)) instead of the smoothed ln(1 + N/(1+df))
        #[arg(long, default_value_t = false)]
        raw_idf: bool,
        /// Reject documents with more tokens than this
        #[arg(long, default_value_t = 1 << 20)]
        max_tokens: usize,
    },
    /// Run a query with +required/-excluded terms and AND/OR/NOT operators.
    /// Quote words to search for them as a phrase.
    Search {
        query: String,
        /// Number of results
        #[arg(short, long, default_value_t = 10)]
        k: usize,
        /// Print results as JSON
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Tombstone documents by id
    Delete { doc_ids: Vec<DocId> },
    /// Drop postings of deleted documents
    Compact,
    /// Print index statistics as JSON
    Stats,
}

fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let cli = Cli::parse();

    let mut store = IndexStore::new(&cli.index);
    if let Some(ms) = cli.timeout_ms {
        store = store.with_timeout(Duration::from_millis(ms));
    }

    match cli.command {
        Commands::Build { input, flush_every, stopwords, stem, title_boost, raw_idf, max_tokens } => {
            let settings = IndexSettings {
                tokenizer: TokenizerSettings { stopwords, stem },
                title_boost,
                idf: if raw_idf { IdfMode::Raw } else { IdfMode::Smoothed },
                max_tokens_per_document: max_tokens,
            };
            build(&store, settings, &input, flush_every)
        }
        Commands::Search { query, k, json } => search(&store, &query, k, json),
        Commands::Delete { doc_ids } => delete(&store, &doc_ids),
        Commands::Compact => {
            let index = open_existing(&store)?;
            let reclaimed = index.compact();
            index.flush(&store).context("flushing compacted index")?;
            tracing::info!(reclaimed, "compaction complete");
            Ok(())
        }
        Commands::Stats => {
            let index = open_existing(&store)?;
            println!("{}", serde_json::to_string_pretty(&index.stats())?);
            Ok(())
        }
    }
}

fn open_existing(store: &IndexStore) -> Result<IndexHandle> {
    anyhow::ensure!(store.exists(), "no index at {}", store.path().display());
    IndexHandle::open(store, IndexSettings::default())
        .with_context(|| format!("opening index {}", store.path().display()))
}

fn build(store: &IndexStore, settings: IndexSettings, input: &Path, flush_every: Option<NonZeroUsize>) -> Result<()> {
    let index = IndexHandle::open(store, settings).with_context(|| format!("opening index {}", store.path().display()))?;
    let loaded = load_records(input)?;
    tracing::info!(records = loaded.records.len(), malformed = loaded.malformed, "loaded input");

    let options = PipelineOptions { flush_every, flush_at_end: true };
    let report = IndexingPipeline::new(&index)
        .with_store(store)
        .with_options(options)
        .ingest(loaded.records)
        .context("indexing records")?;
    tracing::info!(
        indexed = report.indexed.len(),
        skipped = report.skipped.len(),
        total_documents = index.stats().total_documents,
        output = %store.path().display(),
        "index build complete"
    );
    Ok(())
}

fn search(store: &IndexStore, query: &str, k: usize, json: bool) -> Result<()> {
    let index = open_existing(store)?;
    let hits = index.search(query, k)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&hits)?);
        return Ok(());
    }
    if hits.is_empty() {
        println!("No results for {query:?}");
    }
    for hit in hits {
        println!("[{}] {:.4}  Title: {}, URL: {}", hit.doc_id, hit.score, hit.title, hit.locator);
    }
    Ok(())
}

fn delete(store: &IndexStore, doc_ids: &[DocId]) -> Result<()> {
    let index = open_existing(store)?;
    for &doc_id in doc_ids {
        if index.remove_document(doc_id)? {
            tracing::info!(doc_id, "deleted document");
        } else {
            tracing::warn!(doc_id, "document was already deleted");
        }
    }
    index.flush(store).context("flushing index")?;
    Ok(())
}
