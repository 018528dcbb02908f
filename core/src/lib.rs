//! Full-text inverted index with TF-IDF ranking, tombstone deletion and
//! crash-safe persistence.
//!
//! ```no_run
//! use zapindex::{IndexHandle, IndexSettings, IndexStore, IndexingPipeline, InputDoc};
//!
//! # fn main() -> zapindex::Result<()> {
//! let store = IndexStore::new("./index/issues.idx");
//! let index = IndexHandle::open(&store, IndexSettings::default())?;
//! IndexingPipeline::new(&index)
//!     .with_store(&store)
//!     .ingest(vec![InputDoc::new("Bug fix", "Fixed a bug in the parser", "https://example.com/1")])?;
//! for hit in index.search("bug", 10)? {
//!     println!("{:.4} {} {}", hit.score, hit.title, hit.locator);
//! }
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod handle;
pub mod index;
pub mod persist;
pub mod pipeline;
pub mod search;
pub mod settings;
pub mod tokenizer;

pub use error::{IndexError, Result};
pub use handle::IndexHandle;
pub use index::{DocId, Document, IndexStats, InputDoc, InvertedIndex, Posting, PostingList, TermId};
pub use persist::IndexStore;
pub use pipeline::{CancelToken, IndexingPipeline, IngestError, IngestReport, PipelineOptions, SkippedRecord};
pub use search::{search, SearchHit};
pub use settings::{IdfMode, IndexSettings, TokenizerSettings};
pub use tokenizer::{tokenize, Tokenizer};
