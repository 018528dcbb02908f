use crate::error::{IndexError, Result};
use crate::handle::IndexHandle;
use crate::index::{DocId, InputDoc};
use crate::persist::IndexStore;
use serde::Serialize;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Cooperative cancellation flag checked between records.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self { Self::default() }
    pub fn cancel(&self) { self.0.store(true, Ordering::SeqCst); }
    pub fn is_cancelled(&self) -> bool { self.0.load(Ordering::SeqCst) }
}

/// A record that could not be indexed. Reported, never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedRecord {
    /// Zero-based offset of the record in the input sequence.
    pub position: usize,
    pub locator: String,
    pub reason: String,
}

#[derive(Debug, Default, Serialize)]
pub struct IngestReport {
    pub indexed: Vec<DocId>,
    pub skipped: Vec<SkippedRecord>,
    pub flushes: usize,
    pub cancelled: bool,
}

/// A flush failed part way through a batch. `report` covers everything done
/// up to the failure; those documents remain in the in-memory index.
#[derive(Debug, Error)]
#[error("ingestion stopped after indexing {} documents: {source}", .report.indexed.len())]
pub struct IngestError {
    pub report: IngestReport,
    #[source]
    pub source: IndexError,
}

impl From<IngestError> for IndexError {
    fn from(err: IngestError) -> Self { err.source }
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Flush after this many newly indexed documents.
    pub flush_every: Option<NonZeroUsize>,
    /// Flush once more when the batch ends (or is cancelled) with unflushed documents.
    pub flush_at_end: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self { flush_every: None, flush_at_end: true }
    }
}

/// Feeds records into an index one at a time, persisting as it goes.
pub struct IndexingPipeline<'a> {
    index: &'a IndexHandle,
    store: Option<&'a IndexStore>,
    options: PipelineOptions,
    cancel: CancelToken,
}

impl<'a> IndexingPipeline<'a> {
    pub fn new(index: &'a IndexHandle) -> Self {
        Self { index, store: None, options: PipelineOptions::default(), cancel: CancelToken::default() }
    }

    pub fn with_store(mut self, store: &'a IndexStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_options(mut self, options: PipelineOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Index `records` in order. Records the index rejects are skipped with a
    /// warning. A flush failure aborts the batch and hands back the report so
    /// far; documents indexed before the failure stay in memory.
    pub fn ingest<I>(&self, records: I) -> std::result::Result<IngestReport, IngestError>
    where
        I: IntoIterator<Item = InputDoc>,
    {
        let mut report = IngestReport::default();
        let mut unflushed = 0usize;

        for (position, record) in records.into_iter().enumerate() {
            if self.cancel.is_cancelled() {
                tracing::info!(position, "ingestion cancelled");
                report.cancelled = true;
                break;
            }
            let locator = record.locator.clone();
            match self.index.add_document(record) {
                Ok(doc_id) => {
                    report.indexed.push(doc_id);
                    unflushed += 1;
                }
                Err(e) => {
                    tracing::warn!(position, locator = %locator, error = %e, "skipping record");
                    report.skipped.push(SkippedRecord { position, locator, reason: e.to_string() });
                    continue;
                }
            }
            if let Some(every) = self.options.flush_every {
                if unflushed >= every.get() {
                    match self.flush(&mut report) {
                        Ok(true) => unflushed = 0,
                        Ok(false) => {}
                        Err(source) => return Err(Self::abort(report, source)),
                    }
                }
            }
        }

        if self.options.flush_at_end && unflushed > 0 {
            if let Err(source) = self.flush(&mut report) {
                return Err(Self::abort(report, source));
            }
        }
        tracing::info!(
            indexed = report.indexed.len(),
            skipped = report.skipped.len(),
            flushes = report.flushes,
            cancelled = report.cancelled,
            "ingestion finished"
        );
        Ok(report)
    }

    fn abort(report: IngestReport, source: IndexError) -> IngestError {
        tracing::error!(indexed = report.indexed.len(), flushes = report.flushes, error = %source, "flush failed, stopping ingestion");
        IngestError { report, source }
    }

    fn flush(&self, report: &mut IngestReport) -> Result<bool> {
        let Some(store) = self.store else { return Ok(false) };
        self.index.flush(store)?;
        report.flushes += 1;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::IndexSettings;

    fn records(n: usize) -> Vec<InputDoc> {
        (0..n).map(|i| InputDoc::new(format!("issue {i}"), "body", format!("https://example.com/{i}"))).collect()
    }

    #[test]
    fn bad_records_are_skipped_not_fatal() {
        let handle = IndexHandle::new(crate::InvertedIndex::with_settings(IndexSettings {
            max_tokens_per_document: 4,
            ..IndexSettings::default()
        }));
        let input = vec![
            InputDoc::new("ok", "one", "a"),
            InputDoc::new("no locator", "", ""),
            InputDoc::new("far too many", "tokens for the limit", "b"),
            InputDoc::new("ok", "two", "c"),
        ];
        let report = IndexingPipeline::new(&handle).ingest(input).unwrap();
        assert_eq!(report.indexed, vec![0, 1]);
        let positions: Vec<usize> = report.skipped.iter().map(|s| s.position).collect();
        assert_eq!(positions, vec![1, 2]);
        assert_eq!(report.skipped[1].locator, "b");
        assert_eq!(report.flushes, 0);
        assert_eq!(handle.stats().total_documents, 2);
    }

    #[test]
    fn cancelled_before_start_indexes_nothing() {
        let handle = IndexHandle::default();
        let cancel = CancelToken::new();
        cancel.cancel();
        let report = IndexingPipeline::new(&handle).with_cancel_token(cancel).ingest(records(3)).unwrap();
        assert!(report.cancelled);
        assert!(report.indexed.is_empty());
    }

    #[test]
    fn cancel_mid_batch_keeps_earlier_documents() {
        let handle = IndexHandle::default();
        let cancel = CancelToken::new();
        let trigger = cancel.clone();
        let input = records(5).into_iter().enumerate().map(move |(i, r)| {
            if i == 2 { trigger.cancel(); }
            r
        });
        let report = IndexingPipeline::new(&handle).with_cancel_token(cancel).ingest(input).unwrap();
        assert!(report.cancelled);
        // The flag flips while record 2 is produced, so the checkpoint stops before indexing it.
        assert_eq!(report.indexed, vec![0, 1]);
        assert_eq!(handle.stats().total_documents, 2);
    }

    #[test]
    fn failed_flush_returns_the_partial_report() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"not a directory").unwrap();
        let store = IndexStore::new(blocker.join("index.idx"));
        let handle = IndexHandle::default();
        let mut input = records(3);
        input.insert(1, InputDoc::new("skipped", "", ""));
        let options = PipelineOptions { flush_every: NonZeroUsize::new(2), flush_at_end: true };

        let err = IndexingPipeline::new(&handle)
            .with_store(&store)
            .with_options(options)
            .ingest(input)
            .unwrap_err();
        assert_eq!(err.report.indexed, vec![0, 1]);
        assert_eq!(err.report.skipped.len(), 1);
        assert_eq!(err.report.flushes, 0);
        assert!(matches!(err.source, IndexError::Io { .. }));
        assert_eq!(handle.stats().total_documents, 2);
        assert!(matches!(IndexError::from(err), IndexError::Io { .. }));
    }
}
