use crate::error::Result;
use crate::index::{analyze, DocId, Document, IndexStats, InputDoc, InvertedIndex, PostingList};
use crate::persist::{encode_snapshot, IndexStore};
use crate::search::{self, SearchHit};
use crate::settings::IndexSettings;
use parking_lot::RwLock;
use std::sync::Arc;

/// Shared handle to one in-memory index. Clones refer to the same index.
///
/// Writes take the lock exclusively for the duration of a single document
/// update, so readers see each update either entirely or not at all.
/// Tokenization runs before the lock is taken.
#[derive(Debug, Clone, Default)]
pub struct IndexHandle {
    inner: Arc<RwLock<InvertedIndex>>,
}

impl IndexHandle {
    pub fn new(index: InvertedIndex) -> Self {
        Self { inner: Arc::new(RwLock::new(index)) }
    }

    /// Load from `store`, or start empty with `settings` if nothing is persisted yet.
    pub fn open(store: &IndexStore, settings: IndexSettings) -> Result<Self> {
        Ok(Self::new(store.open_or_create(settings)?))
    }

    pub fn add_document(&self, input: InputDoc) -> Result<DocId> {
        // Settings never change after construction, so analyzing against a copy is safe.
        let settings = self.inner.read().settings().clone();
        let analyzed = analyze(&settings, input)?;
        self.inner.write().apply(analyzed)
    }

    pub fn remove_document(&self, doc_id: DocId) -> Result<bool> {
        self.inner.write().remove_document(doc_id)
    }

    pub fn search(&self, query: &str, top_k: usize) -> Result<Vec<SearchHit>> {
        search::search(&self.inner.read(), query, top_k)
    }

    pub fn get_posting_list(&self, term: &str) -> PostingList {
        self.inner.read().get_posting_list(term)
    }

    pub fn document(&self, doc_id: DocId) -> Option<Document> {
        self.inner.read().document(doc_id).cloned()
    }

    pub fn stats(&self) -> IndexStats {
        self.inner.read().stats()
    }

    pub fn compact(&self) -> usize {
        self.inner.write().compact()
    }

    /// Persist a consistent snapshot. Only the encoding step holds a (shared)
    /// lock; the disk write happens with no lock held. The generation is taken
    /// under the same lock so a newer state always carries a newer generation.
    pub fn flush(&self, store: &IndexStore) -> Result<()> {
        let (generation, bytes) = {
            let guard = self.inner.read();
            let generation = store.reserve_generation();
            (generation, encode_snapshot(&guard, store.path())?)
        };
        store.write_snapshot(generation, bytes)
    }

    /// Run `f` against a consistent view of the index.
    pub fn read<R>(&self, f: impl FnOnce(&InvertedIndex) -> R) -> R {
        let guard = self.inner.read();
        f(&guard)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn readers_never_see_partial_updates() {
        let handle = IndexHandle::default();
        let writer = {
            let handle = handle.clone();
            thread::spawn(move || {
                for i in 0..200 {
                    let body = format!("common word{i} common");
                    handle.add_document(InputDoc::new("t", body, format!("loc{i}"))).unwrap();
                    if i % 3 == 0 {
                        handle.remove_document(i).unwrap();
                    }
                }
            })
        };
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let handle = handle.clone();
                thread::spawn(move || {
                    for _ in 0..200 {
                        handle.read(|idx| {
                            let list = idx.get_posting_list("common");
                            assert_eq!(list.document_frequency as usize, list.postings.len());
                            assert_eq!(list.postings.len() as u32, idx.total_documents());
                        });
                        let hits = handle.search("common", 500).unwrap();
                        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
                    }
                })
            })
            .collect();
        writer.join().unwrap();
        for r in readers {
            r.join().unwrap();
        }
        assert_eq!(handle.stats().total_documents, 133);
    }

    #[test]
    fn flushes_race_to_the_latest_state() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(IndexStore::new(dir.path().join("race.idx")));
        let handle = IndexHandle::default();
        let flusher = {
            let (handle, store) = (handle.clone(), Arc::clone(&store));
            thread::spawn(move || {
                for _ in 0..50 {
                    handle.flush(&store).unwrap();
                }
            })
        };
        for i in 0..50 {
            handle.add_document(InputDoc::new("t", "body", format!("loc{i}"))).unwrap();
        }
        flusher.join().unwrap();
        handle.flush(&store).unwrap();
        assert_eq!(store.open().unwrap().total_documents(), 50);
    }
}
