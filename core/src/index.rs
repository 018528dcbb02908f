use crate::error::{IndexError, Result};
use crate::settings::IndexSettings;
use crate::tokenizer::Tokenizer;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

pub type TermId = u32;
pub type DocId = u32;

/// A record handed to the index: what a scraper or importer produces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputDoc {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub body: String,
    /// Display key for the document, typically its URL. Need not be unique.
    #[serde(alias = "url")]
    pub locator: String,
}

impl InputDoc {
    pub fn new(title: impl Into<String>, body: impl Into<String>, locator: impl Into<String>) -> Self {
        Self { title: title.into(), body: body.into(), locator: locator.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocId,
    pub title: String,
    pub body: String,
    pub locator: String,
    /// Token count of title and body together.
    pub length: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Posting {
    pub doc_id: DocId,
    pub term_frequency: u32,
    /// How many of `positions` fall inside the title.
    pub title_frequency: u32,
    /// Ascending; title positions come first, body positions continue after the title span.
    pub positions: Vec<u32>,
}

impl Posting {
    pub fn body_frequency(&self) -> u32 { self.term_frequency - self.title_frequency }
}

/// Live postings for one term, ordered by document id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PostingList {
    pub term: String,
    pub document_frequency: u32,
    pub postings: Vec<Posting>,
}

impl PostingList {
    pub fn is_empty(&self) -> bool { self.postings.is_empty() }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexStats {
    pub total_documents: u32,
    pub deleted_documents: u32,
    pub distinct_terms: usize,
    pub average_document_length: f64,
    /// Postings that still point at tombstoned documents; reclaimed by `compact`.
    pub stale_postings: usize,
}

#[derive(Debug, Default)]
struct TermOccurrences {
    title: u32,
    positions: Vec<u32>,
}

/// A document that has been tokenized and checked against resource limits but
/// not yet applied. Applying it cannot fail halfway.
#[derive(Debug)]
pub(crate) struct AnalyzedDoc {
    input: InputDoc,
    length: u32,
    terms: BTreeMap<String, TermOccurrences>,
}

pub(crate) fn analyze(settings: &IndexSettings, input: InputDoc) -> Result<AnalyzedDoc> {
    if input.locator.trim().is_empty() {
        return Err(IndexError::InvalidArgument("document locator must not be empty".into()));
    }
    let tokenizer = Tokenizer::new(settings.tokenizer.clone());
    let (title_tokens, body_offset) = tokenizer.tokenize_with_span(&input.title);
    let body_tokens = tokenizer.tokenize(&input.body);
    let total = title_tokens.len() + body_tokens.len();
    if total > settings.max_tokens_per_document {
        return Err(IndexError::LimitExceeded(format!(
            "document has {total} tokens, limit is {}",
            settings.max_tokens_per_document
        )));
    }
    let too_long = || IndexError::LimitExceeded("token position does not fit in 32 bits".into());
    let length = u32::try_from(total).map_err(|_| too_long())?;

    let mut terms: BTreeMap<String, TermOccurrences> = BTreeMap::new();
    for (term, pos) in title_tokens {
        let occ = terms.entry(term).or_default();
        occ.title += 1;
        occ.positions.push(u32::try_from(pos).map_err(|_| too_long())?);
    }
    for (term, pos) in body_tokens {
        let pos = u32::try_from(pos + body_offset).map_err(|_| too_long())?;
        terms.entry(term).or_default().positions.push(pos);
    }
    Ok(AnalyzedDoc { input, length, terms })
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InvertedIndex {
    settings: IndexSettings,
    dictionary: HashMap<String, TermId>,
    /// Live document frequency per term id.
    df: Vec<u32>,
    /// Postings per term id, sorted by doc id. May hold tombstoned documents until compaction.
    postings: Vec<Vec<Posting>>,
    /// Live and tombstoned documents. Compaction purges tombstoned entries.
    docs: BTreeMap<DocId, Document>,
    tombstones: BTreeSet<DocId>,
    next_doc_id: DocId,
    /// Sum of live document lengths.
    live_length: u64,
}

impl InvertedIndex {
    pub fn new() -> Self { Self::default() }

    pub fn with_settings(settings: IndexSettings) -> Self {
        Self { settings, ..Self::default() }
    }

    pub fn settings(&self) -> &IndexSettings { &self.settings }

    pub fn tokenizer(&self) -> Tokenizer { Tokenizer::new(self.settings.tokenizer.clone()) }

    /// Tokenize and insert a document under a fresh id. Either the whole document
    /// lands in the index or, on error, nothing changes.
    pub fn add_document(&mut self, input: InputDoc) -> Result<DocId> {
        let analyzed = analyze(&self.settings, input)?;
        self.apply(analyzed)
    }

    pub(crate) fn apply(&mut self, analyzed: AnalyzedDoc) -> Result<DocId> {
        let doc_id = self.next_doc_id;
        let next = doc_id
            .checked_add(1)
            .ok_or_else(|| IndexError::LimitExceeded("document id space exhausted".into()))?;
        if self.dictionary.len() + analyzed.terms.len() > TermId::MAX as usize {
            return Err(IndexError::LimitExceeded("term id space exhausted".into()));
        }

        for (term, occ) in analyzed.terms {
            let tid = match self.dictionary.get(&term) {
                Some(&tid) => tid,
                None => {
                    let tid = self.postings.len() as TermId;
                    self.dictionary.insert(term, tid);
                    self.postings.push(Vec::new());
                    self.df.push(0);
                    tid
                }
            };
            // Ids only grow, so appending keeps each list sorted.
            self.postings[tid as usize].push(Posting {
                doc_id,
                term_frequency: occ.positions.len() as u32,
                title_frequency: occ.title,
                positions: occ.positions,
            });
            self.df[tid as usize] += 1;
        }

        let InputDoc { title, body, locator } = analyzed.input;
        self.docs.insert(doc_id, Document { id: doc_id, title, body, locator, length: analyzed.length });
        self.live_length += u64::from(analyzed.length);
        self.next_doc_id = next;
        tracing::debug!(doc_id, length = analyzed.length, "indexed document");
        Ok(doc_id)
    }

    /// Tombstone a document. Its postings stay in place until `compact`, but
    /// document frequencies drop immediately. Returns false if it was already deleted.
    pub fn remove_document(&mut self, doc_id: DocId) -> Result<bool> {
        if doc_id >= self.next_doc_id {
            return Err(IndexError::InvalidArgument(format!("unknown document id {doc_id}")));
        }
        let Some(doc) = self.docs.get(&doc_id) else {
            // Purged by compaction.
            return Ok(false);
        };
        if self.tombstones.contains(&doc_id) {
            return Ok(false);
        }

        let tokenizer = self.tokenizer();
        let mut terms: HashSet<String> = HashSet::new();
        terms.extend(tokenizer.tokenize(&doc.title).into_iter().map(|(t, _)| t));
        terms.extend(tokenizer.tokenize(&doc.body).into_iter().map(|(t, _)| t));
        for term in &terms {
            if let Some(&tid) = self.dictionary.get(term) {
                let df = &mut self.df[tid as usize];
                *df = df.saturating_sub(1);
            }
        }

        self.live_length -= u64::from(doc.length);
        self.tombstones.insert(doc_id);
        tracing::debug!(doc_id, "tombstoned document");
        Ok(true)
    }

    pub fn is_deleted(&self, doc_id: DocId) -> bool {
        self.tombstones.contains(&doc_id) || (doc_id < self.next_doc_id && !self.docs.contains_key(&doc_id))
    }

    /// Live document by id.
    pub fn document(&self, doc_id: DocId) -> Option<&Document> {
        if self.tombstones.contains(&doc_id) { return None; }
        self.docs.get(&doc_id)
    }

    /// Live postings for `term`. The term is normalized with the index tokenizer;
    /// input that does not reduce to exactly one term yields an empty list.
    pub fn get_posting_list(&self, term: &str) -> PostingList {
        let mut tokens = self.tokenizer().tokenize(term);
        if tokens.len() != 1 {
            return PostingList { term: term.to_string(), ..PostingList::default() };
        }
        let (key, _) = tokens.remove(0);
        match self.term_postings(&key) {
            Some((df, postings)) => PostingList {
                term: key,
                document_frequency: df,
                postings: postings.iter().filter(|p| !self.tombstones.contains(&p.doc_id)).cloned().collect(),
            },
            None => PostingList { term: key, ..PostingList::default() },
        }
    }

    /// Raw (possibly stale) postings and live document frequency for an already normalized term.
    pub(crate) fn term_postings(&self, term: &str) -> Option<(u32, &[Posting])> {
        let tid = *self.dictionary.get(term)? as usize;
        Some((self.df[tid], &self.postings[tid]))
    }

    pub fn total_documents(&self) -> u32 { (self.docs.len() - self.tombstones.len()) as u32 }

    pub fn average_document_length(&self) -> f64 {
        match self.total_documents() {
            0 => 0.0,
            n => self.live_length as f64 / f64::from(n),
        }
    }

    pub fn stats(&self) -> IndexStats {
        let stale_postings = self
            .postings
            .iter()
            .flatten()
            .filter(|p| self.tombstones.contains(&p.doc_id))
            .count();
        IndexStats {
            total_documents: self.total_documents(),
            deleted_documents: self.tombstones.len() as u32,
            distinct_terms: self.df.iter().filter(|&&df| df > 0).count(),
            average_document_length: self.average_document_length(),
            stale_postings,
        }
    }

    /// Physically drop tombstoned postings, terms left without postings and the
    /// tombstoned documents themselves. Their ids stay reserved. Returns the
    /// number of postings reclaimed.
    pub fn compact(&mut self) -> usize {
        let mut by_id: Vec<(TermId, String)> = self.dictionary.drain().map(|(term, tid)| (tid, term)).collect();
        by_id.sort_unstable_by_key(|(tid, _)| *tid);
        let old_postings = std::mem::take(&mut self.postings);
        self.df.clear();

        let mut reclaimed = 0;
        for ((_, term), list) in by_id.into_iter().zip(old_postings) {
            let before = list.len();
            let live: Vec<Posting> = list.into_iter().filter(|p| !self.tombstones.contains(&p.doc_id)).collect();
            reclaimed += before - live.len();
            if live.is_empty() { continue; }
            self.dictionary.insert(term, self.postings.len() as TermId);
            self.df.push(live.len() as u32);
            self.postings.push(live);
        }

        for doc_id in std::mem::take(&mut self.tombstones) {
            self.docs.remove(&doc_id);
        }
        tracing::info!(reclaimed, terms = self.postings.len(), "compacted index");
        reclaimed
    }

    /// Structural integrity check used when loading from disk.
    pub(crate) fn validate(&self) -> std::result::Result<(), String> {
        if self.df.len() != self.postings.len() || self.dictionary.len() != self.postings.len() {
            return Err("dictionary, df and postings disagree in length".into());
        }
        let mut seen_ids = vec![false; self.postings.len()];
        for (term, &tid) in &self.dictionary {
            match seen_ids.get_mut(tid as usize) {
                Some(seen) if !*seen => *seen = true,
                _ => return Err(format!("term {term:?} has invalid or duplicate id {tid}")),
            }
        }
        for (tid, list) in self.postings.iter().enumerate() {
            let mut prev: Option<DocId> = None;
            let mut live = 0u32;
            for p in list {
                if prev.is_some_and(|prev| prev >= p.doc_id) {
                    return Err(format!("postings for term id {tid} are not sorted"));
                }
                prev = Some(p.doc_id);
                if !self.docs.contains_key(&p.doc_id) {
                    return Err(format!("posting references missing document {}", p.doc_id));
                }
                if p.positions.len() != p.term_frequency as usize || p.title_frequency > p.term_frequency {
                    return Err(format!("inconsistent posting for document {}", p.doc_id));
                }
                if !self.tombstones.contains(&p.doc_id) { live += 1; }
            }
            if self.df[tid] != live {
                return Err(format!("document frequency of term id {tid} is {}, expected {live}", self.df[tid]));
            }
        }
        if let Some((&last, _)) = self.docs.last_key_value() {
            if last >= self.next_doc_id {
                return Err(format!("document id {last} is not below next id {}", self.next_doc_id));
            }
        }
        if !self.tombstones.iter().all(|id| self.docs.contains_key(id)) {
            return Err("tombstone references missing document".into());
        }
        let live_length: u64 = self
            .docs
            .values()
            .filter(|d| !self.tombstones.contains(&d.id))
            .map(|d| u64::from(d.length))
            .sum();
        if live_length != self.live_length {
            return Err("stored document length total does not match documents".into());
        }
        Ok(())
    }
}
