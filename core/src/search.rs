//! Query parsing and TF-IDF ranking over an [`InvertedIndex`].
//!
//! Grammar: whitespace separated clauses, optional by default. `+clause` is
//! required and `-clause` excludes matching documents. Uppercase operators are
//! accepted too. `a AND b` requires both sides and `NOT a` excludes `a`; `OR`
//! only separates optional clauses. An explicit `+`/`-` prefix wins over an
//! operator. Lowercase `and`/`or`/`not` are ordinary words.
//!
//! `"..."` is a phrase: its terms must appear at consecutive positions (gaps
//! left by dropped stop words are kept), all within the title or all within
//! the body. Outside quotes every clause goes through the index tokenizer
//! term by term, so `-Bug-Tracker` excludes both "bug" and "tracker". A
//! document is a candidate when it matches at least one non-excluded clause.
//!
//! Score for a document `d`:
//!
//! ```text
//! score(d) = Σ_c (wtf(c, d) / len(d)) * idf(c)
//! wtf(c, d) = body_occurrences + title_boost * title_occurrences
//! ```
//!
//! For a phrase the occurrences are whole-phrase matches and `idf(c)` is the
//! sum of its terms' idf.

use crate::error::{IndexError, Result};
use crate::index::{DocId, InvertedIndex, Posting};
use crate::settings::IdfMode;
use serde::Serialize;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Occur {
    Should,
    Must,
    MustNot,
}

impl Occur {
    fn rank(self) -> u8 {
        match self {
            Occur::Should => 0,
            Occur::Must => 1,
            Occur::MustNot => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Clause {
    /// A single term, or the terms of a phrase with their offsets from its first term.
    pub terms: Vec<(String, u32)>,
    pub occur: Occur,
}

impl Clause {
    pub fn term(term: impl Into<String>, occur: Occur) -> Self {
        Self { terms: vec![(term.into(), 0)], occur }
    }

    pub fn is_phrase(&self) -> bool { self.terms.len() > 1 }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query {
    pub clauses: Vec<Clause>,
}

#[derive(Debug, PartialEq)]
enum Lexeme {
    And,
    Or,
    Not,
    Text { prefix: Option<Occur>, text: String, quoted: bool },
}

fn lex(query: &str) -> Vec<Lexeme> {
    let mut lexemes = Vec::new();
    let mut chars = query.chars().peekable();
    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }
        let prefix = match c {
            '+' => Some(Occur::Must),
            '-' => Some(Occur::MustNot),
            _ => None,
        };
        if prefix.is_some() { chars.next(); }

        let mut text = String::new();
        let quoted = chars.peek() == Some(&'"');
        if quoted {
            chars.next();
            // An unterminated quote runs to the end of the query.
            for c in chars.by_ref() {
                if c == '"' { break; }
                text.push(c);
            }
        } else {
            while let Some(&c) = chars.peek() {
                if c.is_whitespace() || c == '"' { break; }
                text.push(c);
                chars.next();
            }
        }
        lexemes.push(match (prefix, quoted, text.as_str()) {
            (None, false, "AND") => Lexeme::And,
            (None, false, "OR") => Lexeme::Or,
            (None, false, "NOT") => Lexeme::Not,
            _ => Lexeme::Text { prefix, text, quoted },
        });
    }
    lexemes
}

impl Query {
    /// Parse with the index's own tokenizer so query terms match indexed terms.
    pub fn parse(index: &InvertedIndex, query: &str) -> Self {
        let tokenizer = index.tokenizer();
        let mut parsed = Query::default();
        // Clauses produced by the previous text, which a following AND makes required.
        let mut previous: Vec<usize> = Vec::new();
        let mut pending: Option<Occur> = None;
        for lexeme in lex(query) {
            let (prefix, text, quoted) = match lexeme {
                Lexeme::And => {
                    for &i in &previous {
                        if parsed.clauses[i].occur == Occur::Should { parsed.clauses[i].occur = Occur::Must; }
                    }
                    if pending != Some(Occur::MustNot) { pending = Some(Occur::Must); }
                    continue;
                }
                Lexeme::Or => {
                    pending = None;
                    continue;
                }
                Lexeme::Not => {
                    pending = Some(Occur::MustNot);
                    continue;
                }
                Lexeme::Text { prefix, text, quoted } => (prefix, text, quoted),
            };
            let occur = prefix.or(pending.take()).unwrap_or(Occur::Should);
            let tokens = tokenizer.tokenize(&text);
            let groups: Vec<Vec<(String, u32)>> = if quoted {
                let first = tokens.first().map_or(0, |(_, pos)| *pos);
                let phrase: Vec<(String, u32)> = tokens
                    .into_iter()
                    .map(|(term, pos)| (term, u32::try_from(pos - first).unwrap_or(u32::MAX)))
                    .collect();
                if phrase.is_empty() { Vec::new() } else { vec![phrase] }
            } else {
                tokens.into_iter().map(|(term, _)| vec![(term, 0)]).collect()
            };
            previous = groups.into_iter().map(|terms| parsed.push(terms, occur)).collect();
        }
        parsed
    }

    /// Add a clause, merging with an identical one. Returns its index.
    fn push(&mut self, terms: Vec<(String, u32)>, occur: Occur) -> usize {
        match self.clauses.iter().position(|c| c.terms == terms) {
            // Stronger occurrence wins when a clause repeats: MustNot > Must > Should.
            Some(i) => {
                if occur.rank() > self.clauses[i].occur.rank() { self.clauses[i].occur = occur; }
                i
            }
            None => {
                self.clauses.push(Clause { terms, occur });
                self.clauses.len() - 1
            }
        }
    }

    pub fn is_empty(&self) -> bool { self.clauses.is_empty() }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub doc_id: DocId,
    pub score: f64,
    pub title: String,
    pub locator: String,
}

fn idf(mode: IdfMode, total_documents: u32, df: u32) -> f64 {
    let ratio = f64::from(total_documents) / (1.0 + f64::from(df));
    match mode {
        IdfMode::Smoothed => (1.0 + ratio).ln(),
        IdfMode::Raw => ratio.ln(),
    }
}

/// Rank live documents against `query`. Results are ordered by descending
/// score, ties broken by ascending document id.
pub fn search(index: &InvertedIndex, query: &str, top_k: usize) -> Result<Vec<SearchHit>> {
    if top_k == 0 {
        return Err(IndexError::InvalidArgument("top_k must be positive".into()));
    }
    let parsed = Query::parse(index, query);
    Ok(execute(index, &parsed, top_k))
}

/// Live documents matching `clause` with their (title, body) occurrence counts,
/// ascending by document id.
fn matches(index: &InvertedIndex, clause: &Clause) -> Vec<(DocId, u32, u32)> {
    let mut lists: Vec<&[Posting]> = Vec::with_capacity(clause.terms.len());
    for (term, _) in &clause.terms {
        match index.term_postings(term) {
            Some((_, postings)) => lists.push(postings),
            None => return Vec::new(),
        }
    }
    let Some((first, rest)) = lists.split_first() else { return Vec::new() };

    let mut out = Vec::new();
    for lead in first.iter().filter(|p| !index.is_deleted(p.doc_id)) {
        if rest.is_empty() {
            out.push((lead.doc_id, lead.title_frequency, lead.body_frequency()));
            continue;
        }
        let others: Option<Vec<&Posting>> = rest
            .iter()
            .map(|list| {
                list.binary_search_by_key(&lead.doc_id, |p| p.doc_id).ok().map(|i| &list[i])
            })
            .collect();
        let Some(others) = others else { continue };

        let (mut title, mut body) = (0u32, 0u32);
        for (i, &start) in lead.positions.iter().enumerate() {
            let in_title = i < lead.title_frequency as usize;
            let aligned = others.iter().zip(&clause.terms[1..]).all(|(p, (_, offset))| {
                let Some(want) = start.checked_add(*offset) else { return false };
                // Positions list title occurrences first, so the index tells the field.
                match p.positions.binary_search(&want) {
                    Ok(j) => (j < p.title_frequency as usize) == in_title,
                    Err(_) => false,
                }
            });
            if aligned {
                if in_title { title += 1 } else { body += 1 }
            }
        }
        if title + body > 0 {
            out.push((lead.doc_id, title, body));
        }
    }
    out
}

pub fn execute(index: &InvertedIndex, query: &Query, top_k: usize) -> Vec<SearchHit> {
    let settings = index.settings();
    let n = index.total_documents();
    let boost = f64::from(settings.title_boost);

    let mut excluded: HashSet<DocId> = HashSet::new();
    for clause in query.clauses.iter().filter(|c| c.occur == Occur::MustNot) {
        excluded.extend(matches(index, clause).into_iter().map(|(doc_id, _, _)| doc_id));
    }

    // Accumulate in clause order so equal inputs always sum to identical floats.
    let mut scores: HashMap<DocId, f64> = HashMap::new();
    let mut required_hits: HashMap<DocId, usize> = HashMap::new();
    let mut required = 0usize;
    for clause in query.clauses.iter().filter(|c| c.occur != Occur::MustNot) {
        if clause.occur == Occur::Must { required += 1; }
        let hits = matches(index, clause);
        if hits.is_empty() {
            if clause.occur == Occur::Must { return Vec::new(); }
            continue;
        }
        let clause_idf: f64 = clause
            .terms
            .iter()
            .map(|(term, _)| idf(settings.idf, n, index.term_postings(term).map_or(0, |(df, _)| df)))
            .sum();
        for (doc_id, title, body) in hits {
            if excluded.contains(&doc_id) { continue; }
            let Some(doc) = index.document(doc_id) else { continue };
            let weighted_tf = f64::from(body) + boost * f64::from(title);
            let contrib = weighted_tf / f64::from(doc.length) * clause_idf;
            *scores.entry(doc_id).or_insert(0.0) += contrib;
            if clause.occur == Occur::Must {
                *required_hits.entry(doc_id).or_insert(0) += 1;
            }
        }
    }

    let mut scored: Vec<(DocId, f64)> = scores
        .into_iter()
        .filter(|(doc_id, _)| required == 0 || required_hits.get(doc_id).copied() == Some(required))
        .collect();
    scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
    scored.truncate(top_k);

    scored
        .into_iter()
        .filter_map(|(doc_id, score)| {
            index.document(doc_id).map(|doc| SearchHit {
                doc_id,
                score,
                title: doc.title.clone(),
                locator: doc.locator.clone(),
            })
        })
        .collect()
}
