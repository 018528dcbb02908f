use serde::{Deserialize, Serialize};

/// How inverse document frequency is computed at query time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IdfMode {
    /// `ln(1 + N / (1 + df))`, never negative.
    Smoothed,
    /// `ln(N / (1 + df))`; goes negative for terms present in most documents.
    Raw,
}

impl Default for IdfMode {
    fn default() -> Self { IdfMode::Smoothed }
}

/// Text analysis options. Applied identically to documents and queries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenizerSettings {
    /// Drop English stop words ("the", "and", ...).
    pub stopwords: bool,
    /// Reduce terms with the Snowball English stemmer.
    pub stem: bool,
}

/// Settings an index is built with. Persisted alongside the index so a reloaded
/// index tokenizes and scores exactly like the one that was flushed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexSettings {
    pub tokenizer: TokenizerSettings,
    /// Weight of a title occurrence relative to a body occurrence.
    pub title_boost: f32,
    pub idf: IdfMode,
    /// Documents producing more tokens than this are rejected.
    pub max_tokens_per_document: usize,
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            tokenizer: TokenizerSettings::default(),
            title_boost: 2.0,
            idf: IdfMode::Smoothed,
            max_tokens_per_document: 1 << 20,
        }
    }
}
