use crate::settings::TokenizerSettings;
use lazy_static::lazy_static;
use regex::Regex;
use rust_stemmers::{Algorithm, Stemmer};
use std::collections::HashSet;
use unicode_normalization::UnicodeNormalization;

lazy_static! {
    static ref RE: Regex = Regex::new(r"(?u)[\p{L}\p{N}]+").expect("valid regex");
    static ref STEMMER: Stemmer = Stemmer::create(Algorithm::English);
    static ref STOPWORDS: HashSet<&'static str> = {
        let words: &[&str] = &[
            "a","about","above","after","again","against","all","am","an","and","any","are","as","at",
            "be","because","been","before","being","below","between","both","but","by",
            "can","cannot","could",
            "did","do","does","doing","down","during",
            "each","few","for","from","further",
            "had","has","have","having","he","her","here","hers","herself","him","himself","his","how",
            "i","if","in","into","is","it","its","itself",
            "me","more","most","my","myself",
            "no","nor","not","of","off","on","once","only","or","other","ought","our","ours","ourselves","out","over","own",
            "same","she","should","so","some","such",
            "than","that","the","their","theirs","them","themselves","then","there","these","they","this","those","through","to","too",
            "under","until","up","very",
            "was","we","were","what","when","where","which","while","who","whom","why","with","would",
            "you","your","yours","yourself","yourselves"
        ];
        words.iter().copied().collect()
    };
}

fn is_stopword(token: &str) -> bool { STOPWORDS.contains(token) }

/// Turns text into normalized terms. Cheap to clone; holds only its settings.
#[derive(Debug, Clone, Default)]
pub struct Tokenizer {
    settings: TokenizerSettings,
}

impl Tokenizer {
    pub fn new(settings: TokenizerSettings) -> Self { Self { settings } }

    pub fn settings(&self) -> &TokenizerSettings { &self.settings }

    /// Tokenize text into (term, position): NFKC normalization, lowercase, split on
    /// non-alphanumeric runs. Positions count every token found in the text, so
    /// dropping a stop word leaves a gap rather than shifting later positions.
    pub fn tokenize(&self, text: &str) -> Vec<(String, usize)> {
        self.tokenize_with_span(text).0
    }

    /// Like `tokenize`, also returning how many positions the text consumed,
    /// stop words included.
    pub(crate) fn tokenize_with_span(&self, text: &str) -> (Vec<(String, usize)>, usize) {
        let normalized = text.nfkc().collect::<String>().to_lowercase();
        let mut tokens = Vec::new();
        let mut span = 0;
        for (pos, mat) in RE.find_iter(&normalized).enumerate() {
            span = pos + 1;
            let token = mat.as_str();
            if self.settings.stopwords && is_stopword(token) { continue; }
            let term = if self.settings.stem {
                STEMMER.stem(token).into_owned()
            } else {
                token.to_string()
            };
            tokens.push((term, pos));
        }
        (tokens, span)
    }
}

/// Tokenize with the default settings (no stop words, no stemming).
pub fn tokenize(text: &str) -> Vec<(String, usize)> {
    Tokenizer::default().tokenize(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_tokenize() {
        let t = tokenize("Fixed a bug in the parser");
        let words: Vec<&str> = t.iter().map(|(w, _)| w.as_str()).collect();
        assert_eq!(words, ["fixed", "a", "bug", "in", "the", "parser"]);
        assert_eq!(t.last().map(|(_, p)| *p), Some(5));
    }

    #[test]
    fn stemming_is_opt_in() {
        let stemmed = Tokenizer::new(TokenizerSettings { stopwords: false, stem: true });
        let t = stemmed.tokenize("Running, runner's run!");
        assert!(t.iter().any(|(w, _)| w == "run"));
        assert!(!tokenize("Running").iter().any(|(w, _)| w == "run"));
    }

    #[test]
    fn stopwords_leave_position_gaps() {
        let t = Tokenizer::new(TokenizerSettings { stopwords: true, stem: false });
        let (tokens, span) = t.tokenize_with_span("the quick fox of");
        assert_eq!(tokens, vec![("quick".to_string(), 1), ("fox".to_string(), 2)]);
        assert_eq!(span, 4);
        assert_eq!(t.tokenize_with_span(""), (Vec::new(), 0));
    }
}
