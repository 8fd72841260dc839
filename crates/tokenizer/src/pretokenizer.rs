use crate::config::{PreTokenizerCfg, PreTokenizerKind};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Splits raw text into the coarse units ("words") that merges operate within.
/// The same rule runs at training and at encode time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreTokenizer {
    #[serde(rename = "type")]
    kind: PreTokenizerKind,
}

impl PreTokenizer {
    pub fn new(kind: PreTokenizerKind) -> Self {
        Self { kind }
    }

    pub fn kind(&self) -> PreTokenizerKind {
        self.kind
    }

    pub fn split<'a>(&self, text: &'a str) -> Vec<&'a str> {
        match self.kind {
            PreTokenizerKind::Whitespace => text.split_whitespace().collect(),
            PreTokenizerKind::WordPunct => split_word_punct(text),
        }
    }
}

impl Default for PreTokenizer {
    fn default() -> Self {
        Self::new(PreTokenizerKind::Whitespace)
    }
}

pub fn build_pretokenizer(cfg: &PreTokenizerCfg) -> PreTokenizer {
    PreTokenizer::new(cfg.kind)
}

pub fn name(kind: PreTokenizerKind) -> &'static str {
    match kind {
        PreTokenizerKind::Whitespace => "whitespace",
        PreTokenizerKind::WordPunct => "word-punct",
    }
}

const WORD_PUNCT_PATTERN: &str = r"\w+|[^\w\s]+";

fn split_word_punct(text: &str) -> Vec<&str> {
    static SPLITTER: OnceLock<Regex> = OnceLock::new();
    SPLITTER
        .get_or_init(|| Regex::new(WORD_PUNCT_PATTERN).expect("WORD_PUNCT_PATTERN must compile"))
        .find_iter(text)
        .map(|m| m.as_str())
        .collect()
}
