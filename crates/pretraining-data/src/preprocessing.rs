use crate::corpora::{RawRecord, DEFAULT_TEXT_COLUMN};
use crate::errors::{DataError, Result};
use crate::language::LanguageIdentifier;
use log::info;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use unicode_normalization::UnicodeNormalization;

/// Turkish and ASCII letters, digits, whitespace and basic punctuation, as the
/// body of a regex character class.
pub const DEFAULT_ALLOWED_CHARS: &str = r#"A-Za-zÇçĞğIıİiÖöŞşÜü0-9\s.,!?;:()"'`-"#;
pub const DEFAULT_TARGET_LANGUAGE: &str = "tur";
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Configuration for corpus ingestion and cleaning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreprocessConfig {
    #[serde(default)]
    pub columnar_dir: Option<PathBuf>,
    #[serde(default)]
    pub text_dir: Option<PathBuf>,
    #[serde(default = "default_text_column")]
    pub text_column: String,
    #[serde(default = "default_target_language")]
    pub target_language: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// `None` uses the available parallelism.
    #[serde(default)]
    pub worker_count: Option<usize>,
    /// Character-class body; `None` uses [`DEFAULT_ALLOWED_CHARS`].
    #[serde(default)]
    pub allowed_pattern: Option<String>,
    /// `None` allows two outstanding batches per worker.
    #[serde(default)]
    pub max_in_flight: Option<usize>,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            columnar_dir: None,
            text_dir: None,
            text_column: default_text_column(),
            target_language: default_target_language(),
            batch_size: DEFAULT_BATCH_SIZE,
            worker_count: None,
            allowed_pattern: None,
            max_in_flight: None,
        }
    }
}

impl PreprocessConfig {
    pub fn workers(&self) -> usize {
        self.worker_count.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(NonZeroUsize::get)
                .unwrap_or(1)
        })
    }

    pub fn in_flight(&self) -> usize {
        self.max_in_flight.unwrap_or_else(|| self.workers() * 2)
    }

    pub fn apply_base_path(&mut self, base: &Path) {
        for dir in [&mut self.columnar_dir, &mut self.text_dir].into_iter().flatten() {
            if dir.is_relative() {
                *dir = base.join(&*dir);
            }
        }
    }

    /// Collects every violation into a single [`DataError::Config`].
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();

        if self.batch_size == 0 {
            problems.push("batch_size must be greater than zero".to_string());
        }
        if self.worker_count == Some(0) {
            problems.push("worker_count must be greater than zero".to_string());
        }
        if self.max_in_flight == Some(0) {
            problems.push("max_in_flight must be greater than zero".to_string());
        }
        if self.text_column.trim().is_empty() {
            problems.push("text_column must not be empty".to_string());
        }
        if self.target_language.trim().is_empty() {
            problems.push("target_language must not be empty".to_string());
        }
        if self.columnar_dir.is_none() && self.text_dir.is_none() {
            problems.push("at least one of columnar_dir or text_dir must be set".to_string());
        }
        if let Err(err) = disallowed_regex(self.allowed_pattern.as_deref()) {
            problems.push(err.to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(DataError::Config(problems.join("; ")))
        }
    }
}

/// A cleaned line and the first 128 bits of the SHA-256 of its UTF-8 bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanedText {
    pub text: String,
    pub digest: u128,
}

impl CleanedText {
    pub fn new(text: String) -> Self {
        let digest = content_digest(&text);
        Self { text, digest }
    }
}

pub fn content_digest(text: &str) -> u128 {
    let hash = Sha256::digest(text.as_bytes());
    let mut prefix = [0u8; 16];
    prefix.copy_from_slice(&hash[..16]);
    u128::from_be_bytes(prefix)
}

/// Stateless per-record cleaning: language gate, NFC, allow-list, whitespace
/// collapse. Safe to share across worker threads.
#[derive(Clone)]
pub struct TextCleaner {
    identifier: Arc<dyn LanguageIdentifier>,
    target_language: String,
    disallowed: Regex,
}

impl TextCleaner {
    pub fn new(
        identifier: Arc<dyn LanguageIdentifier>,
        target_language: impl Into<String>,
        allowed_chars: Option<&str>,
    ) -> Result<Self> {
        Ok(Self {
            identifier,
            target_language: target_language.into(),
            disallowed: disallowed_regex(allowed_chars)?,
        })
    }

    pub fn from_config(cfg: &PreprocessConfig, identifier: Arc<dyn LanguageIdentifier>) -> Result<Self> {
        Self::new(identifier, cfg.target_language.clone(), cfg.allowed_pattern.as_deref())
    }

    pub fn target_language(&self) -> &str {
        &self.target_language
    }

    pub fn clean(&self, raw: &str) -> Option<CleanedText> {
        let detection = self.identifier.classify(raw)?;
        if detection.code != self.target_language {
            return None;
        }

        let normalized: String = raw.nfc().collect();
        let allowed = self.disallowed.replace_all(&normalized, " ");
        let collapsed = collapse_whitespace(&allowed);
        if collapsed.is_empty() {
            return None;
        }
        Some(CleanedText::new(collapsed))
    }

    pub fn clean_batch(&self, batch: &[RawRecord]) -> Vec<CleanedText> {
        batch
            .iter()
            .filter_map(|record| self.clean(&record.text))
            .collect()
    }
}

fn disallowed_regex(allowed_chars: Option<&str>) -> Result<Regex> {
    let allowed = allowed_chars.unwrap_or(DEFAULT_ALLOWED_CHARS);
    Ok(Regex::new(&format!("[^{allowed}]+"))?)
}

/// Collapse whitespace runs into single spaces and trim both ends
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Writes one text per line and returns the number of lines written.
pub fn write_corpus<I, S>(path: &Path, texts: I) -> Result<usize>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let mut writer = BufWriter::new(File::create(path)?);
    let mut written = 0;
    for text in texts {
        writeln!(writer, "{}", text.as_ref())?;
        written += 1;
    }
    writer.flush()?;
    info!("wrote {written} lines to {}", path.display());
    Ok(written)
}

/// Statistics about a processed corpus file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CorpusStats {
    pub total_lines: usize,
    pub total_words: usize,
    pub total_chars: usize,
    pub output_path: PathBuf,
}

pub fn get_corpus_stats(corpus_path: &Path) -> Result<CorpusStats> {
    let reader = BufReader::new(File::open(corpus_path)?);

    let mut total_lines = 0;
    let mut total_words = 0;
    let mut total_chars = 0;
    for line in reader.lines() {
        let line = line?;
        total_lines += 1;
        total_words += line.split_whitespace().count();
        total_chars += line.chars().count();
    }

    Ok(CorpusStats {
        total_lines,
        total_words,
        total_chars,
        output_path: corpus_path.to_path_buf(),
    })
}

fn default_text_column() -> String {
    DEFAULT_TEXT_COLUMN.to_owned()
}

fn default_target_language() -> String {
    DEFAULT_TARGET_LANGUAGE.to_owned()
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}
