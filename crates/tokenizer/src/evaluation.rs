//! Sanity checks run against a freshly loaded tokenizer.

use crate::tokenizer::Tokenizer;
use log::info;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SampleTokens {
    pub sentence: String,
    pub tokens: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CoverageReport {
    pub total_tokens: usize,
    pub unknown_tokens: usize,
    /// Percentage of tokens that are not the unknown token, in `[0, 100]`.
    pub coverage: f64,
}

impl CoverageReport {
    pub fn from_counts(total_tokens: usize, unknown_tokens: usize) -> Self {
        let coverage = if total_tokens == 0 {
            0.0
        } else {
            100.0 * (total_tokens - unknown_tokens) as f64 / total_tokens as f64
        };
        Self {
            total_tokens,
            unknown_tokens,
            coverage,
        }
    }
}

/// Encodes each sentence with the template applied and logs its token strings.
pub fn tokenize_samples<S: AsRef<str>>(tokenizer: &Tokenizer, sentences: &[S]) -> Vec<SampleTokens> {
    sentences
        .iter()
        .map(|sentence| {
            let sentence = sentence.as_ref();
            let tokens = tokenizer.encode(sentence, true).get_tokens().to_vec();
            info!("sample: {sentence:?} -> {tokens:?}");
            SampleTokens {
                sentence: sentence.to_owned(),
                tokens,
            }
        })
        .collect()
}

/// Counts unknown tokens over a validation set. Sentences are encoded with the
/// template applied, so begin/end markers count toward the total.
pub fn coverage_testing<S: AsRef<str>>(tokenizer: &Tokenizer, sentences: &[S]) -> CoverageReport {
    let unk_id = tokenizer.unk_id();
    let (total, unknown) = sentences.iter().fold((0usize, 0usize), |(total, unknown), sentence| {
        let encoding = tokenizer.encode(sentence.as_ref(), true);
        let unk = encoding.get_ids().iter().filter(|&&id| id == unk_id).count();
        (total + encoding.len(), unknown + unk)
    });

    let report = CoverageReport::from_counts(total, unknown);
    info!(
        "coverage: {:.2}% ({} unknown of {} tokens over {} sentences)",
        report.coverage,
        report.unknown_tokens,
        report.total_tokens,
        sentences.len()
    );
    report
}
