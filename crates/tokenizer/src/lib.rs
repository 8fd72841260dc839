//! Whitespace-pretokenized BPE for language-specific pretraining corpora.
//!
//! The crate learns a rank-ordered list of merge rules from a cleaned corpus,
//! bundles them with the vocabulary, special tokens, pre-tokenizer and
//! BOS/EOS template into a versioned artifact, and encodes text by replaying
//! the merges in rank order. Training and encoding share one merge routine, so
//! a trained artifact always tokenizes its training words the way training
//! segmented them.
//!
//! # Configuration
//!
//! [`Config`] carries the model hyperparameters (vocab size including the
//! reserved specials, minimum merge frequency, ordered special tokens, unknown
//! token), the pre-tokenizer kind, optional post-processing and artifact
//! locations. The loader prefers `tokenizer.json`; otherwise both `vocab.json`
//! and `merges.txt` must be present.
//!
//! # Training Feature
//!
//! The default `train` feature enables [`train_bpe`] and
//! [`train_bpe_from_corpus`], which run the deterministic merge loop with
//! rayon-parallel pair counting and write every configured artifact.
//!
//! # Thread Safety
//!
//! Built tokenizers are `Send + Sync` and immutable.

pub mod config;
pub mod errors;
pub mod evaluation;

mod artifacts;
mod builder;
mod model;
mod postprocessor;
mod pretokenizer;
mod tokenizer;
#[cfg(feature = "train")]
mod trainer;
mod types;
mod validate;

pub use artifacts::{read_manifest, resolve_paths};
pub use config::{ArtifactsCfg, Config, ModelCfg, PostCfg, PreTokenizerCfg, PreTokenizerKind};
pub use errors::{Error, Result};
pub use evaluation::{coverage_testing, tokenize_samples, CoverageReport, SampleTokens};
pub use model::Bpe;
pub use postprocessor::{SpecialToken, TemplateProcessing};
pub use pretokenizer::PreTokenizer;
pub use tokenizer::{ModelArtifact, Tokenizer, TokenizerArtifact, ARTIFACT_VERSION};
#[cfg(feature = "train")]
pub use trainer::{BpeTrainer, StopReason, TrainedModel};
pub use types::{ArtifactManifest, Encoding, MergeRule, TokenId, Vocabulary};
pub use validate::{validate_config, validate_tokenizer};

pub fn build_from_artifacts(cfg: &Config) -> Result<Tokenizer> {
    validate::validate_config(cfg)?;
    let tokenizer = builder::build_from_artifacts(cfg)?;
    validate::validate_tokenizer(&tokenizer, cfg)?;
    Ok(tokenizer)
}

/// Trains from the line files listed in `training.inputs`.
#[cfg(feature = "train")]
pub fn train_bpe(cfg: &Config) -> Result<Tokenizer> {
    train_bpe_with_shutdown(cfg, || false)
}

#[cfg(feature = "train")]
pub fn train_bpe_with_shutdown<F>(cfg: &Config, should_stop: F) -> Result<Tokenizer>
where
    F: Fn() -> bool + Sync,
{
    validate::validate_config(cfg)?;
    let tokenizer = trainer::train_from_files(cfg, should_stop)?;
    validate::validate_tokenizer(&tokenizer, cfg)?;
    Ok(tokenizer)
}

/// Trains from an in-memory corpus, typically the deduplicated output of the
/// cleaning pipeline.
#[cfg(feature = "train")]
pub fn train_bpe_from_corpus<I, S, F>(cfg: &Config, corpus: I, should_stop: F) -> Result<Tokenizer>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
    F: Fn() -> bool + Sync,
{
    validate::validate_config(cfg)?;
    let tokenizer = trainer::train_from_corpus(cfg, corpus, should_stop)?;
    validate::validate_tokenizer(&tokenizer, cfg)?;
    Ok(tokenizer)
}
