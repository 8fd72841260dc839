use crate::artifacts::{load_bpe_from_vocab_merges, load_tokenizer_from_json, resolve_paths};
use crate::config::Config;
use crate::errors::{context, Result};
use crate::model::Bpe;
use crate::postprocessor::maybe_build_template;
use crate::pretokenizer::build_pretokenizer;
use crate::tokenizer::Tokenizer;
use crate::types::ArtifactPaths;
use log::info;

/// Loads `tokenizer.json` when present, otherwise rebuilds the tokenizer from
/// the split `vocab.json` + `merges.txt` pair and the config.
pub fn build_from_artifacts(cfg: &Config) -> Result<Tokenizer> {
    let ArtifactPaths {
        json,
        vocab,
        merges,
        ..
    } = resolve_paths(&cfg.artifacts)?;

    let tokenizer = if let Some(json_path) = json {
        info!("loading tokenizer from {}", json_path.display());
        load_tokenizer_from_json(&json_path)?
    } else {
        let vocab_path =
            vocab.ok_or_else(|| context("vocab_json path is required when tokenizer_json is absent"))?;
        let merges_path =
            merges.ok_or_else(|| context("merges_txt path is required when tokenizer_json is absent"))?;
        info!(
            "rebuilding tokenizer from {} and {}",
            vocab_path.display(),
            merges_path.display()
        );

        let (vocabulary, rules) = load_bpe_from_vocab_merges(&vocab_path, &merges_path)?;
        let unk_id = vocabulary.token_to_id(&cfg.model.unk_token).ok_or_else(|| {
            context(format!(
                "unk token '{}' missing from {}",
                cfg.model.unk_token,
                vocab_path.display()
            ))
        })?;
        let post = match cfg.postprocessor.as_ref() {
            Some(post_cfg) => maybe_build_template(post_cfg, &vocabulary)?,
            None => None,
        };
        let model = Bpe::new(vocabulary, rules, unk_id, cfg.model.special_tokens.len())?;
        Tokenizer::new(
            model,
            cfg.model.special_tokens.clone(),
            build_pretokenizer(&cfg.pretokenizer),
            post,
        )?
    };

    ensure_send_sync(&tokenizer);

    Ok(tokenizer)
}

fn ensure_send_sync<T: Send + Sync>(_: &T) {}
