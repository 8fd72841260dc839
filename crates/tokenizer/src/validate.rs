use crate::config::Config;
use crate::errors::{Error, Result};
use crate::tokenizer::Tokenizer;
use std::collections::HashSet;
use std::path::Path;

/// Checks every configuration rule and reports all violations at once.
pub fn validate_config(cfg: &Config) -> Result<()> {
    let mut problems: Vec<String> = Vec::new();
    let specials = &cfg.model.special_tokens;

    if cfg.model.vocab_size == 0 {
        problems.push("model.vocab_size must be greater than zero".into());
    } else if cfg.model.vocab_size <= specials.len() {
        problems.push(format!(
            "model.vocab_size ({}) must exceed the number of special tokens ({})",
            cfg.model.vocab_size,
            specials.len()
        ));
    }

    if cfg.model.min_frequency < 1 {
        problems.push("model.min_frequency must be at least 1".into());
    }

    if specials.is_empty() {
        problems.push("model.special_tokens must not be empty".into());
    }

    let mut seen = HashSet::new();
    for token in specials {
        if token.is_empty() || token.chars().any(char::is_whitespace) {
            problems.push(format!(
                "special token '{token}' must be non-empty and contain no whitespace"
            ));
        }
        if !seen.insert(token) {
            problems.push(format!("special token '{token}' appears multiple times"));
        }
    }

    if !specials.iter().any(|t| *t == cfg.model.unk_token) {
        problems.push(format!(
            "model.unk_token '{}' must be listed in model.special_tokens",
            cfg.model.unk_token
        ));
    }

    if let Some(post_cfg) = &cfg.postprocessor {
        if post_cfg.add_bos && !specials.contains(&post_cfg.bos_token) {
            problems.push(format!(
                "postprocessor.add_bos requires '{}' in model.special_tokens",
                post_cfg.bos_token
            ));
        }
        if post_cfg.add_eos && !specials.contains(&post_cfg.eos_token) {
            problems.push(format!(
                "postprocessor.add_eos requires '{}' in model.special_tokens",
                post_cfg.eos_token
            ));
        }
    }

    if cfg.artifacts.tokenizer_json.is_none()
        && (cfg.artifacts.vocab_json.is_none() || cfg.artifacts.merges_txt.is_none())
    {
        problems.push(
            "artifacts must name tokenizer_json or both vocab_json and merges_txt".into(),
        );
    }

    if let Err(Error::Validation(msg)) = ensure_directory_creatable(cfg.artifacts.dir.as_path()) {
        problems.push(msg);
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(Error::Validation(problems.join("; ")))
    }
}

pub fn validate_tokenizer(tok: &Tokenizer, cfg: &Config) -> Result<()> {
    let specials = &cfg.model.special_tokens;
    for (expected, token) in specials.iter().enumerate() {
        match tok.token_to_id(token) {
            Some(id) if id as usize == expected => {}
            Some(id) => {
                return Err(Error::Validation(format!(
                    "special token '{token}' has id {id}, expected {expected}"
                )))
            }
            None => {
                return Err(Error::Validation(format!(
                    "expected special token '{token}' to be present in tokenizer vocab"
                )))
            }
        }
    }

    let actual_size = tok.get_vocab_size();
    if actual_size > cfg.model.vocab_size {
        return Err(Error::Validation(format!(
            "tokenizer vocab size {actual_size} exceeds configured limit {}",
            cfg.model.vocab_size
        )));
    }

    Ok(())
}

fn ensure_directory_creatable(dir: &Path) -> Result<()> {
    if dir.is_dir() {
        return Ok(());
    }

    if dir.exists() {
        return Err(Error::Validation(format!(
            "artifact directory path '{}' exists but is not a directory",
            dir.display()
        )));
    }

    // Missing ancestors are fine as long as the first existing one is a directory.
    match dir.ancestors().skip(1).find(|p| p.as_os_str().is_empty() || p.exists()) {
        Some(existing) if existing.as_os_str().is_empty() || existing.is_dir() => Ok(()),
        Some(existing) => Err(Error::Validation(format!(
            "artifact directory ancestor '{}' is not a directory",
            existing.display()
        ))),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ArtifactsCfg, ModelCfg, PostCfg, PreTokenizerCfg};

    fn config(dir: &Path) -> Config {
        Config {
            model: ModelCfg {
                vocab_size: 100,
                min_frequency: 2,
                special_tokens: vec!["<pad>".into(), "<unk>".into(), "<bos>".into(), "<eos>".into()],
                unk_token: "<unk>".into(),
            },
            pretokenizer: PreTokenizerCfg::default(),
            postprocessor: Some(PostCfg::default()),
            #[cfg(feature = "train")]
            training: None,
            artifacts: ArtifactsCfg {
                dir: dir.join("artifacts"),
                tokenizer_json: Some("tokenizer.json".into()),
                vocab_json: None,
                merges_txt: None,
                manifest: None,
            },
        }
    }

    #[test]
    fn accepts_a_sane_config() {
        let tmp = tempfile::tempdir().unwrap();
        validate_config(&config(tmp.path())).unwrap();
    }

    #[test]
    fn reports_every_violation_together() {
        let tmp = tempfile::tempdir().unwrap();
        let mut cfg = config(tmp.path());
        cfg.model.vocab_size = 0;
        cfg.model.min_frequency = 0;
        cfg.model.special_tokens = vec!["<pad>".into(), "<pad>".into()];

        let Err(Error::Validation(msg)) = validate_config(&cfg) else {
            panic!("expected validation error");
        };
        assert!(msg.contains("vocab_size"));
        assert!(msg.contains("min_frequency"));
        assert!(msg.contains("appears multiple times"));
        assert!(msg.contains("unk_token"));
        assert!(msg.contains("add_bos"));
    }

    #[test]
    fn artifact_dir_under_a_file_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("blocker");
        std::fs::write(&file, "x").unwrap();
        let mut cfg = config(tmp.path());
        cfg.artifacts.dir = file.join("artifacts");
        assert!(validate_config(&cfg).is_err());
    }
}
