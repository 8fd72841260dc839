use crate::config::PostCfg;
use crate::errors::{Error, Result};
use crate::types::{Encoding, TokenId, Vocabulary};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecialToken {
    pub token: String,
    pub id: TokenId,
}

/// Wraps encoded sequences with begin/end markers.
///
/// Single: `<bos> $A <eos>`. Pair with `pair_template`: `<bos> $A <eos> <bos> $B <eos>`;
/// without it the second sequence is appended unwrapped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateProcessing {
    pub bos: Option<SpecialToken>,
    pub eos: Option<SpecialToken>,
    pub pair_template: bool,
}

impl TemplateProcessing {
    pub fn apply_single(&self, encoding: Encoding) -> Encoding {
        self.wrap(encoding)
    }

    pub fn apply_pair(&self, first: Encoding, second: Encoding) -> Encoding {
        let mut out = self.wrap(first);
        if self.pair_template {
            out.extend(self.wrap(second));
        } else {
            out.extend(second);
        }
        out
    }

    pub fn added_tokens(&self, is_pair: bool) -> usize {
        let per_side = usize::from(self.bos.is_some()) + usize::from(self.eos.is_some());
        if is_pair && self.pair_template {
            per_side * 2
        } else {
            per_side
        }
    }

    fn wrap(&self, encoding: Encoding) -> Encoding {
        let mut out = Encoding::default();
        if let Some(bos) = &self.bos {
            out.push(bos.id, bos.token.clone());
        }
        out.extend(encoding);
        if let Some(eos) = &self.eos {
            out.push(eos.id, eos.token.clone());
        }
        out
    }
}

pub fn maybe_build_template(cfg: &PostCfg, vocab: &Vocabulary) -> Result<Option<TemplateProcessing>> {
    if !cfg.add_bos && !cfg.add_eos {
        return Ok(None);
    }

    let bos = if cfg.add_bos {
        Some(lookup(vocab, &cfg.bos_token, "add_bos")?)
    } else {
        None
    };

    let eos = if cfg.add_eos {
        Some(lookup(vocab, &cfg.eos_token, "add_eos")?)
    } else {
        None
    };

    Ok(Some(TemplateProcessing {
        bos,
        eos,
        pair_template: cfg.pair_template,
    }))
}

fn lookup(vocab: &Vocabulary, token: &str, flag: &str) -> Result<SpecialToken> {
    vocab
        .token_to_id(token)
        .map(|id| SpecialToken {
            token: token.to_owned(),
            id,
        })
        .ok_or_else(|| {
            Error::Validation(format!(
                "postprocessor requires '{token}' special token when {flag} is true"
            ))
        })
}
