use crate::artifacts::{load_tokenizer_from_json, save_tokenizer_json};
use crate::errors::{Error, Result};
use crate::model::Bpe;
use crate::postprocessor::TemplateProcessing;
use crate::pretokenizer::PreTokenizer;
use crate::types::{Encoding, MergeRule, TokenId, Vocabulary};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const ARTIFACT_VERSION: u32 = 1;

/// On-disk form of a trained tokenizer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenizerArtifact {
    pub version: u32,
    pub model: ModelArtifact,
    pub special_tokens: Vec<String>,
    pub unk_token: String,
    pub pre_tokenizer: PreTokenizer,
    #[serde(default)]
    pub post_processor: Option<TemplateProcessing>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub vocab: Vocabulary,
    pub merges: Vec<MergeRule>,
}

#[derive(Debug, Clone)]
pub struct Tokenizer {
    model: Bpe,
    special_tokens: Vec<String>,
    pre_tokenizer: PreTokenizer,
    post_processor: Option<TemplateProcessing>,
}

impl Tokenizer {
    /// Checks that `special_tokens` occupy ids `0..k` in order and that the
    /// template markers point at them.
    pub fn new(
        model: Bpe,
        special_tokens: Vec<String>,
        pre_tokenizer: PreTokenizer,
        post_processor: Option<TemplateProcessing>,
    ) -> Result<Self> {
        if special_tokens.len() != model.special_count() {
            return Err(Error::Validation(format!(
                "model reserves {} special ids but {} special tokens were given",
                model.special_count(),
                special_tokens.len()
            )));
        }

        for (expected, token) in special_tokens.iter().enumerate() {
            match model.vocab().token_to_id(token) {
                Some(id) if id as usize == expected => {}
                Some(id) => {
                    return Err(Error::Validation(format!(
                        "special token '{token}' has id {id}, expected {expected}"
                    )))
                }
                None => {
                    return Err(Error::Validation(format!(
                        "special token '{token}' missing from vocabulary"
                    )))
                }
            }
        }

        if let Some(post) = &post_processor {
            for marker in post.bos.iter().chain(post.eos.iter()) {
                if !model.is_special(marker.id)
                    || model.vocab().id_to_token(marker.id) != Some(marker.token.as_str())
                {
                    return Err(Error::Validation(format!(
                        "template marker '{}' does not match a special token",
                        marker.token
                    )));
                }
            }
        }

        Ok(Self {
            model,
            special_tokens,
            pre_tokenizer,
            post_processor,
        })
    }

    pub fn from_artifact(artifact: TokenizerArtifact) -> Result<Self> {
        if artifact.version != ARTIFACT_VERSION {
            return Err(Error::UnsupportedVersion {
                found: artifact.version,
                expected: ARTIFACT_VERSION,
            });
        }

        let unk_id = artifact
            .model
            .vocab
            .token_to_id(&artifact.unk_token)
            .filter(|&id| (id as usize) < artifact.special_tokens.len())
            .ok_or_else(|| {
                Error::Artifact(format!(
                    "unk token '{}' is not one of the special tokens",
                    artifact.unk_token
                ))
            })?;

        let special_count = artifact.special_tokens.len();
        let model = Bpe::new(artifact.model.vocab, artifact.model.merges, unk_id, special_count)?;
        Self::new(
            model,
            artifact.special_tokens,
            artifact.pre_tokenizer,
            artifact.post_processor,
        )
    }

    pub fn to_artifact(&self) -> TokenizerArtifact {
        TokenizerArtifact {
            version: ARTIFACT_VERSION,
            model: ModelArtifact {
                vocab: self.model.vocab().clone(),
                merges: self.model.merges().to_vec(),
            },
            special_tokens: self.special_tokens.clone(),
            unk_token: self.unk_token().to_owned(),
            pre_tokenizer: self.pre_tokenizer,
            post_processor: self.post_processor.clone(),
        }
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        load_tokenizer_from_json(path.as_ref())
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        save_tokenizer_json(self, path.as_ref())
    }

    pub fn encode(&self, text: &str, add_special_tokens: bool) -> Encoding {
        let encoding = self.encode_words(text);
        match (&self.post_processor, add_special_tokens) {
            (Some(post), true) => post.apply_single(encoding),
            _ => encoding,
        }
    }

    pub fn encode_pair(&self, first: &str, second: &str, add_special_tokens: bool) -> Encoding {
        let first = self.encode_words(first);
        let second = self.encode_words(second);
        match (&self.post_processor, add_special_tokens) {
            (Some(post), true) => post.apply_pair(first, second),
            _ => {
                let mut out = first;
                out.extend(second);
                out
            }
        }
    }

    /// Space-joins the token strings. Ids outside the vocabulary render as the
    /// unknown token; with `skip_special_tokens` every reserved id except the
    /// unknown token is dropped.
    pub fn decode(&self, ids: &[TokenId], skip_special_tokens: bool) -> String {
        let unk_id = self.model.unk_id();
        let unk = self.unk_token();
        ids.iter()
            .filter(|&&id| !(skip_special_tokens && self.model.is_special(id) && id != unk_id))
            .map(|&id| self.model.vocab().id_to_token(id).unwrap_or(unk))
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn token_to_id(&self, token: &str) -> Option<TokenId> {
        self.model.vocab().token_to_id(token)
    }

    pub fn id_to_token(&self, id: TokenId) -> Option<&str> {
        self.model.vocab().id_to_token(id)
    }

    pub fn get_vocab_size(&self) -> usize {
        self.model.vocab().len()
    }

    pub fn get_vocab(&self) -> &Vocabulary {
        self.model.vocab()
    }

    pub fn get_merges(&self) -> &[MergeRule] {
        self.model.merges()
    }

    pub fn special_tokens(&self) -> &[String] {
        &self.special_tokens
    }

    pub fn unk_id(&self) -> TokenId {
        self.model.unk_id()
    }

    pub fn unk_token(&self) -> &str {
        self.model
            .vocab()
            .id_to_token(self.model.unk_id())
            .unwrap_or_default()
    }

    pub fn pre_tokenizer(&self) -> PreTokenizer {
        self.pre_tokenizer
    }

    pub fn post_processor(&self) -> Option<&TemplateProcessing> {
        self.post_processor.as_ref()
    }

    fn encode_words(&self, text: &str) -> Encoding {
        let mut encoding = Encoding::default();
        let vocab = self.model.vocab();
        for word in self.pre_tokenizer.split(text) {
            for id in self.model.tokenize_word(word) {
                encoding.push(id, vocab.id_to_token(id).unwrap_or_default());
            }
        }
        encoding
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::postprocessor::SpecialToken;

    // 0 <pad>, 1 <unk>, 2 <bos>, 3 <eos>, 4 e, 5 l, 6 r, 7 v, 8 ev, 9 le, 10 ler
    fn toy() -> Tokenizer {
        let vocab = Vocabulary::from_tokens(
            ["<pad>", "<unk>", "<bos>", "<eos>", "e", "l", "r", "v", "ev", "le", "ler"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        )
        .unwrap();
        let merges = vec![
            MergeRule::from((4, 7, 8, 0)),
            MergeRule::from((5, 4, 9, 1)),
            MergeRule::from((9, 6, 10, 2)),
        ];
        let model = Bpe::new(vocab, merges, 1, 4).unwrap();
        let post = TemplateProcessing {
            bos: Some(SpecialToken {
                token: "<bos>".into(),
                id: 2,
            }),
            eos: Some(SpecialToken {
                token: "<eos>".into(),
                id: 3,
            }),
            pair_template: true,
        };
        let specials = ["<pad>", "<unk>", "<bos>", "<eos>"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        Tokenizer::new(model, specials, PreTokenizer::default(), Some(post)).unwrap()
    }

    #[test]
    fn encodes_words_with_template() {
        let tok = toy();
        let enc = tok.encode("evler ev", true);
        assert_eq!(enc.get_ids(), &[2, 8, 10, 8, 3]);
        assert_eq!(enc.get_tokens(), &["<bos>", "ev", "ler", "ev", "<eos>"]);

        let bare = tok.encode("evler ev", false);
        assert_eq!(bare.get_ids(), &[8, 10, 8]);
    }

    #[test]
    fn pair_encoding_wraps_both_sides() {
        let tok = toy();
        let enc = tok.encode_pair("ev", "ler", true);
        assert_eq!(enc.get_ids(), &[2, 8, 3, 2, 10, 3]);
        assert_eq!(tok.encode_pair("ev", "ler", false).get_ids(), &[8, 10]);
    }

    #[test]
    fn unknown_characters_become_unk() {
        let tok = toy();
        let enc = tok.encode("evş", false);
        assert_eq!(enc.get_ids(), &[8, 1]);
    }

    #[test]
    fn decode_space_joins_and_handles_unknown_ids() {
        let tok = toy();
        assert_eq!(tok.decode(&[2, 8, 10, 3], false), "<bos> ev ler <eos>");
        assert_eq!(tok.decode(&[2, 8, 10, 3], true), "ev ler");
        assert_eq!(tok.decode(&[8, 999, 1], true), "ev <unk> <unk>");
    }

    #[test]
    fn artifact_round_trip_preserves_behaviour() {
        let tok = toy();
        let json = serde_json::to_string(&tok.to_artifact()).unwrap();
        let artifact: TokenizerArtifact = serde_json::from_str(&json).unwrap();
        let back = Tokenizer::from_artifact(artifact).unwrap();
        assert_eq!(
            back.encode("evler ler", true).get_ids(),
            tok.encode("evler ler", true).get_ids()
        );
        assert_eq!(back.get_vocab_size(), tok.get_vocab_size());
    }

    #[test]
    fn rejects_other_artifact_versions() {
        let mut artifact = toy().to_artifact();
        artifact.version = 2;
        let err = Tokenizer::from_artifact(artifact).unwrap_err();
        assert!(matches!(
            err,
            Error::UnsupportedVersion {
                found: 2,
                expected: 1
            }
        ));
    }

    #[test]
    fn rejects_reordered_special_tokens() {
        let mut artifact = toy().to_artifact();
        artifact.special_tokens.swap(0, 1);
        assert!(Tokenizer::from_artifact(artifact).is_err());
    }
}
