use crate::errors::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

pub type TokenId = u32;

/// Bijective token-string/id table. Ids are the positions in insertion order,
/// so they are always contiguous over `[0, len)`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct Vocabulary {
    tokens: Vec<String>,
    ids: HashMap<String, TokenId>,
}

impl Vocabulary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_tokens(tokens: Vec<String>) -> Result<Self> {
        let mut vocab = Self::new();
        for token in tokens {
            if vocab.contains(&token) {
                return Err(Error::Validation(format!(
                    "duplicate vocabulary entry '{token}'"
                )));
            }
            vocab.push(token);
        }
        Ok(vocab)
    }

    /// Returns the id of `token`, appending it first if it is not present yet.
    pub fn push(&mut self, token: String) -> TokenId {
        if let Some(&id) = self.ids.get(&token) {
            return id;
        }
        let id = self.tokens.len() as TokenId;
        self.ids.insert(token.clone(), id);
        self.tokens.push(token);
        id
    }

    pub fn contains(&self, token: &str) -> bool {
        self.ids.contains_key(token)
    }

    pub fn token_to_id(&self, token: &str) -> Option<TokenId> {
        self.ids.get(token).copied()
    }

    pub fn id_to_token(&self, id: TokenId) -> Option<&str> {
        self.tokens.get(id as usize).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    pub fn iter(&self) -> impl Iterator<Item = (TokenId, &str)> + '_ {
        self.tokens
            .iter()
            .enumerate()
            .map(|(id, token)| (id as TokenId, token.as_str()))
    }
}

impl TryFrom<Vec<String>> for Vocabulary {
    type Error = Error;

    fn try_from(tokens: Vec<String>) -> Result<Self> {
        Self::from_tokens(tokens)
    }
}

impl From<Vocabulary> for Vec<String> {
    fn from(vocab: Vocabulary) -> Self {
        vocab.tokens
    }
}

/// A learned pair replacement. `rank` is the iteration it was learned at and
/// is the merge priority at encode time (lower first).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "(TokenId, TokenId, TokenId, u32)", into = "(TokenId, TokenId, TokenId, u32)")]
pub struct MergeRule {
    pub left: TokenId,
    pub right: TokenId,
    pub merged: TokenId,
    pub rank: u32,
}

impl MergeRule {
    pub fn pair(&self) -> (TokenId, TokenId) {
        (self.left, self.right)
    }
}

impl From<(TokenId, TokenId, TokenId, u32)> for MergeRule {
    fn from((left, right, merged, rank): (TokenId, TokenId, TokenId, u32)) -> Self {
        Self {
            left,
            right,
            merged,
            rank,
        }
    }
}

impl From<MergeRule> for (TokenId, TokenId, TokenId, u32) {
    fn from(rule: MergeRule) -> Self {
        (rule.left, rule.right, rule.merged, rule.rank)
    }
}

/// Token ids and their strings for one encoded input.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Encoding {
    ids: Vec<TokenId>,
    tokens: Vec<String>,
}

impl Encoding {
    pub fn new(ids: Vec<TokenId>, tokens: Vec<String>) -> Self {
        debug_assert_eq!(ids.len(), tokens.len());
        Self { ids, tokens }
    }

    pub fn push(&mut self, id: TokenId, token: impl Into<String>) {
        self.ids.push(id);
        self.tokens.push(token.into());
    }

    pub fn extend(&mut self, other: Encoding) {
        self.ids.extend(other.ids);
        self.tokens.extend(other.tokens);
    }

    pub fn get_ids(&self) -> &[TokenId] {
        &self.ids
    }

    pub fn get_tokens(&self) -> &[String] {
        &self.tokens
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (TokenId, &str)> + '_ {
        self.ids
            .iter()
            .copied()
            .zip(self.tokens.iter().map(String::as_str))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactManifest {
    pub cfg_hash: String,
    pub created_at: String,
    pub token_count: usize,
}

#[derive(Debug, Clone)]
pub struct ArtifactPaths {
    pub json: Option<PathBuf>,
    pub vocab: Option<PathBuf>,
    pub merges: Option<PathBuf>,
    pub manifest: Option<PathBuf>,
}
