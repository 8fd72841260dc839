//! Rank-ordered BPE model used at encode time.
//!
//! Training and encoding share [`merge_pair`], so a word rewritten during
//! training and the same word encoded later go through identical replacements.

use crate::errors::{Error, Result};
use crate::types::{MergeRule, TokenId, Vocabulary};
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct Bpe {
    vocab: Vocabulary,
    merges: Vec<MergeRule>,
    ranks: HashMap<(TokenId, TokenId), (u32, TokenId)>,
    unk_id: TokenId,
    special_count: usize,
}

impl Bpe {
    pub fn new(
        vocab: Vocabulary,
        merges: Vec<MergeRule>,
        unk_id: TokenId,
        special_count: usize,
    ) -> Result<Self> {
        let size = vocab.len() as TokenId;
        if unk_id >= size {
            return Err(Error::Validation(format!(
                "unknown-token id {unk_id} outside vocabulary of size {size}"
            )));
        }

        let mut ranks = HashMap::with_capacity(merges.len());
        for (expected, rule) in merges.iter().enumerate() {
            if rule.rank as usize != expected {
                return Err(Error::Validation(format!(
                    "merge ranks must be contiguous from 0: found rank {} at position {expected}",
                    rule.rank
                )));
            }
            if rule.left >= size || rule.right >= size || rule.merged >= size {
                return Err(Error::Validation(format!(
                    "merge rank {} references an id outside the vocabulary",
                    rule.rank
                )));
            }
            let special = special_count as TokenId;
            if rule.left < special || rule.right < special || rule.merged < special {
                return Err(Error::Validation(format!(
                    "merge rank {} touches a reserved special-token id",
                    rule.rank
                )));
            }
            if ranks
                .insert(rule.pair(), (rule.rank, rule.merged))
                .is_some()
            {
                return Err(Error::Validation(format!(
                    "pair ({}, {}) is merged more than once",
                    rule.left, rule.right
                )));
            }
        }

        Ok(Self {
            vocab,
            merges,
            ranks,
            unk_id,
            special_count,
        })
    }

    pub fn vocab(&self) -> &Vocabulary {
        &self.vocab
    }

    pub fn merges(&self) -> &[MergeRule] {
        &self.merges
    }

    pub fn unk_id(&self) -> TokenId {
        self.unk_id
    }

    pub fn special_count(&self) -> usize {
        self.special_count
    }

    pub fn is_special(&self, id: TokenId) -> bool {
        (id as usize) < self.special_count
    }

    /// Maps each codepoint to its base symbol id, or the unknown id when the
    /// codepoint was never part of the trained alphabet.
    pub fn base_symbols(&self, word: &str) -> Vec<TokenId> {
        let mut buf = [0u8; 4];
        word.chars()
            .map(|c| {
                self.vocab
                    .token_to_id(c.encode_utf8(&mut buf))
                    .filter(|&id| !self.is_special(id))
                    .unwrap_or(self.unk_id)
            })
            .collect()
    }

    /// Applies the lowest-ranked applicable merge until none applies.
    pub fn tokenize_word(&self, word: &str) -> Vec<TokenId> {
        let mut symbols = self.base_symbols(word);

        while let Some((pair, merged)) = self.lowest_ranked_pair(&symbols) {
            merge_pair(&mut symbols, pair, merged);
        }

        symbols
    }

    /// The applicable merge with the lowest rank, if any adjacent pair has one.
    pub fn lowest_ranked_pair(&self, symbols: &[TokenId]) -> Option<((TokenId, TokenId), TokenId)> {
        symbols
            .windows(2)
            .filter_map(|w| {
                self.ranks
                    .get(&(w[0], w[1]))
                    .map(|&(rank, merged)| (rank, (w[0], w[1]), merged))
            })
            .min_by_key(|(rank, _, _)| *rank)
            .map(|(_, pair, merged)| (pair, merged))
    }
}

/// Replaces every non-overlapping occurrence of `pair`, scanning left to right.
/// Returns the number of replacements.
pub(crate) fn merge_pair(symbols: &mut Vec<TokenId>, pair: (TokenId, TokenId), merged: TokenId) -> usize {
    if symbols.len() < 2 {
        return 0;
    }

    let mut out = Vec::with_capacity(symbols.len());
    let mut replaced = 0;
    let mut i = 0;
    while i < symbols.len() {
        if i + 1 < symbols.len() && symbols[i] == pair.0 && symbols[i + 1] == pair.1 {
            out.push(merged);
            replaced += 1;
            i += 2;
        } else {
            out.push(symbols[i]);
            i += 1;
        }
    }

    if replaced > 0 {
        *symbols = out;
    }
    replaced
}
