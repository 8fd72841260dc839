#![cfg(feature = "train")]

use crate::artifacts::{compute_config_hash, save_split_files, save_tokenizer_json, write_manifest};
use crate::config::Config;
use crate::errors::{Error, Result};
use crate::model::{merge_pair, Bpe};
use crate::postprocessor::maybe_build_template;
use crate::pretokenizer::{self, build_pretokenizer, PreTokenizer};
use crate::tokenizer::Tokenizer;
use crate::types::{ArtifactManifest, MergeRule, TokenId, Vocabulary};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use log::{debug, info};
use rayon::prelude::*;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Why the merge loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    VocabSizeReached,
    BelowMinFrequency,
    NoPairsLeft,
}

#[derive(Debug, Clone)]
pub struct TrainedModel {
    pub vocab: Vocabulary,
    pub merges: Vec<MergeRule>,
    pub unk_id: TokenId,
    pub special_count: usize,
    pub distinct_words: usize,
    pub stop_reason: StopReason,
}

impl TrainedModel {
    pub fn into_bpe(self) -> Result<Bpe> {
        Bpe::new(self.vocab, self.merges, self.unk_id, self.special_count)
    }
}

/// One distinct pre-tokenized word and how often it occurred in the corpus.
#[derive(Debug, Clone)]
struct Word {
    symbols: Vec<TokenId>,
    count: u64,
}

#[derive(Debug, Clone)]
pub struct BpeTrainer {
    vocab_size: usize,
    min_frequency: u64,
    special_tokens: Vec<String>,
    unk_token: String,
    pretokenizer: PreTokenizer,
    show_progress: bool,
    log_every: usize,
}

impl BpeTrainer {
    pub fn new(vocab_size: usize, min_frequency: u64, special_tokens: Vec<String>, unk_token: String) -> Self {
        Self {
            vocab_size,
            min_frequency,
            special_tokens,
            unk_token,
            pretokenizer: PreTokenizer::default(),
            show_progress: false,
            log_every: 1000,
        }
    }

    pub fn from_config(cfg: &Config) -> Self {
        let mut trainer = Self::new(
            cfg.model.vocab_size,
            cfg.model.min_frequency,
            cfg.model.special_tokens.clone(),
            cfg.model.unk_token.clone(),
        )
        .with_pretokenizer(build_pretokenizer(&cfg.pretokenizer));

        if let Some(training) = cfg.training.as_ref() {
            trainer.show_progress = training.show_progress;
            trainer.log_every = training.log_every.max(1);
        }
        trainer
    }

    pub fn with_pretokenizer(mut self, pretokenizer: PreTokenizer) -> Self {
        self.pretokenizer = pretokenizer;
        self
    }

    /// Frequency of every distinct pre-tokenized word.
    pub fn count_words<I, S>(&self, corpus: I) -> HashMap<String, u64>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut counts: HashMap<String, u64> = HashMap::new();
        for text in corpus {
            for word in self.pretokenizer.split(text.as_ref()) {
                match counts.get_mut(word) {
                    Some(count) => *count += 1,
                    None => {
                        counts.insert(word.to_owned(), 1);
                    }
                }
            }
        }
        counts
    }

    pub fn train<I, S>(&self, corpus: I) -> Result<TrainedModel>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.train_with_shutdown(corpus, || false)
    }

    pub fn train_with_shutdown<I, S, F>(&self, corpus: I, should_stop: F) -> Result<TrainedModel>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
        F: Fn() -> bool,
    {
        let counts = self.count_words(corpus);
        self.train_from_counts(counts, should_stop)
    }

    pub fn train_from_counts<F>(&self, word_counts: HashMap<String, u64>, should_stop: F) -> Result<TrainedModel>
    where
        F: Fn() -> bool,
    {
        let mut vocab = Vocabulary::new();
        for token in &self.special_tokens {
            vocab.push(token.clone());
        }
        let special_count = vocab.len();
        if special_count != self.special_tokens.len() {
            return Err(Error::Validation("special tokens must be unique".into()));
        }
        if special_count > self.vocab_size {
            return Err(Error::Validation(format!(
                "vocab_size {} cannot hold {} special tokens",
                self.vocab_size, special_count
            )));
        }
        let unk_id = vocab.token_to_id(&self.unk_token).ok_or_else(|| {
            Error::Validation(format!(
                "unk token '{}' must be one of the special tokens",
                self.unk_token
            ))
        })?;

        let mut entries: Vec<(String, u64)> = word_counts.into_iter().collect();
        entries.sort_unstable_by(|a, b| a.0.cmp(&b.0));
        let distinct_words = entries.len();

        let alphabet = self.select_alphabet(&entries, self.vocab_size - special_count);
        let mut buf = [0u8; 4];
        for &c in &alphabet {
            let symbol = c.encode_utf8(&mut buf);
            if !vocab.contains(symbol) {
                vocab.push(symbol.to_owned());
            }
        }
        info!(
            "bpe: {} distinct {} words, alphabet of {} symbols, {} reserved ids",
            distinct_words,
            pretokenizer::name(self.pretokenizer.kind()),
            alphabet.len(),
            special_count
        );

        let mut words: Vec<Word> = entries
            .iter()
            .map(|(word, count)| Word {
                symbols: word
                    .chars()
                    .map(|c| {
                        vocab
                            .token_to_id(c.encode_utf8(&mut buf))
                            .filter(|&id| id as usize >= special_count)
                            .unwrap_or(unk_id)
                    })
                    .collect(),
                count: *count,
            })
            .collect();
        drop(entries);

        let progress = self.progress_bar(self.vocab_size.saturating_sub(vocab.len()));
        let started = Instant::now();
        let mut merges: Vec<MergeRule> = Vec::new();
        let mut learned: HashSet<(TokenId, TokenId)> = HashSet::new();

        let stop_reason = loop {
            if should_stop() {
                progress.abandon();
                return Err(Error::Cancelled {
                    merges: merges.len(),
                });
            }

            if vocab.len() >= self.vocab_size {
                break StopReason::VocabSizeReached;
            }

            let pair_counts = count_pairs(&words, special_count as TokenId, &learned);
            let Some((pair, frequency)) = select_best_pair(&pair_counts, &vocab) else {
                break StopReason::NoPairsLeft;
            };
            if frequency < self.min_frequency {
                break StopReason::BelowMinFrequency;
            }

            let merged_token = format!(
                "{}{}",
                symbol_str(&vocab, pair.0)?,
                symbol_str(&vocab, pair.1)?
            );
            if matches!(vocab.token_to_id(&merged_token), Some(id) if (id as usize) < special_count) {
                debug!("bpe: skipping pair that would spell reserved token {merged_token}");
                learned.insert(pair);
                continue;
            }
            let before = vocab.len();
            let merged = vocab.push(merged_token);
            let rank = merges.len() as u32;
            merges.push(MergeRule {
                left: pair.0,
                right: pair.1,
                merged,
                rank,
            });
            learned.insert(pair);

            words.par_iter_mut().for_each(|word| {
                merge_pair(&mut word.symbols, pair, merged);
            });

            if vocab.len() > before {
                progress.inc(1);
            }
            if (rank as usize + 1) % self.log_every == 0 {
                info!(
                    "bpe: merge {} freq={} vocab={} elapsed={:.1}s",
                    rank + 1,
                    frequency,
                    vocab.len(),
                    started.elapsed().as_secs_f64()
                );
            } else {
                debug!(
                    "bpe: rank {} ({}, {}) -> {} freq={}",
                    rank, pair.0, pair.1, merged, frequency
                );
            }
        };
        progress.finish_and_clear();

        info!(
            "bpe: finished with {} merges, vocab size {} ({:?}) in {:.1}s",
            merges.len(),
            vocab.len(),
            stop_reason,
            started.elapsed().as_secs_f64()
        );

        Ok(TrainedModel {
            vocab,
            merges,
            unk_id,
            special_count,
            distinct_words,
            stop_reason,
        })
    }

    /// All observed codepoints in codepoint order, or the `capacity` most
    /// frequent ones when they do not all fit.
    fn select_alphabet(&self, entries: &[(String, u64)], capacity: usize) -> Vec<char> {
        let mut freqs: BTreeMap<char, u64> = BTreeMap::new();
        for (word, count) in entries {
            for c in word.chars() {
                *freqs.entry(c).or_insert(0) += count;
            }
        }

        if freqs.len() <= capacity {
            return freqs.into_keys().collect();
        }

        let mut ranked: Vec<(char, u64)> = freqs.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        let dropped = ranked.len() - capacity;
        ranked.truncate(capacity);
        info!("bpe: alphabet exceeds vocab budget, dropping {dropped} rare symbols");

        let mut kept: Vec<char> = ranked.into_iter().map(|(c, _)| c).collect();
        kept.sort_unstable();
        kept
    }

    fn progress_bar(&self, len: usize) -> ProgressBar {
        let pb = ProgressBar::new(len as u64);
        if !self.show_progress {
            pb.set_draw_target(ProgressDrawTarget::hidden());
            return pb;
        }
        if let Ok(style) =
            ProgressStyle::with_template("{elapsed_precise} [{bar:40}] {pos}/{len} merges ({eta})")
        {
            pb.set_style(style);
        }
        pb
    }
}

/// Weighted adjacent-pair frequencies over all distinct words. Pairs touching a
/// reserved id, or already learned, are not candidates.
fn count_pairs(
    words: &[Word],
    special_count: TokenId,
    learned: &HashSet<(TokenId, TokenId)>,
) -> HashMap<(TokenId, TokenId), u64> {
    words
        .par_iter()
        .fold(HashMap::new, |mut acc: HashMap<(TokenId, TokenId), u64>, word| {
            for window in word.symbols.windows(2) {
                let pair = (window[0], window[1]);
                if pair.0 < special_count || pair.1 < special_count || learned.contains(&pair) {
                    continue;
                }
                *acc.entry(pair).or_insert(0) += word.count;
            }
            acc
        })
        .reduce(HashMap::new, |mut left, right| {
            for (pair, count) in right {
                *left.entry(pair).or_insert(0) += count;
            }
            left
        })
}

/// Highest frequency wins; ties go to the lexicographically smallest
/// `(left, right)` symbol strings so the result never depends on map order.
fn select_best_pair(
    counts: &HashMap<(TokenId, TokenId), u64>,
    vocab: &Vocabulary,
) -> Option<((TokenId, TokenId), u64)> {
    let key = |pair: (TokenId, TokenId)| {
        (
            vocab.id_to_token(pair.0).unwrap_or_default(),
            vocab.id_to_token(pair.1).unwrap_or_default(),
        )
    };

    let mut best: Option<((TokenId, TokenId), u64)> = None;
    for (&pair, &frequency) in counts {
        best = match best {
            Some((best_pair, best_freq))
                if best_freq > frequency || (best_freq == frequency && key(best_pair) <= key(pair)) =>
            {
                Some((best_pair, best_freq))
            }
            _ => Some((pair, frequency)),
        };
    }
    best
}

fn symbol_str(vocab: &Vocabulary, id: TokenId) -> Result<&str> {
    vocab
        .id_to_token(id)
        .ok_or_else(|| Error::Validation(format!("symbol id {id} missing from vocabulary")))
}

/// Trains on an in-memory corpus, assembles the tokenizer described by `cfg`
/// and writes every configured artifact.
pub fn train_from_corpus<I, S, F>(cfg: &Config, corpus: I, should_stop: F) -> Result<Tokenizer>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
    F: Fn() -> bool + Sync,
{
    let counts = BpeTrainer::from_config(cfg).count_words(corpus);
    train_from_word_counts(cfg, counts, should_stop)
}

fn train_from_word_counts<F>(cfg: &Config, counts: HashMap<String, u64>, should_stop: F) -> Result<Tokenizer>
where
    F: Fn() -> bool + Sync,
{
    let trainer = BpeTrainer::from_config(cfg);
    let num_threads = cfg.training.as_ref().and_then(|t| t.num_threads);

    let trained = match num_threads {
        Some(threads) => {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(threads)
                .build()
                .map_err(|e| Error::Validation(format!("unable to build training thread pool: {e}")))?;
            pool.install(|| trainer.train_from_counts(counts, &should_stop))?
        }
        None => trainer.train_from_counts(counts, &should_stop)?,
    };

    let tokenizer = assemble(cfg, trained)?;
    save_artifacts(cfg, &tokenizer)?;
    Ok(tokenizer)
}

/// Same as [`train_from_corpus`] but streams lines from `training.inputs`.
pub fn train_from_files<F>(cfg: &Config, should_stop: F) -> Result<Tokenizer>
where
    F: Fn() -> bool + Sync,
{
    let training_cfg = cfg.training.as_ref().ok_or(Error::InvalidConfig(
        "training section required when training from files",
    ))?;

    if training_cfg.inputs.is_empty() {
        return Err(Error::InvalidConfig(
            "training inputs must contain at least one path",
        ));
    }

    for path in &training_cfg.inputs {
        if !path.is_file() {
            return Err(Error::Artifact(format!(
                "training input not found at {}",
                path.display()
            )));
        }
    }

    let mut corpus = CorpusIterator::new(training_cfg.inputs.clone(), training_cfg.max_lines);
    let counts = BpeTrainer::from_config(cfg).count_words(corpus.by_ref());
    if let Some(err) = corpus.take_error() {
        return Err(err);
    }
    info!("bpe: read {} lines from {} input(s)", corpus.produced, training_cfg.inputs.len());

    train_from_word_counts(cfg, counts, should_stop)
}

pub(crate) fn assemble(cfg: &Config, trained: TrainedModel) -> Result<Tokenizer> {
    let post = match cfg.postprocessor.as_ref() {
        Some(post_cfg) => maybe_build_template(post_cfg, &trained.vocab)?,
        None => None,
    };
    let bpe = trained.into_bpe()?;
    Tokenizer::new(
        bpe,
        cfg.model.special_tokens.clone(),
        build_pretokenizer(&cfg.pretokenizer),
        post,
    )
}

fn save_artifacts(cfg: &Config, tokenizer: &Tokenizer) -> Result<()> {
    let mut extra_paths: Vec<PathBuf> = Vec::new();
    let base_dir = &cfg.artifacts.dir;
    if !base_dir.exists() {
        std::fs::create_dir_all(base_dir)?;
    }

    if let Some(tokenizer_path) = cfg
        .artifacts
        .tokenizer_json
        .as_ref()
        .map(|p| absolute_in_dir(base_dir, p.as_path()))
    {
        save_tokenizer_json(tokenizer, &tokenizer_path)?;
        info!("saved tokenizer to {}", tokenizer_path.display());
        extra_paths.push(tokenizer_path);
    }

    let vocab_path = cfg
        .artifacts
        .vocab_json
        .as_ref()
        .map(|p| absolute_in_dir(base_dir, p.as_path()));
    let merges_path = cfg
        .artifacts
        .merges_txt
        .as_ref()
        .map(|p| absolute_in_dir(base_dir, p.as_path()));

    match (vocab_path, merges_path) {
        (Some(vocab), Some(merges)) => {
            save_split_files(tokenizer, &vocab, &merges)?;
            extra_paths.push(vocab);
            extra_paths.push(merges);
        }
        (None, None) => {}
        _ => {
            return Err(Error::Artifact(
                "must provide both vocab_json and merges_txt when saving split artifacts".into(),
            ));
        }
    }

    if let Some(manifest_rel) = cfg.artifacts.manifest.as_ref() {
        let extra_refs: Vec<&Path> = extra_paths.iter().map(|p| p.as_path()).collect();
        let cfg_hash = compute_config_hash(cfg, &extra_refs)?;
        let created_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| Error::Artifact(format!("failed to compute timestamp: {e}")))?
            .as_secs();
        let manifest = ArtifactManifest {
            cfg_hash,
            created_at: format!("unix:{created_at}"),
            token_count: tokenizer.get_vocab_size(),
        };
        write_manifest(&absolute_in_dir(base_dir, manifest_rel.as_path()), &manifest)?;
    }

    Ok(())
}

pub(crate) fn absolute_in_dir(dir: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() || path.starts_with(dir) {
        path.to_path_buf()
    } else {
        dir.join(path)
    }
}

/// Lines from a list of text files, one file at a time. The first read error
/// ends the stream and is kept for [`CorpusIterator::take_error`].
struct CorpusIterator {
    files: VecDeque<PathBuf>,
    current: Option<BufReader<File>>,
    max_lines: Option<usize>,
    produced: usize,
    error: Option<Error>,
}

impl CorpusIterator {
    fn new(inputs: Vec<PathBuf>, max_lines: Option<usize>) -> Self {
        Self {
            files: VecDeque::from(inputs),
            current: None,
            max_lines,
            produced: 0,
            error: None,
        }
    }

    fn take_error(&mut self) -> Option<Error> {
        self.error.take()
    }

    fn should_finish(&self) -> bool {
        matches!(self.max_lines, Some(limit) if self.produced >= limit)
    }

    fn next_line(&mut self) -> Result<Option<String>> {
        loop {
            if self.current.is_none() {
                match self.files.pop_front() {
                    Some(path) => self.current = Some(BufReader::new(File::open(&path)?)),
                    None => return Ok(None),
                }
            }
            let Some(reader) = self.current.as_mut() else {
                continue;
            };

            let mut line = String::new();
            if reader.read_line(&mut line)? == 0 {
                self.current = None;
                continue;
            }
            trim_line(&mut line);
            if !line.is_empty() {
                return Ok(Some(line));
            }
        }
    }
}

impl Iterator for CorpusIterator {
    type Item = String;

    fn next(&mut self) -> Option<Self::Item> {
        if self.error.is_some() || self.should_finish() {
            return None;
        }

        match self.next_line() {
            Ok(Some(line)) => {
                self.produced += 1;
                Some(line)
            }
            Ok(None) => None,
            Err(err) => {
                self.error = Some(err);
                None
            }
        }
    }
}

fn trim_line(line: &mut String) {
    while line.ends_with(['\r', '\n']) {
        line.pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn specials() -> Vec<String> {
        ["<pad>", "<unk>", "<bos>", "<eos>"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    fn trainer(vocab_size: usize, min_frequency: u64) -> BpeTrainer {
        BpeTrainer::new(vocab_size, min_frequency, specials(), "<unk>".into())
    }

    #[test]
    fn counts_distinct_words() {
        let counts = trainer(100, 1).count_words(["ev ev", "evler ev"]);
        assert_eq!(counts.get("ev"), Some(&3));
        assert_eq!(counts.get("evler"), Some(&1));
        assert_eq!(counts.len(), 2);
    }

    #[test]
    fn worked_example_first_merge_is_e_v() {
        let model = trainer(100, 1).train(["ev", "ev", "evler"]).unwrap();
        let base: Vec<&str> = model.vocab.tokens()[4..8].iter().map(String::as_str).collect();
        assert_eq!(base, vec!["e", "l", "r", "v"]);

        let first = model.merges[0];
        assert_eq!(first.rank, 0);
        assert_eq!(model.vocab.id_to_token(first.left), Some("e"));
        assert_eq!(model.vocab.id_to_token(first.right), Some("v"));
        assert_eq!(model.vocab.id_to_token(first.merged), Some("ev"));

        // Frequency floor 1 lets the remaining chain of "evler" merge down.
        assert!(model.vocab.contains("evler"));
        assert_eq!(model.stop_reason, StopReason::NoPairsLeft);
    }

    #[test]
    fn min_frequency_stops_training() {
        let model = trainer(100, 2).train(["ev", "ev", "evler"]).unwrap();
        assert_eq!(model.merges.len(), 1);
        assert_eq!(model.stop_reason, StopReason::BelowMinFrequency);
    }

    #[test]
    fn vocab_size_caps_growth() {
        // 4 specials + 4 base symbols leave room for exactly one merge.
        let model = trainer(9, 1).train(["ev", "ev", "evler"]).unwrap();
        assert_eq!(model.vocab.len(), 9);
        assert_eq!(model.merges.len(), 1);
        assert_eq!(model.stop_reason, StopReason::VocabSizeReached);
    }

    #[test]
    fn ties_break_on_symbol_strings() {
        // (a,b) and (c,d) both occur twice; "a" < "c" decides.
        let model = trainer(100, 1).train(["ab cd", "cd ab"]).unwrap();
        let first = model.merges[0];
        assert_eq!(model.vocab.id_to_token(first.merged), Some("ab"));
    }

    #[test]
    fn alphabet_is_truncated_to_fit_budget() {
        // Room for 2 base symbols: 'a' (3x) and 'b' (2x) survive, 'c' becomes unknown.
        let model = trainer(6, 1).train(["aaa bb c"]).unwrap();
        assert_eq!(model.vocab.len(), 6);
        assert!(model.vocab.contains("a"));
        assert!(model.vocab.contains("b"));
        assert!(!model.vocab.contains("c"));
        assert!(model.merges.is_empty());
    }

    #[test]
    fn special_tokens_never_merge() {
        let model = trainer(100, 1).train(["<unk> <unk>"]).unwrap();
        for rule in &model.merges {
            assert!(rule.left as usize >= model.special_count);
            assert!(rule.right as usize >= model.special_count);
            assert!(rule.merged as usize >= model.special_count);
        }
        assert_eq!(&model.vocab.tokens()[..4], specials().as_slice());
        assert!(model.into_bpe().is_ok());
    }

    #[test]
    fn cancellation_is_reported() {
        let err = trainer(100, 1).train_with_shutdown(["ev ev"], || true).unwrap_err();
        assert!(matches!(err, Error::Cancelled { merges: 0 }));
    }

    #[test]
    fn rejects_missing_unk_token() {
        let err = BpeTrainer::new(100, 1, vec!["<pad>".into()], "<unk>".into())
            .train(["ev"])
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }
}
