use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_UNK_TOKEN: &str = "<unk>";
pub const DEFAULT_BOS_TOKEN: &str = "<bos>";
pub const DEFAULT_EOS_TOKEN: &str = "<eos>";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub model: ModelCfg,
    #[serde(default)]
    pub pretokenizer: PreTokenizerCfg,
    #[serde(default)]
    pub postprocessor: Option<PostCfg>,
    #[cfg(feature = "train")]
    #[serde(default)]
    pub training: Option<TrainingCfg>,
    pub artifacts: ArtifactsCfg,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelCfg {
    pub vocab_size: usize,
    #[serde(default = "default_min_frequency")]
    pub min_frequency: u64,
    pub special_tokens: Vec<String>,
    #[serde(default = "default_unk_token")]
    pub unk_token: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreTokenizerKind {
    /// Split on runs of Unicode whitespace.
    #[default]
    Whitespace,
    /// Split words and punctuation runs apart, dropping whitespace.
    WordPunct,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PreTokenizerCfg {
    #[serde(default)]
    pub kind: PreTokenizerKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostCfg {
    #[serde(default = "default_true")]
    pub add_bos: bool,
    #[serde(default = "default_true")]
    pub add_eos: bool,
    #[serde(default = "default_true")]
    pub pair_template: bool,
    #[serde(default = "default_bos_token")]
    pub bos_token: String,
    #[serde(default = "default_eos_token")]
    pub eos_token: String,
}

impl Default for PostCfg {
    fn default() -> Self {
        Self {
            add_bos: true,
            add_eos: true,
            pair_template: true,
            bos_token: default_bos_token(),
            eos_token: default_eos_token(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactsCfg {
    pub dir: PathBuf,
    #[serde(default)]
    pub tokenizer_json: Option<PathBuf>,
    #[serde(default)]
    pub vocab_json: Option<PathBuf>,
    #[serde(default)]
    pub merges_txt: Option<PathBuf>,
    #[serde(default)]
    pub manifest: Option<PathBuf>,
}

#[cfg(feature = "train")]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrainingCfg {
    #[serde(default)]
    pub inputs: Vec<PathBuf>,
    #[serde(default)]
    pub max_lines: Option<usize>,
    #[serde(default)]
    pub num_threads: Option<usize>,
    #[serde(default)]
    pub show_progress: bool,
    #[serde(default = "default_log_every")]
    pub log_every: usize,
}

impl Config {
    /// Resolves relative artifact and input paths against `base`, usually
    /// the directory of the file the config was read from.
    pub fn apply_base_path(&mut self, base: &Path) {
        if self.artifacts.dir.is_relative() {
            self.artifacts.dir = base.join(&self.artifacts.dir);
        }
        self.resolve_training_inputs(base);
    }

    #[cfg(feature = "train")]
    fn resolve_training_inputs(&mut self, base: &Path) {
        if let Some(training) = self.training.as_mut() {
            for input in training.inputs.iter_mut() {
                if input.is_relative() {
                    *input = base.join(&*input);
                }
            }
        }
    }

    #[cfg(not(feature = "train"))]
    fn resolve_training_inputs(&mut self, _base: &Path) {}
}

fn default_min_frequency() -> u64 {
    2
}

fn default_unk_token() -> String {
    DEFAULT_UNK_TOKEN.to_owned()
}

fn default_bos_token() -> String {
    DEFAULT_BOS_TOKEN.to_owned()
}

fn default_eos_token() -> String {
    DEFAULT_EOS_TOKEN.to_owned()
}

fn default_true() -> bool {
    true
}

#[cfg(feature = "train")]
fn default_log_every() -> usize {
    1000
}
