use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use pretraining_data::PreprocessConfig;
use serde::{Deserialize, Serialize};

/// Full run description: where the corpus comes from, how the tokenizer is
/// trained and saved, and what the post-save sanity check looks at.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Raw sources to clean and deduplicate. Without it the tokenizer trains
    /// from `tokenizer.training.inputs`, which are taken as already clean.
    #[serde(default)]
    pub data: Option<PreprocessConfig>,
    /// Optional copy of the deduplicated corpus as a line file.
    #[serde(default)]
    pub corpus_output: Option<PathBuf>,
    pub tokenizer: tokenizer::Config,
    #[serde(default)]
    pub evaluation: EvaluationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationConfig {
    /// Sentences whose tokens are logged after reload.
    #[serde(default = "default_samples")]
    pub samples: Vec<String>,
    /// Line file measured for unknown-token coverage; the samples are used
    /// when it is absent.
    #[serde(default)]
    pub validation_file: Option<PathBuf>,
    #[serde(default)]
    pub max_validation_lines: Option<usize>,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            samples: default_samples(),
            validation_file: None,
            max_validation_lines: None,
        }
    }
}

impl EvaluationConfig {
    pub fn validation_sentences(&self) -> Result<Vec<String>> {
        let Some(path) = &self.validation_file else {
            return Ok(self.samples.clone());
        };
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read validation file {}", path.display()))?;
        let limit = self.max_validation_lines.unwrap_or(usize::MAX);
        Ok(contents
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .take(limit)
            .map(str::to_owned)
            .collect())
    }
}

impl PipelineConfig {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let mut config: PipelineConfig = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => serde_json::from_str(&contents)
                .with_context(|| format!("failed to parse {}", path.display()))?,
            Some("toml") | Some("tml") | None => toml::from_str(&contents)
                .with_context(|| format!("failed to parse {}", path.display()))?,
            Some(other) => bail!("unsupported configuration extension '{other}'"),
        };

        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        config.apply_base_path(base_dir);
        Ok(config)
    }

    fn apply_base_path(&mut self, base: &Path) {
        self.tokenizer.apply_base_path(base);
        if let Some(data) = self.data.as_mut() {
            data.apply_base_path(base);
        }
        for path in [&mut self.corpus_output, &mut self.evaluation.validation_file]
            .into_iter()
            .flatten()
        {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
    }

    /// Reports every problem across all sections at once.
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if let Err(err) = tokenizer::validate_config(&self.tokenizer) {
            errors.push(err.to_string());
        }
        match &self.data {
            Some(data) => {
                if let Err(err) = data.validate() {
                    errors.push(err.to_string());
                }
            }
            None => {
                let has_inputs = self
                    .tokenizer
                    .training
                    .as_ref()
                    .is_some_and(|training| !training.inputs.is_empty());
                if !has_inputs {
                    errors.push(
                        "either [data] or tokenizer.training.inputs must name a corpus".to_string(),
                    );
                }
            }
        }
        if self.evaluation.samples.is_empty() && self.evaluation.validation_file.is_none() {
            errors.push("evaluation needs samples or a validation_file".to_string());
        }

        if !errors.is_empty() {
            bail!("invalid configuration: {}", errors.join("; "));
        }
        Ok(())
    }
}

fn default_samples() -> Vec<String> {
    [
        "Merhaba dünya, bugün hava çok güzel.",
        "Türkiye'nin başkenti Ankara'dır.",
        "Çocuklar bahçede oyun oynuyorlar.",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
