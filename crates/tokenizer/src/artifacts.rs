use crate::config::{ArtifactsCfg, Config};
use crate::errors::{context, Error, Result};
use crate::tokenizer::{Tokenizer, TokenizerArtifact, ARTIFACT_VERSION};
use crate::types::{ArtifactManifest, ArtifactPaths, MergeRule, TokenId, Vocabulary};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

const TOKENIZER_JSON_ERR: &str = "tokenizer json not found at";
const VOCAB_JSON_ERR: &str = "vocab json not found at";
const MERGES_TXT_ERR: &str = "merges txt not found at";
const MANIFEST_ERR: &str = "manifest not found at";
const MERGES_HEADER: &str = "#version: 0.2";

#[derive(Deserialize)]
struct VersionHeader {
    version: u32,
}

pub fn load_tokenizer_from_json(path: &Path) -> Result<Tokenizer> {
    ensure_file(path, TOKENIZER_JSON_ERR)?;
    let bytes = fs::read(path)?;

    // Check the version before the full parse so a newer layout reports as such.
    let header: VersionHeader = serde_json::from_slice(&bytes)?;
    if header.version != ARTIFACT_VERSION {
        return Err(Error::UnsupportedVersion {
            found: header.version,
            expected: ARTIFACT_VERSION,
        });
    }

    let artifact: TokenizerArtifact = serde_json::from_slice(&bytes)?;
    Tokenizer::from_artifact(artifact).map_err(|err| match err {
        Error::Validation(msg) => context(format!("{}: {msg}", path.display())),
        other => other,
    })
}

pub fn save_tokenizer_json(tok: &Tokenizer, path: &Path) -> Result<()> {
    let artifact = tok.to_artifact();
    write_atomically(path, |writer| {
        serde_json::to_writer_pretty(&mut *writer, &artifact)?;
        writer.write_all(b"\n")?;
        Ok(())
    })
}

/// Reads a `{token: id}` vocabulary and a `left right` merges list.
pub fn load_bpe_from_vocab_merges(vocab: &Path, merges: &Path) -> Result<(Vocabulary, Vec<MergeRule>)> {
    ensure_file(vocab, VOCAB_JSON_ERR)?;
    ensure_file(merges, MERGES_TXT_ERR)?;

    let raw: HashMap<String, TokenId> = serde_json::from_reader(BufReader::new(File::open(vocab)?))?;
    let mut by_id: Vec<(TokenId, String)> = raw.into_iter().map(|(token, id)| (id, token)).collect();
    by_id.sort_unstable_by_key(|(id, _)| *id);
    for (expected, (id, _)) in by_id.iter().enumerate() {
        if *id as usize != expected {
            return Err(context(format!(
                "{}: vocabulary ids must be contiguous from 0 (missing id {expected})",
                vocab.display()
            )));
        }
    }
    let vocabulary = Vocabulary::from_tokens(by_id.into_iter().map(|(_, token)| token).collect())?;

    let reader = BufReader::new(File::open(merges)?);
    let mut rules = Vec::new();
    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim_end();
        if line.is_empty() || (line_no == 0 && line.starts_with("#version")) {
            continue;
        }

        let (left, right) = line.split_once(' ').ok_or_else(|| {
            context(format!("{}:{}: expected 'left right'", merges.display(), line_no + 1))
        })?;
        let lookup = |token: &str| {
            vocabulary.token_to_id(token).ok_or_else(|| {
                context(format!(
                    "{}:{}: token '{token}' not in vocabulary",
                    merges.display(),
                    line_no + 1
                ))
            })
        };
        let merged = format!("{left}{right}");
        rules.push(MergeRule {
            left: lookup(left)?,
            right: lookup(right)?,
            merged: lookup(&merged)?,
            rank: rules.len() as u32,
        });
    }

    Ok((vocabulary, rules))
}

pub fn save_split_files(tok: &Tokenizer, vocab_path: &Path, merges_path: &Path) -> Result<()> {
    let vocab = tok.get_vocab();
    write_atomically(vocab_path, |writer| {
        serde_json::to_writer_pretty(&mut *writer, &IdOrdered(vocab))?;
        writer.write_all(b"\n")?;
        Ok(())
    })?;

    write_atomically(merges_path, |writer| {
        writeln!(writer, "{MERGES_HEADER}")?;
        for rule in tok.get_merges() {
            let left = vocab.id_to_token(rule.left).unwrap_or_default();
            let right = vocab.id_to_token(rule.right).unwrap_or_default();
            writeln!(writer, "{left} {right}")?;
        }
        Ok(())
    })
}

/// Serializes a vocabulary as a `{token: id}` object in id order.
struct IdOrdered<'a>(&'a Vocabulary);

impl Serialize for IdOrdered<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (id, token) in self.0.iter() {
            map.serialize_entry(token, &id)?;
        }
        map.end()
    }
}

pub fn write_manifest(manifest_path: &Path, manifest: &ArtifactManifest) -> Result<()> {
    write_atomically(manifest_path, |writer| {
        serde_json::to_writer_pretty(&mut *writer, manifest)?;
        writer.write_all(b"\n")?;
        Ok(())
    })
}

pub fn read_manifest(manifest_path: &Path) -> Result<ArtifactManifest> {
    ensure_file(manifest_path, MANIFEST_ERR)?;
    let file = File::open(manifest_path)?;
    let reader = BufReader::new(file);
    let manifest = serde_json::from_reader(reader)?;
    Ok(manifest)
}

pub fn compute_config_hash(cfg: &Config, extra_paths: &[&Path]) -> Result<String> {
    let mut hasher = Sha256::new();
    let cfg_bytes = serde_json::to_vec(cfg)?;
    hasher.update(&cfg_bytes);

    let mut sorted = extra_paths.to_vec();
    sorted.sort_by(|a, b| a.as_os_str().cmp(b.as_os_str()));

    let mut buffer = [0u8; 8 * 1024];
    for path in sorted {
        ensure_file(path, "cannot hash missing file at")?;
        hasher.update(path.to_string_lossy().as_bytes());

        let mut reader = BufReader::new(File::open(path)?);
        loop {
            let read = reader.read(&mut buffer)?;
            if read == 0 {
                break;
            }
            hasher.update(&buffer[..read]);
        }
    }

    Ok(format!("{:x}", hasher.finalize()))
}

pub fn resolve_paths(cfg: &ArtifactsCfg) -> Result<ArtifactPaths> {
    let dir = cfg.dir.as_path();
    if !dir.is_dir() {
        return Err(context(format!(
            "artifact directory not found at {}",
            dir.display()
        )));
    }

    let resolve = |value: &Option<PathBuf>| -> Option<PathBuf> {
        value.as_ref().map(|path| {
            if path.is_absolute() {
                path.clone()
            } else {
                dir.join(path)
            }
        })
    };

    let tokenizer_json = resolve(&cfg.tokenizer_json);
    let vocab_json = resolve(&cfg.vocab_json);
    let merges_txt = resolve(&cfg.merges_txt);
    let manifest = resolve(&cfg.manifest);

    // A configured but unwritten tokenizer.json falls back to the split pair.
    let tokenizer_json = tokenizer_json.filter(|path| path.is_file() || vocab_json.is_none());
    if let Some(ref path) = tokenizer_json {
        ensure_file(path, TOKENIZER_JSON_ERR)?;
    }

    if tokenizer_json.is_none() {
        match (&vocab_json, &merges_txt) {
            (Some(vocab), Some(merges)) => {
                ensure_file(vocab, VOCAB_JSON_ERR)?;
                ensure_file(merges, MERGES_TXT_ERR)?;
            }
            (None, Some(path)) => {
                return Err(context(format!(
                    "vocab json path is required when merges txt is set (missing for {})",
                    path.display()
                )));
            }
            (Some(path), None) => {
                return Err(context(format!(
                    "merges txt path is required when vocab json is set (missing for {})",
                    path.display()
                )));
            }
            (None, None) => {
                return Err(context(
                    "artifacts must specify either tokenizer_json or both vocab_json and merges_txt",
                ));
            }
        }
    }

    Ok(ArtifactPaths {
        json: tokenizer_json,
        vocab: vocab_json,
        merges: merges_txt,
        manifest,
    })
}

/// Writes through a sibling `.tmp` file and renames it over `path`, so readers
/// never observe a partially written artifact.
fn write_atomically<F>(path: &Path, write: F) -> Result<()>
where
    F: FnOnce(&mut BufWriter<File>) -> Result<()>,
{
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
        }
    }

    let mut tmp_name = path
        .file_name()
        .ok_or_else(|| context(format!("artifact path has no file name: {}", path.display())))?
        .to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    let result = (|| -> Result<()> {
        let mut writer = BufWriter::new(File::create(&tmp_path)?);
        write(&mut writer)?;
        let file = writer
            .into_inner()
            .map_err(|e| Error::Io(e.into_error()))?;
        file.sync_all()?;
        fs::rename(&tmp_path, path)?;
        Ok(())
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp_path);
    }
    result
}

fn ensure_file(path: &Path, what: &str) -> Result<()> {
    if path.is_file() {
        Ok(())
    } else {
        Err(context(format!("{what} {}", path.display())))
    }
}
