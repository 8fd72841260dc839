#![cfg(feature = "train")]

use std::fs;
use std::path::Path;

use serde_json::Value;
use tokenizer::config::TrainingCfg;
use tokenizer::errors::Result;
use tokenizer::{
    build_from_artifacts, read_manifest, train_bpe, train_bpe_from_corpus, ArtifactsCfg, Config, ModelCfg, PostCfg,
    PreTokenizerCfg, PreTokenizerKind, Tokenizer,
};
use tokenizer::Error;

const SAMPLE_INPUTS: [&str; 4] = [
    "kelime düzeyinde test",
    "Unicode ☂ örneği",
    " boşluklu girdi ",
    "noktalama, işaretleri!",
];

#[test]
fn save_and_reload_tokenizer_json() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let cfg = config_for_serialization(tmp.path())?;
    let tok1 = train_bpe(&cfg)?;

    let tokenizer_path = cfg
        .artifacts
        .tokenizer_json
        .as_ref()
        .expect("tokenizer.json path configured");
    assert!(tokenizer_path.exists(), "tokenizer.json should exist after training");

    let tok2 = build_from_artifacts(&cfg)?;
    assert_tokenizers_equivalent(&tok1, &tok2, &SAMPLE_INPUTS);

    let tok3 = Tokenizer::from_file(tokenizer_path)?;
    assert_tokenizers_equivalent(&tok1, &tok3, &SAMPLE_INPUTS);
    Ok(())
}

#[test]
fn reload_from_vocab_and_merges() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let cfg = config_for_serialization(tmp.path())?;
    let tok1 = train_bpe(&cfg)?;

    let tokenizer_path = cfg
        .artifacts
        .tokenizer_json
        .as_ref()
        .expect("tokenizer.json path configured");
    fs::remove_file(tokenizer_path)?;

    let tok2 = build_from_artifacts(&cfg)?;
    assert_tokenizers_equivalent(&tok1, &tok2, &SAMPLE_INPUTS);
    assert_eq!(tok1.get_merges(), tok2.get_merges());
    Ok(())
}

#[test]
fn manifest_integrity_and_vocab_shape() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let cfg = config_for_serialization(tmp.path())?;
    let tok = train_bpe(&cfg)?;

    let manifest_path = cfg
        .artifacts
        .manifest
        .as_ref()
        .expect("manifest path configured");
    let manifest = read_manifest(manifest_path)?;
    assert_eq!(manifest.cfg_hash.len(), 64);
    assert!(manifest.created_at.starts_with("unix:"));
    assert_eq!(manifest.token_count, tok.get_vocab_size());

    let vocab_path = cfg
        .artifacts
        .vocab_json
        .as_ref()
        .expect("vocab path configured");
    let vocab_value: Value = serde_json::from_slice(&fs::read(vocab_path)?)?;
    let vocab = vocab_value.as_object().expect("vocab json should be an object");
    assert_eq!(vocab.len(), tok.get_vocab_size());
    assert!(vocab.len() <= cfg.model.vocab_size);
    for (id, special) in cfg.model.special_tokens.iter().enumerate() {
        assert_eq!(vocab.get(special).and_then(Value::as_u64), Some(id as u64));
    }

    let merges_path = cfg
        .artifacts
        .merges_txt
        .as_ref()
        .expect("merges path configured");
    let merges = fs::read_to_string(merges_path)?;
    let mut lines = merges.lines();
    assert_eq!(lines.next(), Some("#version: 0.2"));
    assert_eq!(lines.count(), tok.get_merges().len());
    Ok(())
}

#[test]
fn artifact_layout_is_versioned() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let cfg = config_for_serialization(tmp.path())?;
    train_bpe(&cfg)?;

    let tokenizer_path = tmp.path().join("tokenizer.json");
    let value: Value = serde_json::from_slice(&fs::read(&tokenizer_path)?)?;
    assert_eq!(value["version"], 1);
    assert_eq!(value["unk_token"], "<unk>");
    assert_eq!(value["pre_tokenizer"]["type"], "whitespace");
    assert_eq!(value["model"]["vocab"][0], "<pad>");
    let first_merge = value["model"]["merges"][0]
        .as_array()
        .expect("merge rules are arrays");
    assert_eq!(first_merge.len(), 4);
    assert_eq!(first_merge[3], 0);

    let mut bumped = value.clone();
    bumped["version"] = Value::from(2);
    fs::write(&tokenizer_path, serde_json::to_vec(&bumped)?)?;
    let err = build_from_artifacts(&cfg).unwrap_err();
    assert!(matches!(err, Error::UnsupportedVersion { found: 2, expected: 1 }));
    Ok(())
}

#[test]
fn stable_ids_for_specials() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let cfg = config_for_serialization(tmp.path())?;
    let tok1 = train_bpe(&cfg)?;
    let tok2 = build_from_artifacts(&cfg)?;

    for special in cfg.model.special_tokens.iter() {
        let id1 = tok1
            .token_to_id(special)
            .unwrap_or_else(|| panic!("missing special token {} in trained tokenizer", special));
        let id2 = tok2
            .token_to_id(special)
            .unwrap_or_else(|| panic!("missing special token {} in reloaded tokenizer", special));
        assert_eq!(id1, id2, "special token {} ID mismatch", special);
    }

    let bos_id = tok1.token_to_id("<bos>").expect("<bos> id exists");
    let eos_id = tok1.token_to_id("<eos>").expect("<eos> id exists");
    let encoding = tok2.encode("tutarlı özel belirteçler", true);
    let ids = encoding.get_ids();
    assert_eq!(ids.first().copied(), Some(bos_id));
    assert_eq!(ids.last().copied(), Some(eos_id));

    Ok(())
}

#[test]
fn word_punct_pretokenizer_survives_reload() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let mut cfg = config_for_serialization(tmp.path())?;
    cfg.pretokenizer.kind = PreTokenizerKind::WordPunct;
    let tok1 = train_bpe(&cfg)?;
    let tok2 = Tokenizer::from_file(tmp.path().join("tokenizer.json"))?;

    assert_eq!(tok2.pre_tokenizer().kind(), PreTokenizerKind::WordPunct);
    assert!(tok2.post_processor().is_some());
    assert_tokenizers_equivalent(&tok1, &tok2, &SAMPLE_INPUTS);
    let tokens = tok2.encode("işaretleri!", false);
    assert_eq!(tokens.get_tokens().last().map(String::as_str), Some("!"));
    Ok(())
}

#[test]
fn split_files_keep_merges_that_look_like_headers() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let mut cfg = config_for_serialization(tmp.path())?;
    cfg.artifacts.tokenizer_json = None;
    cfg.artifacts.manifest = None;

    let trained = train_bpe_from_corpus(&cfg, ["#version2 #version2 #version2"], || false)?;
    let reloaded = build_from_artifacts(&cfg)?;

    assert_eq!(trained.get_merges(), reloaded.get_merges());
    let encoding = reloaded.encode("#version2", false);
    assert_eq!(encoding.get_tokens(), &["#version2"]);
    assert_tokenizers_equivalent(&trained, &reloaded, &["#version2", "#version 2"]);
    Ok(())
}

fn assert_tokenizers_equivalent(tok1: &Tokenizer, tok2: &Tokenizer, samples: &[&str]) {
    for &sample in samples.iter() {
        compare_encoding(tok1, tok2, sample, false);
        compare_encoding(tok1, tok2, sample, true);
    }
}

fn compare_encoding(tok1: &Tokenizer, tok2: &Tokenizer, sample: &str, add_special_tokens: bool) {
    let enc1 = tok1.encode(sample, add_special_tokens);
    let enc2 = tok2.encode(sample, add_special_tokens);
    assert_eq!(enc1.get_ids(), enc2.get_ids());
    assert_eq!(
        tok1.decode(enc1.get_ids(), false),
        tok2.decode(enc2.get_ids(), false)
    );
}

fn config_for_serialization(tmp: &Path) -> Result<Config> {
    write_corpus(tmp)?;

    Ok(Config {
        model: ModelCfg {
            vocab_size: 96,
            min_frequency: 1,
            special_tokens: vec![
                "<pad>".to_string(),
                "<unk>".to_string(),
                "<bos>".to_string(),
                "<eos>".to_string(),
            ],
            unk_token: "<unk>".to_string(),
        },
        pretokenizer: PreTokenizerCfg::default(),
        postprocessor: Some(PostCfg {
            pair_template: false,
            ..PostCfg::default()
        }),
        training: Some(TrainingCfg {
            inputs: vec![tmp.join("corpus.txt")],
            max_lines: None,
            num_threads: Some(1),
            show_progress: false,
            log_every: 100,
        }),
        artifacts: ArtifactsCfg {
            dir: tmp.to_path_buf(),
            tokenizer_json: Some(tmp.join("tokenizer.json")),
            vocab_json: Some(tmp.join("vocab.json")),
            merges_txt: Some(tmp.join("merges.txt")),
            manifest: Some(tmp.join("manifest.json")),
        },
    })
}

fn write_corpus(dir: &Path) -> Result<()> {
    let path = dir.join("corpus.txt");
    let contents = [
        "kelime düzeyinde kelime düzeyinde",
        "bu metni belirteçlere ayır",
        "bilinmeyen ☂ işaretler sorun değil",
        "noktalama, işaretleri! tutarlı özel",
    ]
    .join("\n");
    fs::write(path, contents + "\n")?;
    Ok(())
}
