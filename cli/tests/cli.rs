use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use tempfile::TempDir;

const CORPUS: &str = "ev evler evlerde evimiz
bu ev çok güzel
kitap kitaplar kitaplık
okul okullar okulda öğrenciler
öğrenciler kitapları okuyor
çocuklar bahçede oynuyor
evde kitap okumak güzel
";

fn write_config(dir: &Path, vocab_size: usize) -> std::path::PathBuf {
    fs::write(dir.join("corpus.txt"), CORPUS).unwrap();
    let config = format!(
        r#"
[tokenizer.model]
vocab_size = {vocab_size}
min_frequency = 1
special_tokens = ["<pad>", "<unk>", "<bos>", "<eos>"]

[tokenizer.postprocessor]

[tokenizer.training]
inputs = ["corpus.txt"]
num_threads = 2

[tokenizer.artifacts]
dir = "artifacts"
tokenizer_json = "tokenizer.json"
manifest = "manifest.json"

[evaluation]
samples = ["evler güzel", "kitaplar okulda"]
"#
    );
    let path = dir.join("pipeline.toml");
    fs::write(&path, config).unwrap();
    path
}

fn train_tokenizer(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_train-tokenizer"))
        .args(args)
        .env("RUST_LOG", "warn")
        .output()
        .unwrap()
}

#[test]
fn trains_saves_and_verifies_from_line_inputs() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path(), 80);

    let output = train_tokenizer(&["--config", config.to_str().unwrap()]);
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let artifact = dir.path().join("artifacts").join("tokenizer.json");
    let value: serde_json::Value = serde_json::from_slice(&fs::read(artifact).unwrap()).unwrap();
    assert_eq!(value["version"], 1);
    assert!(value["model"]["vocab"].as_array().unwrap().len() <= 80);
    assert!(dir.path().join("artifacts").join("manifest.json").exists());
}

#[test]
fn overrides_reach_the_trainer() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path(), 80);

    let output = train_tokenizer(&[
        "--config",
        config.to_str().unwrap(),
        "--override",
        "tokenizer.model.vocab_size=30",
        "--skip-eval",
    ]);
    assert!(output.status.success());

    let artifact = dir.path().join("artifacts").join("tokenizer.json");
    let value: serde_json::Value = serde_json::from_slice(&fs::read(artifact).unwrap()).unwrap();
    assert!(value["model"]["vocab"].as_array().unwrap().len() <= 30);
}

const RAW_TURKISH: &str = "Bu akşam arkadaşlarımla birlikte şehrin en güzel restoranında yemek yiyeceğiz ve sonra sinemaya gideceğiz.
Öğrenciler kütüphanede sessizce çalışıyor, öğretmenler ise yarınki sınavın sorularını hazırlıyorlardı.
Bu akşam arkadaşlarımla birlikte şehrin en güzel restoranında yemek yiyeceğiz ve sonra sinemaya gideceğiz.
The quick brown fox jumps over the lazy dog while the children are playing in the garden.
Çocuklar bahçede oynarken annesi mutfakta çay demliyor ve komşularına börek hazırlıyordu.
İstanbul'un tarihi yarımadasında yürüyüş yapmak, güzel havalarda herkesin çok hoşuna gidiyor.
";

fn write_data_config(dir: &Path) -> std::path::PathBuf {
    fs::create_dir_all(dir.join("raw")).unwrap();
    fs::write(dir.join("raw").join("part-000.txt"), RAW_TURKISH).unwrap();
    let config = r#"
corpus_output = "clean/corpus.txt"

[data]
text_dir = "raw"
target_language = "tur"
worker_count = 2
batch_size = 2

[tokenizer.model]
vocab_size = 120
min_frequency = 1
special_tokens = ["<pad>", "<unk>", "<bos>", "<eos>"]

[tokenizer.postprocessor]

[tokenizer.artifacts]
dir = "artifacts"
tokenizer_json = "tokenizer.json"

[evaluation]
samples = ["güzel bir akşam", "öğrenciler çalışıyor"]
"#;
    let path = dir.join("pipeline.toml");
    fs::write(&path, config).unwrap();
    path
}

#[test]
fn cleans_raw_text_then_trains_and_verifies() {
    let dir = TempDir::new().unwrap();
    let config = write_data_config(dir.path());

    let output = train_tokenizer(&["--config", config.to_str().unwrap()]);
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let corpus = fs::read_to_string(dir.path().join("clean").join("corpus.txt")).unwrap();
    let lines: Vec<&str> = corpus.lines().collect();
    assert!((1..=4).contains(&lines.len()), "{corpus}");
    assert!(lines.iter().all(|line| !line.contains("quick brown")));
    assert_eq!(
        lines.iter().filter(|line| line.starts_with("Bu akşam")).count(),
        1
    );

    let artifact = dir.path().join("artifacts").join("tokenizer.json");
    let value: serde_json::Value = serde_json::from_slice(&fs::read(artifact).unwrap()).unwrap();
    assert!(value["model"]["vocab"].as_array().unwrap().len() <= 120);
}

#[test]
fn invalid_config_exits_non_zero_before_training() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path(), 3);

    let output = train_tokenizer(&["--config", config.to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("vocab_size"), "{stderr}");
    assert!(!dir.path().join("artifacts").join("tokenizer.json").exists());
}

#[test]
fn unreadable_config_exits_non_zero() {
    let dir = TempDir::new().unwrap();
    let output = train_tokenizer(&[
        "--config",
        dir.path().join("missing.toml").to_str().unwrap(),
    ]);
    assert_eq!(output.status.code(), Some(1));
}
