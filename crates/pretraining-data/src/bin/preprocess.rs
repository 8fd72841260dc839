use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use env_logger::Env;
use log::{info, LevelFilter};
use pretraining_data::{
    get_corpus_stats, run_pipeline, DataError, PreprocessConfig, WhatlangIdentifier,
};

fn main() {
    if let Err(err) = run() {
        eprintln!("preprocessing failed: {err:#}");
        std::process::exit(1);
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Clean and deduplicate a corpus into a line file", long_about = None)]
struct Args {
    /// TOML or JSON file holding a `PreprocessConfig`; flags override its values.
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    #[arg(long, value_name = "DIR", help = "Directory of *.parquet files")]
    columnar_dir: Option<PathBuf>,

    #[arg(long, value_name = "DIR", help = "Directory of *.txt files")]
    text_dir: Option<PathBuf>,

    #[arg(short, long, value_name = "PATH", help = "Where to write the cleaned corpus")]
    output: PathBuf,

    #[arg(long)]
    text_column: Option<String>,

    #[arg(long)]
    target_language: Option<String>,

    #[arg(long)]
    batch_size: Option<usize>,

    #[arg(long)]
    workers: Option<usize>,

    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[arg(short, long, action = clap::ArgAction::Count, conflicts_with = "verbose")]
    quiet: u8,
}

fn run() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    let cfg = resolve_config(&args)?;
    cfg.validate().context("invalid preprocessing configuration")?;

    let shutdown = Arc::new(AtomicBool::new(false));
    let handler_flag = shutdown.clone();
    ctrlc::set_handler(move || handler_flag.store(true, Ordering::Relaxed))
        .context("failed to install signal handler")?;

    if let Some(parent) = args.output.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let file = fs::File::create(&args.output)
        .with_context(|| format!("failed to create {}", args.output.display()))?;
    let mut writer = BufWriter::new(file);
    let mut write_error = None;

    let outcome = run_pipeline(
        &cfg,
        Arc::new(WhatlangIdentifier),
        || shutdown.load(Ordering::Relaxed),
        |text| {
            if write_error.is_none() {
                if let Err(err) = writeln!(writer, "{text}") {
                    write_error = Some(err);
                }
            }
        },
    );

    if let Some(err) = write_error {
        return Err(err).with_context(|| format!("failed to write {}", args.output.display()));
    }
    writer.flush()?;

    match outcome {
        Ok(report) => {
            if report.dispatch.accepted == 0 {
                bail!("no text survived cleaning; check source directories and target language");
            }
        }
        Err(DataError::Cancelled { batches }) => {
            drop(writer);
            let _ = fs::remove_file(&args.output);
            bail!("interrupted after {batches} batches; partial output removed");
        }
        Err(err) => return Err(err.into()),
    }

    let stats = get_corpus_stats(&args.output)?;
    info!(
        "corpus written to {}: {} lines, {} words, {} chars",
        stats.output_path.display(),
        stats.total_lines,
        stats.total_words,
        stats.total_chars
    );
    Ok(())
}

fn resolve_config(args: &Args) -> Result<PreprocessConfig> {
    let mut cfg = match &args.config {
        Some(path) => load_config(path)?,
        None => PreprocessConfig::default(),
    };

    if let Some(dir) = &args.columnar_dir {
        cfg.columnar_dir = Some(dir.clone());
    }
    if let Some(dir) = &args.text_dir {
        cfg.text_dir = Some(dir.clone());
    }
    if let Some(column) = &args.text_column {
        cfg.text_column = column.clone();
    }
    if let Some(language) = &args.target_language {
        cfg.target_language = language.clone();
    }
    if let Some(size) = args.batch_size {
        cfg.batch_size = size;
    }
    if let Some(workers) = args.workers {
        cfg.worker_count = Some(workers);
    }
    Ok(cfg)
}

fn load_config(path: &Path) -> Result<PreprocessConfig> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let mut cfg: PreprocessConfig = match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => serde_json::from_str(&contents)?,
        _ => toml::from_str(&contents)?,
    };
    if let Some(base) = path.parent() {
        cfg.apply_base_path(base);
    }
    Ok(cfg)
}

fn init_logging(verbose: u8, quiet: u8) {
    let level = match (quiet, verbose) {
        (0, 0) => LevelFilter::Info,
        (0, 1) => LevelFilter::Debug,
        (0, _) => LevelFilter::Trace,
        (1, _) => LevelFilter::Warn,
        _ => LevelFilter::Error,
    };

    let mut builder = env_logger::Builder::from_env(Env::default().default_filter_or("info"));
    builder.format_timestamp_millis();
    builder.filter_level(level);
    let _ = builder.try_init();
}
