mod config;
mod overrides;
mod telemetry;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use env_logger::Env;
use log::{info, warn, LevelFilter};
use pretraining_data::{run_pipeline, write_corpus, WhatlangIdentifier};
use tokenizer::{
    build_from_artifacts, coverage_testing, tokenize_samples, train_bpe_from_corpus,
    train_bpe_with_shutdown, Tokenizer,
};

use crate::config::PipelineConfig;
use crate::overrides::{apply_overrides, OverrideArg};
use crate::telemetry::StageClock;

fn main() {
    if let Err(err) = run() {
        eprintln!("train-tokenizer failed: {err:#}");
        std::process::exit(1);
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Clean a corpus, train a BPE tokenizer, save and verify it", long_about = None)]
struct Args {
    #[arg(
        short,
        long,
        value_name = "PATH",
        help = "Path to pipeline config file (TOML or JSON)"
    )]
    config: PathBuf,

    #[arg(
        long = "override",
        value_name = "KEY=VALUE",
        help = "Override configuration value using dot-separated paths"
    )]
    overrides: Vec<OverrideArg>,

    #[arg(long, help = "Stop after saving; skip the reload and evaluation checks")]
    skip_eval: bool,

    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[arg(short, long, action = clap::ArgAction::Count, conflicts_with = "verbose")]
    quiet: u8,
}

fn run() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    let config = PipelineConfig::from_path(&args.config)?;
    let config = apply_overrides(config, &args.overrides)?;
    config.validate()?;

    let shutdown = Arc::new(AtomicBool::new(false));
    let handler_flag = shutdown.clone();
    ctrlc::set_handler(move || {
        handler_flag.store(true, Ordering::Relaxed);
    })
    .context("failed to install signal handler")?;
    let should_stop = || shutdown.load(Ordering::Relaxed);

    let mut clock = StageClock::start();
    let trained = match &config.data {
        Some(data) => {
            let mut corpus = Vec::new();
            run_pipeline(data, Arc::new(WhatlangIdentifier), should_stop, |text| {
                corpus.push(text)
            })
            .context("corpus preparation failed")?;
            clock.finish("cleaning");

            if corpus.is_empty() {
                bail!("no text survived cleaning; nothing to train on");
            }
            if let Some(path) = &config.corpus_output {
                write_corpus(path, &corpus)
                    .with_context(|| format!("failed to write {}", path.display()))?;
            }

            train_bpe_from_corpus(&config.tokenizer, &corpus, should_stop)
        }
        None => train_bpe_with_shutdown(&config.tokenizer, should_stop),
    }
    .context("tokenizer training failed")?;
    clock.finish("training");
    info!(
        "trained {} tokens with {} merges into {}",
        trained.get_vocab_size(),
        trained.get_merges().len(),
        config.tokenizer.artifacts.dir.display()
    );

    if args.skip_eval {
        warn!("skipping reload and evaluation");
        return Ok(());
    }

    let reloaded = build_from_artifacts(&config.tokenizer)
        .context("saved tokenizer failed to reload")?;
    verify_reload(&trained, &reloaded, &config.evaluation.samples)?;

    tokenize_samples(&reloaded, &config.evaluation.samples);
    let validation = config.evaluation.validation_sentences()?;
    let report = coverage_testing(&reloaded, &validation);
    clock.finish("evaluation");

    if report.total_tokens > 0 && report.coverage < 50.0 {
        warn!(
            "low coverage: {:.2}% of validation tokens are known",
            report.coverage
        );
    }
    Ok(())
}

/// The saved artifact has to tokenize exactly like the in-memory result.
fn verify_reload(trained: &Tokenizer, reloaded: &Tokenizer, samples: &[String]) -> Result<()> {
    if trained.get_vocab_size() != reloaded.get_vocab_size()
        || trained.get_merges() != reloaded.get_merges()
    {
        bail!("reloaded tokenizer differs from the trained one");
    }
    for sample in samples {
        if trained.encode(sample, true) != reloaded.encode(sample, true) {
            bail!("reloaded tokenizer encodes {sample:?} differently");
        }
    }
    Ok(())
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
