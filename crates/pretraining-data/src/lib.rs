//! Corpus ingestion for tokenizer pretraining.
//!
//! Records are streamed from columnar and line files ([`corpora`]), cleaned in
//! parallel batches behind a language gate ([`preprocessing`], [`dispatcher`])
//! and reduced through a run-wide exact-duplicate filter ([`dedup`]). The
//! accepted texts are handed to a caller-supplied sink in arrival order.

pub mod corpora;
pub mod dedup;
pub mod dispatcher;
pub mod errors;
pub mod language;
pub mod preprocessing;

use std::sync::Arc;

use log::info;

pub use corpora::{CorpusSources, CorpusStream, RawRecord, SourceRef, StreamStats, TextCorpus};
pub use dedup::Deduplicator;
pub use dispatcher::{clean_sequential, BatchDispatcher, Batches, DispatchReport};
pub use errors::{DataError, Result};
pub use language::{Detection, LanguageIdentifier, WhatlangIdentifier};
pub use preprocessing::{
    get_corpus_stats, write_corpus, CleanedText, CorpusStats, PreprocessConfig, TextCleaner,
};

/// Outcome of a full ingest-clean-dedup pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineReport {
    pub stream: StreamStats,
    pub dispatch: DispatchReport,
}

/// Discovers the configured sources and runs them through cleaning and
/// deduplication, calling `sink` once per accepted text. A single worker runs
/// inline on the calling thread.
pub fn run_pipeline<S, F>(
    cfg: &PreprocessConfig,
    identifier: Arc<dyn LanguageIdentifier>,
    should_stop: S,
    sink: F,
) -> Result<PipelineReport>
where
    S: Fn() -> bool,
    F: FnMut(String),
{
    cfg.validate()?;
    let sources = CorpusSources::discover(
        cfg.columnar_dir.as_deref(),
        cfg.text_dir.as_deref(),
        cfg.text_column.clone(),
    )?;
    let cleaner = Arc::new(TextCleaner::from_config(cfg, identifier)?);
    run_sources(cfg, &sources, cleaner, should_stop, sink)
}

/// Same as [`run_pipeline`] over an already assembled source list.
pub fn run_sources<C, S, F>(
    cfg: &PreprocessConfig,
    corpus: &C,
    cleaner: Arc<TextCleaner>,
    should_stop: S,
    sink: F,
) -> Result<PipelineReport>
where
    C: TextCorpus<Stream = CorpusStream>,
    S: Fn() -> bool,
    F: FnMut(String),
{
    let mut stream = corpus.stream()?;
    let mut dedup = Deduplicator::new();

    let workers = cfg.workers();
    let dispatch = if workers == 1 {
        clean_sequential(&mut stream, &cleaner, cfg.batch_size, &mut dedup, should_stop, sink)?
    } else {
        info!("pipeline: cleaning with {workers} workers");
        BatchDispatcher::from_config(cfg)?.run(&mut stream, cleaner, &mut dedup, should_stop, sink)?
    };

    let report = PipelineReport {
        stream: stream.stats(),
        dispatch,
    };
    info!(
        "pipeline: {} file(s) read, {} skipped, {} texts accepted",
        report.stream.files_opened, report.stream.files_skipped, report.dispatch.accepted
    );
    Ok(report)
}
