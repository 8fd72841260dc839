//! Fan-out of cleaning work over a thread pool and fan-in through the
//! deduplication reducer.
//!
//! Ingestion and admission stay on the calling thread. Workers only ever see
//! their own batch and send the cleaned result back over a bounded channel, so
//! the digest set has exactly one writer. At most `max_in_flight` batches are
//! outstanding; once that many are queued the caller blocks on the next result
//! before reading more input.

use crate::corpora::RawRecord;
use crate::dedup::Deduplicator;
use crate::errors::{DataError, Result};
use crate::preprocessing::{CleanedText, PreprocessConfig, TextCleaner};
use log::{debug, error, info, warn};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::sync_channel;
use std::sync::Arc;
use std::time::Instant;

/// Groups a record stream into fixed-size batches; the last one may be short.
pub struct Batches<I> {
    inner: I,
    size: usize,
}

impl<I: Iterator<Item = RawRecord>> Batches<I> {
    pub fn new(inner: I, size: usize) -> Self {
        Self {
            inner,
            size: size.max(1),
        }
    }
}

impl<I: Iterator<Item = RawRecord>> Iterator for Batches<I> {
    type Item = Vec<RawRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        let batch: Vec<RawRecord> = self.inner.by_ref().take(self.size).collect();
        (!batch.is_empty()).then_some(batch)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub records: usize,
    pub batches: usize,
    pub failed_batches: usize,
    pub cleaned: usize,
    pub duplicates: usize,
    pub accepted: usize,
}

impl DispatchReport {
    fn absorb<F>(
        &mut self,
        batch: usize,
        outcome: Result<Vec<CleanedText>>,
        dedup: &mut Deduplicator,
        sink: &mut F,
    ) -> Result<()>
    where
        F: FnMut(String),
    {
        match outcome {
            Ok(cleaned) => {
                self.cleaned += cleaned.len();
                for text in cleaned {
                    if dedup.admit(&text) {
                        self.accepted += 1;
                        sink(text.text);
                    } else {
                        self.duplicates += 1;
                    }
                }
                debug!("dispatch: batch {batch} absorbed");
                Ok(())
            }
            Err(err) if err.is_recoverable() => {
                warn!("dispatch: dropping batch {batch}: {err}");
                self.failed_batches += 1;
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    fn log_summary(&self, started: Instant) {
        info!(
            "dispatch: {} records in {} batches ({} failed) -> {} cleaned, {} duplicates, {} accepted in {:.1}s",
            self.records,
            self.batches,
            self.failed_batches,
            self.cleaned,
            self.duplicates,
            self.accepted,
            started.elapsed().as_secs_f64()
        );
    }
}

pub struct BatchDispatcher {
    pool: rayon::ThreadPool,
    workers: usize,
    batch_size: usize,
    max_in_flight: usize,
}

impl BatchDispatcher {
    pub fn new(workers: usize, batch_size: usize, max_in_flight: usize) -> Result<Self> {
        if workers == 0 || batch_size == 0 || max_in_flight == 0 {
            return Err(DataError::Config(
                "workers, batch_size and max_in_flight must be greater than zero".into(),
            ));
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("clean-{i}"))
            .build()
            .map_err(|e| DataError::Config(format!("unable to build cleaning pool: {e}")))?;

        Ok(Self {
            pool,
            workers,
            batch_size,
            max_in_flight,
        })
    }

    pub fn from_config(cfg: &PreprocessConfig) -> Result<Self> {
        Self::new(cfg.workers(), cfg.batch_size, cfg.in_flight())
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Cleans `records` on the pool and feeds every first-seen text to `sink`.
    /// `should_stop` is polled before each batch is submitted; once it returns
    /// true no new batches are sent and outstanding ones are drained.
    pub fn run<I, S, F>(
        &self,
        records: I,
        cleaner: Arc<TextCleaner>,
        dedup: &mut Deduplicator,
        should_stop: S,
        mut sink: F,
    ) -> Result<DispatchReport>
    where
        I: IntoIterator<Item = RawRecord>,
        S: Fn() -> bool,
        F: FnMut(String),
    {
        let started = Instant::now();
        let (tx, rx) = sync_channel::<(usize, Result<Vec<CleanedText>>)>(self.max_in_flight);
        let mut report = DispatchReport::default();
        let mut in_flight = 0usize;
        let mut cancelled = false;

        for (index, batch) in Batches::new(records.into_iter(), self.batch_size).enumerate() {
            if should_stop() {
                cancelled = true;
                break;
            }

            while in_flight >= self.max_in_flight {
                let Ok((done, outcome)) = rx.recv() else {
                    break;
                };
                in_flight -= 1;
                report.absorb(done, outcome, dedup, &mut sink)?;
            }

            report.records += batch.len();
            report.batches += 1;

            let tx = tx.clone();
            let cleaner = Arc::clone(&cleaner);
            self.pool.spawn(move || {
                let outcome = clean_guarded(&cleaner, index, &batch);
                // The receiver only goes away if the caller bailed on a fatal error.
                let _ = tx.send((index, outcome));
            });
            in_flight += 1;
        }
        drop(tx);

        while in_flight > 0 {
            match rx.recv() {
                Ok((done, outcome)) => {
                    in_flight -= 1;
                    report.absorb(done, outcome, dedup, &mut sink)?;
                }
                Err(_) => {
                    error!("dispatch: workers disconnected with {in_flight} batch(es) outstanding");
                    break;
                }
            }
        }

        report.log_summary(started);
        if cancelled {
            return Err(DataError::Cancelled {
                batches: report.batches,
            });
        }
        Ok(report)
    }
}

/// Single-threaded rendition of [`BatchDispatcher::run`] with the same batching,
/// failure isolation and admission rules.
pub fn clean_sequential<I, S, F>(
    records: I,
    cleaner: &TextCleaner,
    batch_size: usize,
    dedup: &mut Deduplicator,
    should_stop: S,
    mut sink: F,
) -> Result<DispatchReport>
where
    I: IntoIterator<Item = RawRecord>,
    S: Fn() -> bool,
    F: FnMut(String),
{
    let started = Instant::now();
    let mut report = DispatchReport::default();

    for (index, batch) in Batches::new(records.into_iter(), batch_size).enumerate() {
        if should_stop() {
            report.log_summary(started);
            return Err(DataError::Cancelled {
                batches: report.batches,
            });
        }
        report.records += batch.len();
        report.batches += 1;
        let outcome = clean_guarded(cleaner, index, &batch);
        report.absorb(index, outcome, dedup, &mut sink)?;
    }

    report.log_summary(started);
    Ok(report)
}

fn clean_guarded(cleaner: &TextCleaner, index: usize, batch: &[RawRecord]) -> Result<Vec<CleanedText>> {
    panic::catch_unwind(AssertUnwindSafe(|| cleaner.clean_batch(batch))).map_err(|payload| {
        DataError::WorkerFailed {
            batch: index,
            reason: panic_message(payload.as_ref()),
        }
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "worker panicked".to_string()
    }
}
