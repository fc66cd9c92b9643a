//! Partitioned worker pool shared by the image stages.
//!
//! The work list is split round-robin into one partition per worker. Each
//! worker owns its partition, its own seeded random source and its own
//! partial result; nothing but the progress counter is shared while the
//! stage runs. Partial results are merged on the calling thread after every
//! worker has joined.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{debug, warn};
use rand::rngs::StdRng;
use rand::{RngExt, SeedableRng};
use serde::Serialize;

use crate::error::PrepError;
use crate::label::DerivedImage;

/// Anything a worker can process; the path names the item in error reports.
pub trait WorkItem {
    fn source_path(&self) -> &Path;
}

impl WorkItem for DerivedImage {
    fn source_path(&self) -> &Path {
        &self.image_path
    }
}

/// Cooperative cancellation flag, cheap to clone and share.
#[derive(Clone, Debug, Default)]
pub struct Cancellation(Arc<AtomicBool>);

impl Cancellation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Worker pool sizing and polling.
#[derive(Clone, Debug)]
pub struct PoolOptions {
    /// Fixed worker count; `None` uses the hardware concurrency (at least 2).
    pub workers: Option<usize>,
    /// How often the calling thread reports progress.
    pub poll_interval: Duration,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            workers: None,
            poll_interval: Duration::from_millis(100),
        }
    }
}

impl PoolOptions {
    pub fn worker_count(&self) -> usize {
        match self.workers {
            Some(n) => n.max(1),
            None => thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
                .max(2),
        }
    }
}

/// Progress snapshot handed to the progress callback.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StageProgress {
    pub stage: &'static str,
    pub done: usize,
    pub total: usize,
}

/// Progress callback; it may borrow from the caller's stack.
pub type ProgressFn<'a> = dyn Fn(&StageProgress) + 'a;

/// What a worker produced for one item.
#[derive(Clone, Debug, Default)]
pub struct ItemOutput {
    pub images: Vec<DerivedImage>,
    /// Sub-items deliberately not produced (e.g. duplicate tiles).
    pub skipped: usize,
    /// Annotations removed while producing the item.
    pub dropped_annotations: usize,
    /// Label files rewritten in place.
    pub rewritten: usize,
    pub audit: Option<String>,
}

/// Aggregate counters for one stage.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct StageCounters {
    pub processed: usize,
    pub created: usize,
    pub negatives: usize,
    pub skipped: usize,
    pub errors: usize,
    pub dropped_annotations: usize,
    pub rewritten: usize,
}

impl StageCounters {
    pub fn merge(&mut self, other: &StageCounters) {
        self.processed += other.processed;
        self.created += other.created;
        self.negatives += other.negatives;
        self.skipped += other.skipped;
        self.errors += other.errors;
        self.dropped_annotations += other.dropped_annotations;
        self.rewritten += other.rewritten;
    }
}

/// A failure that stopped one partition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkerFailure {
    pub path: PathBuf,
    pub message: String,
}

/// Keeps the first failure recorded; later ones are only counted.
#[derive(Clone, Debug, Default)]
pub struct FirstError {
    first: Option<WorkerFailure>,
    suppressed: usize,
}

impl FirstError {
    pub fn record(&mut self, failure: WorkerFailure) {
        if self.first.is_none() {
            self.first = Some(failure);
        } else {
            self.suppressed += 1;
        }
    }

    pub fn first(&self) -> Option<&WorkerFailure> {
        self.first.as_ref()
    }

    pub fn suppressed(&self) -> usize {
        self.suppressed
    }

    /// `Ok(())` when nothing failed, otherwise the first failure as an error.
    pub fn into_result(self, stage: &str) -> Result<(), PrepError> {
        match self.first {
            None => Ok(()),
            Some(failure) => Err(PrepError::Worker {
                stage: stage.to_string(),
                path: failure.path,
                message: failure.message,
            }),
        }
    }
}

/// Merged result of a stage.
#[derive(Clone, Debug, Default)]
pub struct StageOutcome {
    pub images: Vec<DerivedImage>,
    pub counters: StageCounters,
    pub audit: Vec<String>,
    pub cancelled: bool,
}

#[derive(Default)]
struct PartialResult {
    images: Vec<DerivedImage>,
    counters: StageCounters,
    audit: Vec<String>,
    failure: Option<WorkerFailure>,
}

/// Per-worker state handed to the item closure.
pub struct WorkerContext<'a> {
    pub rng: StdRng,
    pub cancel: &'a Cancellation,
}

/// Splits `items` round-robin into at most `parts` non-empty partitions.
pub fn partition_round_robin<T>(items: &[T], parts: usize) -> Vec<Vec<&T>> {
    let parts = parts.max(1).min(items.len().max(1));
    let mut partitions: Vec<Vec<&T>> = (0..parts).map(|_| Vec::new()).collect();
    for (idx, item) in items.iter().enumerate() {
        partitions[idx % parts].push(item);
    }
    partitions.retain(|p| !p.is_empty());
    partitions
}

/// Errors that skip one item instead of stopping the partition: the source
/// image could not be read or decoded.
pub fn is_skippable(err: &PrepError) -> bool {
    matches!(
        err,
        PrepError::ImageDecode { .. } | PrepError::ImageDimensionRead { .. }
    )
}

/// Runs `work` over every item on a fixed pool of worker threads.
///
/// Returns the merged outcome, or the first worker failure once every
/// partition has finished.
pub fn run_partitioned<T, F>(
    stage: &'static str,
    items: &[T],
    pool: &PoolOptions,
    rng: &mut StdRng,
    cancel: &Cancellation,
    progress: Option<&ProgressFn<'_>>,
    work: F,
) -> Result<StageOutcome, PrepError>
where
    T: WorkItem + Sync,
    F: Fn(&T, &mut WorkerContext) -> Result<ItemOutput, PrepError> + Sync,
{
    let partitions = partition_round_robin(items, pool.worker_count());
    let seeds: Vec<u64> = partitions.iter().map(|_| rng.random::<u64>()).collect();
    let total = items.len();
    let done = AtomicUsize::new(0);
    debug!(
        "{stage}: {} item(s) over {} worker(s)",
        total,
        partitions.len()
    );

    let results: Vec<PartialResult> = thread::scope(|scope| {
        let handles: Vec<_> = partitions
            .into_iter()
            .zip(seeds)
            .map(|(partition, seed)| {
                let work = &work;
                let done = &done;
                scope.spawn(move || {
                    let mut ctx = WorkerContext {
                        rng: StdRng::seed_from_u64(seed),
                        cancel,
                    };
                    run_partition(stage, &partition, &mut ctx, done, work)
                })
            })
            .collect();

        while !handles.iter().all(|h| h.is_finished()) {
            if let Some(report) = progress {
                report(&StageProgress {
                    stage,
                    done: done.load(Ordering::Relaxed),
                    total,
                });
            }
            thread::sleep(pool.poll_interval);
        }

        handles
            .into_iter()
            .map(|handle| {
                handle.join().unwrap_or_else(|_| PartialResult {
                    failure: Some(WorkerFailure {
                        path: PathBuf::new(),
                        message: "worker thread panicked".to_string(),
                    }),
                    ..Default::default()
                })
            })
            .collect()
    });

    if let Some(report) = progress {
        report(&StageProgress {
            stage,
            done: done.load(Ordering::Relaxed),
            total,
        });
    }

    let mut outcome = StageOutcome {
        cancelled: cancel.is_cancelled(),
        ..Default::default()
    };
    let mut first_error = FirstError::default();
    for partial in results {
        outcome.images.extend(partial.images);
        outcome.counters.merge(&partial.counters);
        outcome.audit.extend(partial.audit);
        if let Some(failure) = partial.failure {
            first_error.record(failure);
        }
    }
    if first_error.suppressed() > 0 {
        warn!(
            "{stage}: {} further worker failure(s) after the first",
            first_error.suppressed()
        );
    }
    first_error.into_result(stage)?;

    Ok(outcome)
}

fn run_partition<T, F>(
    stage: &str,
    partition: &[&T],
    ctx: &mut WorkerContext,
    done: &AtomicUsize,
    work: &F,
) -> PartialResult
where
    T: WorkItem,
    F: Fn(&T, &mut WorkerContext) -> Result<ItemOutput, PrepError>,
{
    let mut partial = PartialResult::default();

    for item in partition {
        if ctx.cancel.is_cancelled() {
            break;
        }

        match work(item, ctx) {
            Ok(output) => {
                partial.counters.processed += 1;
                partial.counters.created += output.images.len();
                partial.counters.negatives += output
                    .images
                    .iter()
                    .filter(|img| img.annotation_count == 0)
                    .count();
                partial.counters.skipped += output.skipped;
                partial.counters.dropped_annotations += output.dropped_annotations;
                partial.counters.rewritten += output.rewritten;
                partial.audit.extend(output.audit);
                partial.images.extend(output.images);
            }
            Err(err) if is_skippable(&err) => {
                warn!("{stage}: skipping {}: {}", item.source_path().display(), err);
                partial.counters.errors += 1;
                partial
                    .audit
                    .push(format!("{stage}: {}: skipped: {}", item.source_path().display(), err));
            }
            Err(err) => {
                partial.failure = Some(WorkerFailure {
                    path: item.source_path().to_path_buf(),
                    message: err.to_string(),
                });
                break;
            }
        }

        done.fetch_add(1, Ordering::Relaxed);
    }

    partial
}
