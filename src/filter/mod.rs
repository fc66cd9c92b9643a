//! Removes annotations too small for the network to learn from.
//!
//! Runs after the transform stages over every derived label file, on the
//! same partitioned worker pool. It never touches image files.

use log::{debug, info};
use rand::rngs::StdRng;

use crate::error::PrepError;
use crate::label::io::{read_label_file, write_label_file};
use crate::label::{Annotation, DerivedImage};
use crate::transform::pool::{self, Cancellation, ItemOutput, PoolOptions, ProgressFn, StageOutcome};

/// Options for the small-annotation filter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FilterOptions {
    /// Boxes whose pixel area is at or below this are removed.
    pub threshold: u64,
    pub target_width: u32,
    pub target_height: u32,
}

/// Pixel area of an annotation on a `width x height` image:
/// `round(w * width) * round(h * height)`.
pub fn pixel_area(ann: &Annotation, width: u32, height: u32) -> u64 {
    let w = (ann.width * f64::from(width)).round().max(0.0) as u64;
    let h = (ann.height * f64::from(height)).round().max(0.0) as u64;
    w * h
}

/// Splits `annotations` into those above the threshold and the count dropped.
pub fn retain_detectable(annotations: Vec<Annotation>, opts: &FilterOptions) -> (Vec<Annotation>, usize) {
    let before = annotations.len();
    let kept: Vec<Annotation> = annotations
        .into_iter()
        .filter(|ann| pixel_area(ann, opts.target_width, opts.target_height) > opts.threshold)
        .collect();
    let dropped = before - kept.len();
    (kept, dropped)
}

/// Filters one derived image's label file, rewriting it only when
/// something was removed.
pub fn filter_label_file(image: &DerivedImage, opts: &FilterOptions) -> Result<ItemOutput, PrepError> {
    let annotations = read_label_file(&image.label_path, None)?;
    let (kept, dropped) = retain_detectable(annotations, opts);

    let mut output = ItemOutput {
        images: vec![DerivedImage {
            annotation_count: kept.len(),
            ..image.clone()
        }],
        dropped_annotations: dropped,
        ..Default::default()
    };

    if dropped > 0 {
        write_label_file(&image.label_path, &kept)?;
        output.rewritten = 1;
        debug!(
            "dropped {} small annotation(s) from {}",
            dropped,
            image.label_path.display()
        );
        output.audit = Some(format!(
            "filter: {}: dropped {} annotation(s) with area <= {} px, {} kept",
            image.label_path.display(),
            dropped,
            opts.threshold,
            kept.len()
        ));
    }

    Ok(output)
}

/// Runs the filter over every derived image.
pub fn filter_small_annotations(
    images: &[DerivedImage],
    opts: &FilterOptions,
    pool_opts: &PoolOptions,
    rng: &mut StdRng,
    cancel: &Cancellation,
    progress: Option<&ProgressFn<'_>>,
) -> Result<StageOutcome, PrepError> {
    let outcome = pool::run_partitioned("filter", images, pool_opts, rng, cancel, progress, |image, _| {
        filter_label_file(image, opts)
    })?;

    info!(
        "filter: {} label file(s) checked, {} rewritten, {} annotation(s) at or below {} px removed",
        outcome.counters.processed,
        outcome.counters.rewritten,
        outcome.counters.dropped_annotations,
        opts.threshold
    );
    Ok(outcome)
}
