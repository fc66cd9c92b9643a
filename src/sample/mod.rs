//! Negative-sample balancing and the training/validation split.

use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use log::info;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;

use crate::error::PrepError;
use crate::label::DerivedImage;

/// Negatives are capped once they outnumber annotated images by this factor.
pub const NEGATIVE_RATIO_LIMIT: f64 = 1.2;

/// Validation images per class when validation capping is enabled.
pub const VALIDATION_IMAGES_PER_CLASS: usize = 10;

/// Counts before and after negative balancing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct BalanceReport {
    pub annotated: usize,
    pub negatives_before: usize,
    pub negatives_kept: usize,
}

impl BalanceReport {
    pub fn capped(&self) -> bool {
        self.negatives_kept < self.negatives_before
    }
}

/// Caps negative images (no annotations, i.e. a zero-byte label file).
///
/// When negatives exceed 1.2x the annotated count they are truncated to
/// exactly the annotated count and the combined list is reshuffled.
/// Otherwise the list is returned unchanged.
pub fn balance_negatives<R: Rng + ?Sized>(
    images: Vec<DerivedImage>,
    rng: &mut R,
) -> (Vec<DerivedImage>, BalanceReport) {
    let negative_count = images.iter().filter(|img| img.annotation_count == 0).count();
    let annotated_count = images.len() - negative_count;
    let mut report = BalanceReport {
        annotated: annotated_count,
        negatives_before: negative_count,
        negatives_kept: negative_count,
    };

    if (negative_count as f64) <= NEGATIVE_RATIO_LIMIT * annotated_count as f64 {
        return (images, report);
    }

    let (negatives, mut annotated): (Vec<DerivedImage>, Vec<DerivedImage>) =
        images.into_iter().partition(|img| img.annotation_count == 0);
    report.negatives_kept = annotated.len();
    annotated.extend(negatives.into_iter().take(report.negatives_kept));
    annotated.shuffle(rng);

    info!(
        "limited negative samples from {} to {} ({} annotated image(s))",
        report.negatives_before, report.negatives_kept, report.annotated
    );
    (annotated, report)
}

/// Split options.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SplitOptions {
    /// Share of images used for training, in `[0.5, 1.0]`.
    pub training_fraction: f64,
    /// Use every image for both training and validation.
    pub use_all: bool,
    /// Cap validation at 10 images per class.
    pub cap_validation: bool,
    pub class_count: usize,
}

impl Default for SplitOptions {
    fn default() -> Self {
        Self {
            training_fraction: 0.8,
            use_all: false,
            cap_validation: false,
            class_count: 1,
        }
    }
}

/// Validate split options before running.
pub fn validate_split_options(opts: &SplitOptions) -> Result<(), PrepError> {
    if !(0.5..=1.0).contains(&opts.training_fraction) {
        return Err(PrepError::InvalidBuildParams {
            message: format!(
                "training fraction {} must be in the interval [0.5, 1.0]",
                opts.training_fraction
            ),
        });
    }
    Ok(())
}

/// Training and validation lists in final order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DatasetSplit<T = PathBuf> {
    pub training: Vec<T>,
    pub validation: Vec<T>,
}

/// `(training_count, validation_count)` for `total` images.
pub fn split_counts(total: usize, opts: &SplitOptions) -> (usize, usize) {
    let (mut training, mut validation) = if opts.use_all {
        (total, total)
    } else {
        let training = ((opts.training_fraction * total as f64).round() as usize).min(total);
        (training, total - training)
    };

    if opts.cap_validation {
        let cap = VALIDATION_IMAGES_PER_CLASS * opts.class_count.max(1);
        if validation > cap {
            validation = cap;
            if !opts.use_all {
                training = total - validation;
            }
        }
    }

    (training, validation)
}

/// Shuffles `images` once and splits them.
///
/// Training takes the first `training_count` entries and validation the
/// last `validation_count`; the two overlap only with `use_all`.
pub fn split_dataset<T: Clone, R: Rng + ?Sized>(
    images: &[T],
    opts: &SplitOptions,
    rng: &mut R,
) -> DatasetSplit<T> {
    let mut shuffled = images.to_vec();
    shuffled.shuffle(rng);

    let total = shuffled.len();
    let (training_count, validation_count) = split_counts(total, opts);

    DatasetSplit {
        training: shuffled[..training_count].to_vec(),
        validation: shuffled[total - validation_count..].to_vec(),
    }
}

/// Writes one path per line.
pub fn write_manifest(path: &Path, entries: &[PathBuf]) -> Result<(), PrepError> {
    let to_err = |source| PrepError::OutputWrite {
        path: path.to_path_buf(),
        source,
    };

    let file = fs::File::create(path).map_err(to_err)?;
    let mut writer = BufWriter::new(file);
    for entry in entries {
        writeln!(writer, "{}", entry.display()).map_err(to_err)?;
    }
    writer.flush().map_err(to_err)
}
