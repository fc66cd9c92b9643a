//! Review report types and text/CSV formatting.

use std::collections::BTreeMap;
use std::fmt;
use std::io::Write;

use serde::Serialize;

use crate::error::PrepError;

/// Outcome of matching one image's predictions against its ground truth.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct MatchResult {
    pub ground_truth: usize,
    pub predictions: usize,
    pub matched: usize,
    pub unmatched_ground_truth: usize,
    /// Ground-truth boxes left without a match, by class name.
    pub unmatched_ground_truth_classes: BTreeMap<String, usize>,
    /// Predictions left over after matching, by predicted class name.
    pub unmatched_predictions: BTreeMap<String, usize>,
    pub matched_ious: Vec<f64>,
    pub min_iou: f64,
    pub avg_iou: f64,
    pub max_iou: f64,
}

impl MatchResult {
    pub fn unmatched_prediction_count(&self) -> usize {
        self.unmatched_predictions.values().sum()
    }

    /// Ground-truth boxes without a match plus predictions without one.
    pub fn differences(&self) -> usize {
        self.unmatched_ground_truth + self.unmatched_prediction_count()
    }
}

/// One reviewed image.
#[derive(Clone, Debug, Serialize)]
pub struct ImageReview {
    pub image: String,
    #[serde(flatten)]
    pub result: MatchResult,
}

/// Dataset-wide review totals.
#[derive(Clone, Debug, Default, Serialize)]
pub struct ReviewTotals {
    pub images: usize,
    pub ground_truth: usize,
    pub predictions: usize,
    pub matched: usize,
    pub unmatched_ground_truth: usize,
    pub unmatched_predictions: usize,
    /// Images with no differences at all.
    pub perfect_images: usize,
    /// Mean of the per-image average IoU.
    pub mean_avg_iou: f64,
    /// Markup companions that could not be updated.
    pub markup_errors: usize,
}

/// Prediction review over a set of images.
#[derive(Clone, Debug, Default, Serialize)]
pub struct ReviewReport {
    pub totals: ReviewTotals,
    pub images: Vec<ImageReview>,
}

impl ReviewReport {
    pub fn from_images(images: Vec<ImageReview>) -> Self {
        let mut totals = ReviewTotals {
            images: images.len(),
            ..Default::default()
        };
        let mut iou_sum = 0.0;
        for review in &images {
            let r = &review.result;
            totals.ground_truth += r.ground_truth;
            totals.predictions += r.predictions;
            totals.matched += r.matched;
            totals.unmatched_ground_truth += r.unmatched_ground_truth;
            totals.unmatched_predictions += r.unmatched_prediction_count();
            if r.differences() == 0 {
                totals.perfect_images += 1;
            }
            iou_sum += r.avg_iou;
        }
        if !images.is_empty() {
            totals.mean_avg_iou = iou_sum / images.len() as f64;
        }
        Self { totals, images }
    }

    pub fn to_json(&self) -> Result<String, PrepError> {
        serde_json::to_string_pretty(self).map_err(PrepError::ReportJson)
    }

    /// One CSV row per image.
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<(), PrepError> {
        let mut csv_writer = csv::Writer::from_writer(writer);
        for review in &self.images {
            let r = &review.result;
            csv_writer.serialize(CsvRow {
                image: &review.image,
                ground_truth: r.ground_truth,
                predictions: r.predictions,
                matched: r.matched,
                unmatched_ground_truth: r.unmatched_ground_truth,
                unmatched_ground_truth_classes: format_class_counts(&r.unmatched_ground_truth_classes),
                unmatched_predictions: r.unmatched_prediction_count(),
                min_iou: r.min_iou,
                avg_iou: r.avg_iou,
                max_iou: r.max_iou,
            })?;
        }
        csv_writer
            .into_inner()
            .map_err(|e| PrepError::Io(e.into_error()))?
            .flush()
            .map_err(PrepError::Io)
    }
}

/// `cat:2;dog:1`, for a single CSV cell.
fn format_class_counts(counts: &BTreeMap<String, usize>) -> String {
    counts
        .iter()
        .map(|(class, count)| format!("{class}:{count}"))
        .collect::<Vec<_>>()
        .join(";")
}

#[derive(Serialize)]
struct CsvRow<'a> {
    image: &'a str,
    ground_truth: usize,
    predictions: usize,
    matched: usize,
    unmatched_ground_truth: usize,
    unmatched_ground_truth_classes: String,
    unmatched_predictions: usize,
    min_iou: f64,
    avg_iou: f64,
    max_iou: f64,
}

impl fmt::Display for ReviewReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let t = &self.totals;
        writeln!(
            f,
            "Images:      {} reviewed, {} without differences",
            t.images, t.perfect_images
        )?;
        writeln!(
            f,
            "Boxes:       {} ground truth, {} predicted, {} matched",
            t.ground_truth, t.predictions, t.matched
        )?;
        writeln!(
            f,
            "Unmatched:   {} ground truth, {} predicted",
            t.unmatched_ground_truth, t.unmatched_predictions
        )?;
        writeln!(f, "Mean IoU:    {:.4}", t.mean_avg_iou)?;
        if t.markup_errors > 0 {
            writeln!(f, "Markup:      {} companion(s) not updated", t.markup_errors)?;
        }

        let with_differences: Vec<&ImageReview> = self
            .images
            .iter()
            .filter(|review| review.result.differences() > 0)
            .collect();
        if with_differences.is_empty() {
            return Ok(());
        }

        writeln!(f)?;
        writeln!(f, "Images with differences:")?;
        for review in with_differences {
            let r = &review.result;
            write!(
                f,
                "  - {}: {} unmatched ground truth, avg IoU {:.4}",
                review.image, r.unmatched_ground_truth, r.avg_iou
            )?;
            for (class, count) in &r.unmatched_ground_truth_classes {
                write!(f, ", {count} missed '{class}'")?;
            }
            for (class, count) in &r.unmatched_predictions {
                write!(f, ", {count} extra '{class}'")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
