//! Prediction review: how well a detector's output matches ground truth.
//!
//! The detector itself is opaque behind [`Detector`]. Predictions are
//! matched greedily per ground-truth box against detections of the same
//! class, each detection being used at most once.

mod report;

pub use report::{ImageReview, MatchResult, ReviewReport, ReviewTotals};

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use serde_json::{json, Value};

use crate::error::PrepError;
use crate::label::io::{parse_f64_token, rel_string};
use crate::label::{Annotation, BBoxXYXY, ImageRecord, Normalized};

/// Key under which review statistics are stored in a markup companion.
pub const MARKUP_REVIEW_KEY: &str = "prediction_review";

/// One detection in normalized image coordinates.
#[derive(Clone, Debug, PartialEq)]
pub struct Prediction {
    pub class_index: usize,
    pub bbox: BBoxXYXY<Normalized>,
    pub confidence: Option<f64>,
}

impl Prediction {
    pub fn new(class_index: usize, bbox: BBoxXYXY<Normalized>, confidence: Option<f64>) -> Self {
        Self {
            class_index,
            bbox,
            confidence,
        }
    }
}

/// Source of predictions for an image.
pub trait Detector {
    fn detect(&mut self, image: &Path) -> Result<Vec<Prediction>, PrepError>;
}

/// Reads predictions saved as YOLO text files (`class cx cy w h [confidence]`),
/// mirroring the image tree under `predictions_dir`. A missing file means no
/// detections.
#[derive(Clone, Debug)]
pub struct LabelDirDetector {
    images_root: PathBuf,
    predictions_dir: PathBuf,
}

impl LabelDirDetector {
    pub fn new(images_root: &Path, predictions_dir: &Path) -> Self {
        Self {
            images_root: images_root.to_path_buf(),
            predictions_dir: predictions_dir.to_path_buf(),
        }
    }

    pub fn prediction_path(&self, image: &Path) -> PathBuf {
        let rel = image.strip_prefix(&self.images_root).unwrap_or(image);
        self.predictions_dir.join(rel).with_extension("txt")
    }
}

impl Detector for LabelDirDetector {
    fn detect(&mut self, image: &Path) -> Result<Vec<Prediction>, PrepError> {
        let path = self.prediction_path(image);
        if !path.is_file() {
            debug!("no predictions for {}", image.display());
            return Ok(Vec::new());
        }

        let content = fs::read_to_string(&path).map_err(PrepError::Io)?;
        let mut predictions = Vec::new();
        for (line_idx, line) in content.lines().enumerate() {
            if let Some(prediction) = parse_prediction_line(line, &path, line_idx + 1)? {
                predictions.push(prediction);
            }
        }
        Ok(predictions)
    }
}

fn parse_prediction_line(
    line: &str,
    path: &Path,
    line_num: usize,
) -> Result<Option<Prediction>, PrepError> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    let tokens: Vec<&str> = trimmed.split_whitespace().collect();
    if tokens.len() != 5 && tokens.len() != 6 {
        return Err(PrepError::LabelParse {
            path: path.to_path_buf(),
            line: line_num,
            message: format!(
                "expected 5 or 6 tokens (class cx cy w h [confidence]), got {}",
                tokens.len()
            ),
        });
    }

    let class_index = tokens[0]
        .parse::<usize>()
        .map_err(|_| PrepError::LabelParse {
            path: path.to_path_buf(),
            line: line_num,
            message: format!("invalid class index '{}'", tokens[0]),
        })?;
    let cx = parse_f64_token(tokens[1], "cx", path, line_num)?;
    let cy = parse_f64_token(tokens[2], "cy", path, line_num)?;
    let w = parse_f64_token(tokens[3], "w", path, line_num)?;
    let h = parse_f64_token(tokens[4], "h", path, line_num)?;
    let confidence = tokens
        .get(5)
        .map(|raw| parse_f64_token(raw, "confidence", path, line_num))
        .transpose()?;

    Ok(Some(Prediction::new(
        class_index,
        BBoxXYXY::from_cxcywh(cx, cy, w, h),
        confidence,
    )))
}

fn class_name(names: &[String], class_index: usize) -> String {
    names
        .get(class_index)
        .cloned()
        .unwrap_or_else(|| format!("class {class_index}"))
}

/// Matches one image's ground truth against its predictions.
///
/// Each ground-truth box takes the unused same-class prediction with the
/// highest IoU above zero. Leftover boxes on both sides are counted per
/// class name.
/// An image with neither ground truth nor predictions scores 1.0.
pub fn match_predictions(
    ground_truth: &[Annotation],
    predictions: &[Prediction],
    class_names: &[String],
) -> MatchResult {
    let mut result = MatchResult {
        ground_truth: ground_truth.len(),
        predictions: predictions.len(),
        ..Default::default()
    };

    if ground_truth.is_empty() && predictions.is_empty() {
        result.min_iou = 1.0;
        result.avg_iou = 1.0;
        result.max_iou = 1.0;
        return result;
    }

    let mut used = vec![false; predictions.len()];

    for gt in ground_truth {
        let gt_box = gt.bbox();
        let mut best_idx: Option<usize> = None;
        let mut best_iou = 0.0;

        for (idx, prediction) in predictions.iter().enumerate() {
            if used[idx] || prediction.class_index != gt.class_index {
                continue;
            }

            let iou = gt_box.iou(&prediction.bbox);
            if iou > best_iou {
                best_iou = iou;
                best_idx = Some(idx);
            }
        }

        match best_idx {
            Some(idx) => {
                used[idx] = true;
                result.matched += 1;
                result.matched_ious.push(best_iou);
            }
            None => {
                result.unmatched_ground_truth += 1;
                *result
                    .unmatched_ground_truth_classes
                    .entry(class_name(class_names, gt.class_index))
                    .or_default() += 1;
            }
        }
    }

    for (prediction, _) in predictions.iter().zip(&used).filter(|(_, used)| !**used) {
        *result
            .unmatched_predictions
            .entry(class_name(class_names, prediction.class_index))
            .or_default() += 1;
    }

    if !result.matched_ious.is_empty() {
        let sum: f64 = result.matched_ious.iter().sum();
        result.min_iou = result.matched_ious.iter().copied().fold(f64::MAX, f64::min);
        result.max_iou = result.matched_ious.iter().copied().fold(0.0, f64::max);
        result.avg_iou = sum / ground_truth.len().max(predictions.len()) as f64;
    }

    result
}

/// Review options.
#[derive(Clone, Debug, Default)]
pub struct ReviewOptions {
    /// Merge statistics into each image's `<image>.json` companion.
    pub update_markup: bool,
}

/// Runs the detector over every record and matches the results.
///
/// A markup companion that cannot be updated is logged and counted in
/// [`ReviewTotals::markup_errors`]; the review carries on.
pub fn review_images(
    images_root: &Path,
    records: &[ImageRecord],
    detector: &mut dyn Detector,
    class_names: &[String],
    opts: &ReviewOptions,
) -> Result<ReviewReport, PrepError> {
    let mut reviews = Vec::with_capacity(records.len());
    let mut markup_errors = 0;

    for record in records {
        let predictions = detector.detect(&record.image_path)?;
        let result = match_predictions(&record.annotations, &predictions, class_names);
        if opts.update_markup {
            if let Err(e) = update_markup(&record.image_path, &result) {
                warn!(
                    "markup for {} not updated: {}",
                    markup_path_for(&record.image_path).display(),
                    e
                );
                markup_errors += 1;
            }
        }
        reviews.push(ImageReview {
            image: rel_string(images_root, &record.image_path),
            result,
        });
    }

    let mut report = ReviewReport::from_images(reviews);
    report.totals.markup_errors = markup_errors;
    info!(
        "reviewed {} image(s): {} matched, {} unmatched ground truth, {} unmatched predictions",
        report.totals.images,
        report.totals.matched,
        report.totals.unmatched_ground_truth,
        report.totals.unmatched_predictions
    );
    Ok(report)
}

/// Path of the markup companion for an image: `<image>.json`.
pub fn markup_path_for(image: &Path) -> PathBuf {
    image.with_extension("json")
}

/// Stores review statistics under [`MARKUP_REVIEW_KEY`] in the image's
/// markup companion, keeping every other field. A missing companion is
/// created.
pub fn update_markup(image: &Path, result: &MatchResult) -> Result<(), PrepError> {
    let path = markup_path_for(image);

    let mut root = if path.is_file() {
        let text = fs::read_to_string(&path).map_err(PrepError::Io)?;
        serde_json::from_str::<Value>(&text).map_err(|source| PrepError::MarkupJsonParse {
            path: path.clone(),
            source,
        })?
    } else {
        Value::Object(serde_json::Map::new())
    };

    let Some(object) = root.as_object_mut() else {
        return Err(PrepError::UnsupportedFormat(format!(
            "markup companion {} is not a JSON object",
            path.display()
        )));
    };

    object.insert(
        MARKUP_REVIEW_KEY.to_string(),
        json!({
            "ground_truth": result.ground_truth,
            "predictions": result.predictions,
            "matched": result.matched,
            "unmatched_ground_truth": result.unmatched_ground_truth,
            "unmatched_ground_truth_classes": &result.unmatched_ground_truth_classes,
            "unmatched_predictions": &result.unmatched_predictions,
            "differences": result.differences(),
            "min_iou": result.min_iou,
            "avg_iou": result.avg_iou,
            "max_iou": result.max_iou,
        }),
    );

    let text = serde_json::to_string_pretty(&root).map_err(|source| PrepError::MarkupJsonWrite {
        path: path.clone(),
        source,
    })?;
    fs::write(&path, text).map_err(|source| PrepError::OutputWrite { path, source })
}
