//! Anchor box calculation.
//!
//! Box sizes are clustered with Lloyd's k-means using `1 - IoU` as the
//! distance, both boxes placed on a shared top-left corner. Identical box
//! sizes are merged into weighted points first. Each run starts from `k`
//! boxes drawn without replacement, so a size shared by many boxes is
//! proportionally more likely to seed a center. The clustering is restarted
//! several times and the run with the best mean IoU wins.

mod report;

pub use report::{Anchor, AnchorSet};

use std::cmp::Ordering;
use std::time::{Duration, Instant};

use log::{debug, info};
use rand::seq::SliceRandom;
use rand::Rng;

use crate::error::PrepError;
use crate::label::Annotation;

/// Options for anchor calculation.
#[derive(Clone, Debug)]
pub struct AnchorOptions {
    /// Number of anchors to produce.
    pub clusters: usize,
    /// Network input width in pixels.
    pub width: u32,
    /// Network input height in pixels.
    pub height: u32,
    /// Maximum number of independent k-means runs.
    pub max_attempts: usize,
    /// Wall-clock budget across all runs.
    pub time_budget: Duration,
    /// Iteration cap for a single run.
    pub max_iterations: usize,
}

impl Default for AnchorOptions {
    fn default() -> Self {
        Self {
            clusters: 9,
            width: 416,
            height: 416,
            max_attempts: 100,
            time_budget: Duration::from_secs(60),
            max_iterations: 1000,
        }
    }
}

/// Validate anchor options before clustering.
pub fn validate_anchor_options(opts: &AnchorOptions) -> Result<(), PrepError> {
    for (name, value) in [("width", opts.width), ("height", opts.height)] {
        if value == 0 || value % 32 != 0 {
            return Err(PrepError::InvalidAnchorParams {
                message: format!("network {name} {value} must be a positive multiple of 32"),
            });
        }
    }

    if opts.clusters == 0 {
        return Err(PrepError::InvalidAnchorParams {
            message: "cluster count must be at least 1".to_string(),
        });
    }

    if opts.max_attempts == 0 || opts.max_iterations == 0 {
        return Err(PrepError::InvalidAnchorParams {
            message: "attempt and iteration limits must be greater than 0".to_string(),
        });
    }

    Ok(())
}

/// A distinct box size and how many boxes share it.
#[derive(Clone, Copy, Debug, PartialEq)]
struct WeightedBox {
    width: f64,
    height: f64,
    weight: f64,
}

/// IoU of two boxes that share their top-left corner.
pub fn shape_iou(w1: f64, h1: f64, w2: f64, h2: f64) -> f64 {
    let intersection = w1.min(w2) * h1.min(h2);
    let union = w1 * h1 + w2 * h2 - intersection;
    if union <= 0.0 {
        0.0
    } else {
        intersection / union
    }
}

/// Number of annotations per class index; indexes at or beyond
/// `class_count` are ignored.
pub fn count_per_class(annotations: &[Annotation], class_count: usize) -> Vec<usize> {
    let mut counters = vec![0usize; class_count];
    for ann in annotations {
        if let Some(counter) = counters.get_mut(ann.class_index) {
            *counter += 1;
        }
    }
    counters
}

/// Cluster every annotation's size into anchors for the network geometry.
///
/// `class_count` sizes the per-class counters; annotations with a class
/// index beyond it are clustered but not counted.
pub fn calculate_anchors<R: Rng + ?Sized>(
    annotations: &[Annotation],
    class_count: usize,
    opts: &AnchorOptions,
    rng: &mut R,
) -> Result<AnchorSet, PrepError> {
    validate_anchor_options(opts)?;

    if annotations.is_empty() {
        return Err(PrepError::InvalidAnchorParams {
            message: "no annotated training images to cluster".to_string(),
        });
    }

    let counters_per_class = count_per_class(annotations, class_count);
    let points = weighted_boxes(annotations, opts.width, opts.height);
    let box_count: usize = points.iter().map(|p| p.weight as usize).sum();
    if box_count < opts.clusters {
        return Err(PrepError::InvalidAnchorParams {
            message: format!(
                "{} anchors requested but only {} box(es) exist",
                opts.clusters, box_count
            ),
        });
    }

    let started = Instant::now();
    let mut best: Option<(Vec<Anchor>, f64)> = None;
    let mut attempts = 0;

    while attempts < opts.max_attempts {
        if attempts > 0 && started.elapsed() >= opts.time_budget {
            break;
        }
        attempts += 1;

        let centers = kmeans(&points, opts.clusters, opts.max_iterations, rng);
        let fitness = average_iou(&points, &centers);
        debug!("anchor attempt {}: average IoU {:.2}%", attempts, fitness);

        if best
            .as_ref()
            .map(|(_, best_fitness)| fitness > *best_fitness)
            .unwrap_or(true)
        {
            best = Some((centers, fitness));
        }
    }

    let (mut anchors, average_iou) = best.unwrap_or_default();
    anchors.sort_by(|a, b| a.area().partial_cmp(&b.area()).unwrap_or(Ordering::Equal));

    info!(
        "calculated {} anchors from {} boxes in {} attempt(s), average IoU {:.2}%",
        anchors.len(),
        annotations.len(),
        attempts,
        average_iou
    );

    Ok(AnchorSet {
        anchors,
        counters_per_class,
        average_iou,
    })
}

fn weighted_boxes(annotations: &[Annotation], width: u32, height: u32) -> Vec<WeightedBox> {
    let mut sizes: Vec<(f64, f64)> = annotations
        .iter()
        .map(|ann| (ann.width * width as f64, ann.height * height as f64))
        .filter(|(w, h)| *w > 0.0 && *h > 0.0)
        .collect();
    sizes.sort_by(|a, b| {
        a.0.partial_cmp(&b.0)
            .unwrap_or(Ordering::Equal)
            .then(a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal))
    });

    let mut points: Vec<WeightedBox> = Vec::new();
    for (w, h) in sizes {
        match points.last_mut() {
            Some(last) if last.width == w && last.height == h => last.weight += 1.0,
            _ => points.push(WeightedBox {
                width: w,
                height: h,
                weight: 1.0,
            }),
        }
    }
    points
}

/// One weighted Lloyd's run seeded with `k` boxes drawn without replacement.
///
/// Boxes sharing a size may seed identical centers; the duplicate then stays
/// empty and keeps its position.
fn kmeans<R: Rng + ?Sized>(
    points: &[WeightedBox],
    k: usize,
    max_iterations: usize,
    rng: &mut R,
) -> Vec<Anchor> {
    // One entry per box, naming the point that holds its size.
    let mut boxes: Vec<usize> = points
        .iter()
        .enumerate()
        .flat_map(|(idx, point)| std::iter::repeat_n(idx, point.weight as usize))
        .collect();
    boxes.shuffle(rng);
    let mut centers: Vec<Anchor> = boxes[..k]
        .iter()
        .map(|&idx| Anchor::new(points[idx].width, points[idx].height))
        .collect();

    let mut assignment = vec![usize::MAX; points.len()];

    for _ in 0..max_iterations {
        let mut changed = false;
        for (point, assigned) in points.iter().zip(assignment.iter_mut()) {
            let nearest = nearest_center(point, &centers);
            if *assigned != nearest {
                *assigned = nearest;
                changed = true;
            }
        }
        if !changed {
            break;
        }

        let mut sums = vec![(0.0f64, 0.0f64, 0.0f64); k];
        for (point, &cluster) in points.iter().zip(&assignment) {
            let entry = &mut sums[cluster];
            entry.0 += point.width * point.weight;
            entry.1 += point.height * point.weight;
            entry.2 += point.weight;
        }
        for (center, (sum_w, sum_h, weight)) in centers.iter_mut().zip(sums) {
            // Empty clusters keep their previous center.
            if weight > 0.0 {
                *center = Anchor::new(sum_w / weight, sum_h / weight);
            }
        }
    }

    centers
}

fn nearest_center(point: &WeightedBox, centers: &[Anchor]) -> usize {
    let mut best_idx = 0;
    let mut best_distance = f64::MAX;
    for (idx, center) in centers.iter().enumerate() {
        let distance = 1.0 - shape_iou(point.width, point.height, center.width, center.height);
        if distance < best_distance {
            best_distance = distance;
            best_idx = idx;
        }
    }
    best_idx
}

/// Weighted mean over every box of its best IoU with any center, in percent.
fn average_iou(points: &[WeightedBox], centers: &[Anchor]) -> f64 {
    let mut total_weight = 0.0;
    let mut sum = 0.0;
    for point in points {
        let best = centers
            .iter()
            .map(|c| shape_iou(point.width, point.height, c.width, c.height))
            .fold(0.0, f64::max);
        sum += best * point.weight;
        total_weight += point.weight;
    }
    if total_weight <= 0.0 {
        0.0
    } else {
        100.0 * sum / total_weight
    }
}
