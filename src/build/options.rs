//! Build parameters and their validation.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cfg::AugmentationFlags;
use crate::error::PrepError;
use crate::transform::{OutputFormat, TransformSettings, DEFAULT_TILE_MIN_SIZE, DEFAULT_ZOOM_MIN_SIZE};

/// Everything a dataset build can be told, loadable from YAML.
///
/// Missing fields take their defaults, so a file only needs to name what it
/// changes:
///
/// ```
/// use yoloprep::build::BuildOptions;
///
/// let opts = BuildOptions::from_yaml("width: 608\nheight: 608\ntile: true\n").unwrap();
/// assert_eq!(opts.width, 608);
/// assert!(opts.resize && opts.tile);
/// assert!(opts.validate().is_ok());
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BuildOptions {
    pub width: u32,
    pub height: u32,
    pub batch: u32,
    pub subdivisions: u32,
    /// `max_batches`; `None` uses `max(6000, 2000 * classes)`.
    pub iterations: Option<u32>,
    pub training_fraction: f64,

    pub do_not_resize: bool,
    pub resize: bool,
    pub tile: bool,
    pub zoom: bool,

    /// Annotations with a pixel area at or below this are removed; 0 disables.
    pub small_annotation_threshold: u64,
    pub limit_negatives: bool,
    pub cap_validation: bool,
    pub use_all_images: bool,

    pub recalculate_anchors: bool,
    /// Anchor count; `None` keeps the template's count.
    pub anchor_clusters: Option<usize>,
    pub anchor_attempts: usize,
    pub anchor_time_budget_secs: u64,
    pub class_imbalance: bool,

    pub augmentation: AugmentationFlags,

    pub output_format: OutputFormat,
    pub jpeg_quality_min: u8,
    pub jpeg_quality_max: u8,
    pub tile_min_size: u32,
    pub zoom_min_size: u32,

    pub workers: Option<usize>,
    pub poll_interval_ms: u64,
    pub seed: Option<u64>,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            width: 416,
            height: 416,
            batch: 64,
            subdivisions: 8,
            iterations: None,
            training_fraction: 0.8,
            do_not_resize: false,
            resize: true,
            tile: false,
            zoom: false,
            small_annotation_threshold: 0,
            limit_negatives: true,
            cap_validation: false,
            use_all_images: false,
            recalculate_anchors: false,
            anchor_clusters: None,
            anchor_attempts: 100,
            anchor_time_budget_secs: 60,
            class_imbalance: false,
            augmentation: AugmentationFlags::default(),
            output_format: OutputFormat::Jpeg,
            jpeg_quality_min: 60,
            jpeg_quality_max: 80,
            tile_min_size: DEFAULT_TILE_MIN_SIZE,
            zoom_min_size: DEFAULT_ZOOM_MIN_SIZE,
            workers: None,
            poll_interval_ms: 100,
            seed: None,
        }
    }
}

fn invalid(message: impl Into<String>) -> PrepError {
    PrepError::InvalidBuildParams {
        message: message.into(),
    }
}

impl BuildOptions {
    pub fn from_yaml(text: &str) -> Result<Self, serde_yaml::Error> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(text)
    }

    pub fn load(path: &Path) -> Result<Self, PrepError> {
        let text = fs::read_to_string(path).map_err(|source| PrepError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&text).map_err(|source| PrepError::OptionsParse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Rejects inconsistent parameters. Runs before any file is touched.
    pub fn validate(&self) -> Result<(), PrepError> {
        for (name, value) in [("width", self.width), ("height", self.height)] {
            if value == 0 || value % 32 != 0 {
                return Err(invalid(format!(
                    "network {name} {value} must be a positive multiple of 32"
                )));
            }
        }

        if self.batch == 0 {
            return Err(invalid("batch must be at least 1"));
        }
        if self.subdivisions == 0 || self.subdivisions > self.batch {
            return Err(invalid(format!(
                "subdivisions {} must be between 1 and batch {}",
                self.subdivisions, self.batch
            )));
        }
        if self.batch % self.subdivisions != 0 {
            return Err(invalid(format!(
                "subdivisions {} must divide batch {}",
                self.subdivisions, self.batch
            )));
        }
        if self.iterations == Some(0) {
            return Err(invalid("iterations must be greater than 0"));
        }

        if !(0.5..=1.0).contains(&self.training_fraction) {
            return Err(invalid(format!(
                "training fraction {} must be in the interval [0.5, 1.0]",
                self.training_fraction
            )));
        }

        let transforms = [self.resize, self.tile, self.zoom];
        if self.do_not_resize && transforms.iter().any(|t| *t) {
            return Err(invalid(
                "do_not_resize cannot be combined with resize, tile or zoom",
            ));
        }
        if !self.do_not_resize && !transforms.iter().any(|t| *t) {
            return Err(invalid(
                "select do_not_resize or at least one of resize, tile and zoom",
            ));
        }

        if self.jpeg_quality_min == 0
            || self.jpeg_quality_max > 100
            || self.jpeg_quality_min > self.jpeg_quality_max
        {
            return Err(invalid(format!(
                "JPEG quality range {}..={} must be ordered and within 1..=100",
                self.jpeg_quality_min, self.jpeg_quality_max
            )));
        }

        if self.recalculate_anchors {
            if let Some(clusters) = self.anchor_clusters {
                if clusters <= 1 {
                    return Err(invalid(format!(
                        "anchor cluster count {clusters} must be greater than 1"
                    )));
                }
            }
            if self.anchor_attempts == 0 {
                return Err(invalid("anchor attempts must be greater than 0"));
            }
        }

        if self.poll_interval_ms == 0 {
            return Err(invalid("poll interval must be greater than 0"));
        }

        Ok(())
    }

    /// `max_batches` for a dataset with `classes` classes.
    pub fn max_batches(&self, classes: usize) -> u32 {
        self.iterations.unwrap_or_else(|| {
            let suggested = u32::try_from(classes.saturating_mul(2000)).unwrap_or(u32::MAX);
            suggested.max(6000)
        })
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn anchor_time_budget(&self) -> Duration {
        Duration::from_secs(self.anchor_time_budget_secs)
    }

    pub fn transform_settings(&self) -> TransformSettings {
        TransformSettings {
            target_width: self.width,
            target_height: self.height,
            output_format: self.output_format,
            jpeg_quality_min: self.jpeg_quality_min,
            jpeg_quality_max: self.jpeg_quality_max,
            tile_min_size: self.tile_min_size,
            zoom_min_size: self.zoom_min_size,
            resize_enabled: self.resize,
        }
    }
}
