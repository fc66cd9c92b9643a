//! Image transform stages: resize, tile and zoom.
//!
//! Every stage reads the source images, writes derived images plus label
//! files into its own subdirectory of the output directory, and reports the
//! derived images back for the split. The stages run on the partitioned
//! worker pool in [`pool`].

pub mod codec;
pub mod pool;
mod resize;
mod tile;
mod zoom;

pub use codec::{Codec, OutputFormat};
pub use pool::{
    Cancellation, ItemOutput, PoolOptions, ProgressFn, StageCounters, StageOutcome, StageProgress,
    WorkItem,
};
pub use resize::resize_record;
pub use tile::{clip_annotations, tile_grid, tile_record, TileCell};
pub use zoom::{sample_crops, zoom_eligible, zoom_record};

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use log::info;
use rand::rngs::StdRng;

use crate::error::PrepError;
use crate::label::ImageRecord;

/// Minimum clipped size, in pixels, for an annotation to survive tiling.
pub const DEFAULT_TILE_MIN_SIZE: u32 = 10;
/// Minimum clipped size, in pixels, for an annotation to survive a zoom crop.
pub const DEFAULT_ZOOM_MIN_SIZE: u32 = 5;
/// Both sides must be at least this many times the target for zoom crops.
pub const ZOOM_ELIGIBILITY_FACTOR: f64 = 1.25;
/// Consecutive rejected zoom crops after which sampling stops.
pub const ZOOM_MAX_REJECTIONS: usize = 5;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransformKind {
    Resize,
    Tile,
    Zoom,
}

impl TransformKind {
    pub fn name(&self) -> &'static str {
        match self {
            TransformKind::Resize => "resize",
            TransformKind::Tile => "tile",
            TransformKind::Zoom => "zoom",
        }
    }
}

impl fmt::Display for TransformKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Geometry and encoding shared by all transform workers.
#[derive(Clone, Debug)]
pub struct TransformSettings {
    pub target_width: u32,
    pub target_height: u32,
    pub output_format: OutputFormat,
    pub jpeg_quality_min: u8,
    pub jpeg_quality_max: u8,
    pub tile_min_size: u32,
    pub zoom_min_size: u32,
    /// Whether the resize stage also runs; a 1x1 tile grid is then skipped.
    pub resize_enabled: bool,
}

impl Default for TransformSettings {
    fn default() -> Self {
        Self {
            target_width: 416,
            target_height: 416,
            output_format: OutputFormat::Jpeg,
            jpeg_quality_min: 60,
            jpeg_quality_max: 80,
            tile_min_size: DEFAULT_TILE_MIN_SIZE,
            zoom_min_size: DEFAULT_ZOOM_MIN_SIZE,
            resize_enabled: true,
        }
    }
}

impl TransformSettings {
    pub fn codec<R: rand::Rng + ?Sized>(&self, rng: &mut R) -> Codec {
        Codec::choose(
            self.output_format,
            self.jpeg_quality_min,
            self.jpeg_quality_max,
            rng,
        )
    }

    pub fn target_is(&self, width: u32, height: u32) -> bool {
        self.target_width == width && self.target_height == height
    }
}

/// A source record plus its position in the work list, used to give every
/// derived file a unique name.
#[derive(Clone, Copy, Debug)]
pub struct IndexedRecord<'a> {
    pub index: usize,
    pub record: &'a ImageRecord,
}

impl WorkItem for IndexedRecord<'_> {
    fn source_path(&self) -> &Path {
        &self.record.image_path
    }
}

/// `<dir>/<index>_<stem>_<suffix>` without an extension. Dots in the source
/// stem are replaced so the codec extension can be appended safely.
pub fn derived_stem(dir: &Path, index: usize, source: &Path, suffix: &str) -> PathBuf {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().replace('.', "_"))
        .unwrap_or_else(|| "image".to_string());
    dir.join(format!("{index:06}_{stem}_{suffix}"))
}

/// Runs one transform stage over `records`, writing into `<output>/<subdir>`.
#[allow(clippy::too_many_arguments)]
pub fn run_transform(
    kind: TransformKind,
    records: &[ImageRecord],
    output_dir: &Path,
    settings: &TransformSettings,
    pool_opts: &PoolOptions,
    rng: &mut StdRng,
    cancel: &Cancellation,
    progress: Option<&ProgressFn<'_>>,
) -> Result<StageOutcome, PrepError> {
    let stage_dir = output_dir.join(match kind {
        TransformKind::Resize => "resize",
        TransformKind::Tile => "tiles",
        TransformKind::Zoom => "zoom",
    });
    fs::create_dir_all(&stage_dir).map_err(|source| PrepError::OutputWrite {
        path: stage_dir.clone(),
        source,
    })?;

    let items: Vec<IndexedRecord> = records
        .iter()
        .enumerate()
        .map(|(index, record)| IndexedRecord { index, record })
        .collect();

    let outcome = pool::run_partitioned(
        kind.name(),
        &items,
        pool_opts,
        rng,
        cancel,
        progress,
        |item, ctx| match kind {
            TransformKind::Resize => resize_record(item, &stage_dir, settings, &mut ctx.rng),
            TransformKind::Tile => tile_record(item, &stage_dir, settings, &mut ctx.rng, ctx.cancel),
            TransformKind::Zoom => zoom_record(item, &stage_dir, settings, &mut ctx.rng, ctx.cancel),
        },
    )?;

    info!(
        "{}: {} source image(s) -> {} image(s) ({} negative, {} skipped, {} unreadable, {} annotation(s) dropped)",
        kind,
        outcome.counters.processed,
        outcome.counters.created,
        outcome.counters.negatives,
        outcome.counters.skipped,
        outcome.counters.errors,
        outcome.counters.dropped_annotations
    );
    Ok(outcome)
}
