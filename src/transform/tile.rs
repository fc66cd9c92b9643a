use std::path::Path;

use image::imageops::FilterType;
use image::GenericImageView;
use rand::Rng;

use super::codec::{open_image, write_derived};
use super::pool::Cancellation;
use super::{derived_stem, IndexedRecord, ItemOutput, TransformSettings};
use crate::error::PrepError;
use crate::label::{Annotation, PixelRect};

/// One grid position: the exact grid cell and the tile actually cut out.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TileCell {
    pub col: usize,
    pub row: usize,
    /// Grid cell before adjustment; the cells partition the image exactly.
    pub cell: PixelRect,
    /// Target-sized span centered on the cell and clamped inside the image.
    pub tile: PixelRect,
}

/// `(cell_start, cell_len, tile_start, tile_len)` along one axis.
fn axis_spans(source: i64, target: i64) -> Vec<(i64, i64, i64, i64)> {
    let count = (source as f64 / target as f64).max(1.0).round() as i64;
    let boundary = |i: i64| ((i * source) as f64 / count as f64).round() as i64;

    (0..count)
        .map(|i| {
            let start = boundary(i);
            let len = boundary(i + 1) - start;
            let tile_len = target.min(source);
            let centered = start - (tile_len - len) / 2;
            (start, len, centered.clamp(0, source - tile_len), tile_len)
        })
        .collect()
}

/// Splits a `width x height` image into tiles of roughly `target` size.
///
/// Each axis gets `round(max(1, source / target))` cells. Every tile spans
/// `min(target, source)` pixels centered on its cell: short cells grow,
/// long cells shrink, and the result is shifted back inside the image. Tiles
/// are therefore pixel-exact crops unless the image is smaller than the
/// target.
pub fn tile_grid(width: u32, height: u32, target_width: u32, target_height: u32) -> Vec<TileCell> {
    let cols = axis_spans(i64::from(width), i64::from(target_width.max(1)));
    let rows = axis_spans(i64::from(height), i64::from(target_height.max(1)));

    let mut cells = Vec::with_capacity(cols.len() * rows.len());
    for (row, &(cy, ch, ty, th)) in rows.iter().enumerate() {
        for (col, &(cx, cw, tx, tw)) in cols.iter().enumerate() {
            cells.push(TileCell {
                col,
                row,
                cell: PixelRect::new(cx, cy, cw, ch),
                tile: PixelRect::new(tx, ty, tw, th),
            });
        }
    }
    cells
}

/// Clips annotations of a `source_width x source_height` image to `region`.
///
/// Annotations that miss the region are ignored. Those that overlap it but
/// whose clipped width or height is below `min_size` pixels are dropped and
/// counted. Survivors are normalized to the region.
pub fn clip_annotations(
    annotations: &[Annotation],
    source_width: u32,
    source_height: u32,
    region: &PixelRect,
    min_size: u32,
) -> (Vec<Annotation>, usize) {
    let min_size = i64::from(min_size);
    let mut kept = Vec::new();
    let mut dropped = 0;

    for ann in annotations {
        let rect = ann.to_pixel_rect(source_width, source_height);
        let Some(clipped) = rect.intersect(region) else {
            continue;
        };
        if clipped.width < min_size || clipped.height < min_size {
            dropped += 1;
            continue;
        }
        let local = clipped.relative_to(region);
        kept.push(Annotation::from_pixel_rect(
            ann.class_index,
            &local,
            region.width as u32,
            region.height as u32,
        ));
    }

    (kept, dropped)
}

/// Cuts one source image into target-sized tiles with clipped labels.
pub fn tile_record<R: Rng + ?Sized>(
    item: &IndexedRecord,
    out_dir: &Path,
    settings: &TransformSettings,
    rng: &mut R,
    cancel: &Cancellation,
) -> Result<ItemOutput, PrepError> {
    let record = item.record;
    let grid = tile_grid(
        record.width,
        record.height,
        settings.target_width,
        settings.target_height,
    );

    let mut output = ItemOutput::default();
    // A 1x1 grid adds nothing over the resized copy.
    if settings.resize_enabled && grid.len() == 1 {
        output.skipped = 1;
        output.audit = Some(format!(
            "tile: {}: single tile overlaps the resized copy, skipped",
            record.image_path.display()
        ));
        return Ok(output);
    }

    let img = open_image(&record.image_path)?;
    let (img_w, img_h) = img.dimensions();

    for cell in &grid {
        if cancel.is_cancelled() {
            break;
        }

        let tile = cell.tile;
        let (annotations, dropped) = clip_annotations(
            &record.annotations,
            img_w,
            img_h,
            &tile,
            settings.tile_min_size,
        );
        output.dropped_annotations += dropped;

        let mut cropped = img.crop_imm(
            tile.x as u32,
            tile.y as u32,
            tile.width as u32,
            tile.height as u32,
        );
        if !settings.target_is(cropped.width(), cropped.height()) {
            cropped = cropped.resize_exact(
                settings.target_width,
                settings.target_height,
                FilterType::Triangle,
            );
        }

        let suffix = format!("tile_{}_{}", cell.col, cell.row);
        let stem = derived_stem(out_dir, item.index, &record.image_path, &suffix);
        output
            .images
            .push(write_derived(&cropped, &stem, &annotations, settings.codec(rng))?);
    }

    output.audit = Some(format!(
        "tile: {} ({}x{}) -> {} tile(s), {} annotation(s) dropped",
        record.image_path.display(),
        img_w,
        img_h,
        output.images.len(),
        output.dropped_annotations
    ));
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::label::ImageRecord;
    use rand::{rngs::StdRng, SeedableRng};
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn grid_counts_follow_rounded_ratio() {
        assert_eq!(tile_grid(1000, 500, 416, 416).len(), 2);
        assert_eq!(tile_grid(1300, 900, 416, 416).len(), 3 * 2);
        assert_eq!(tile_grid(100, 100, 416, 416).len(), 1);
    }

    #[test]
    fn cells_cover_image_and_tiles_match_target() {
        let grid = tile_grid(1000, 700, 416, 416);
        let cell_area: i64 = grid.iter().map(|c| c.cell.area()).sum();
        assert_eq!(cell_area, 1000 * 700);

        let whole = PixelRect::new(0, 0, 1000, 700);
        for cell in &grid {
            assert!(whole.contains_rect(&cell.tile));
            // 500 px columns shrink to 416, centered.
            assert_eq!(cell.tile.width, 416);
            assert_eq!(cell.tile.x, cell.cell.x + 42);
        }
        // 700 / 416 rounds to 2 rows of 350, each grown to 416.
        assert!(grid.iter().all(|c| c.tile.height == 416));
        assert_eq!(grid.iter().filter(|c| c.row == 1).count(), 2);
        assert_eq!(grid.last().map(|c| c.tile.y), Some(700 - 416));
    }

    #[test]
    fn oversized_single_cell_is_cropped_to_target_around_center() {
        let grid = tile_grid(600, 600, 416, 416);
        assert_eq!(grid.len(), 1);
        assert_eq!(grid[0].cell, PixelRect::new(0, 0, 600, 600));
        assert_eq!(grid[0].tile, PixelRect::new(92, 92, 416, 416));
    }

    #[test]
    fn small_image_tile_is_whole_image() {
        let grid = tile_grid(300, 200, 416, 416);
        assert_eq!(grid[0].tile, PixelRect::new(0, 0, 300, 200));
    }

    #[test]
    fn clipping_keeps_large_overlaps_only() {
        let region = PixelRect::new(100, 0, 100, 100);
        let anns = [
            // 80..120 x 40..60: 20x20 inside the region after clipping.
            Annotation::new(0, 0.1, 0.05, 0.04, 0.02),
            // 195..205: 5px overlap, dropped.
            Annotation::new(1, 0.2, 0.05, 0.01, 0.02),
            // far outside, ignored.
            Annotation::new(2, 0.9, 0.9, 0.05, 0.05),
        ];
        let (kept, dropped) = clip_annotations(&anns, 1000, 1000, &region, 10);
        assert_eq!(kept.len(), 1);
        assert_eq!(dropped, 1);
        let ann = kept[0];
        assert_eq!(ann.class_index, 0);
        assert!((ann.width - 0.2).abs() < 1e-9);
        assert!((ann.cx - 0.1).abs() < 1e-9);
        assert!((ann.cy - 0.5).abs() < 1e-9);
    }

    fn record(dir: &Path, w: u32, h: u32, anns: Vec<Annotation>) -> ImageRecord {
        let image_path = dir.join("scene.png");
        image::RgbImage::new(w, h).save(&image_path).expect("write image");
        ImageRecord {
            label_path: image_path.with_extension("txt"),
            image_path,
            width: w,
            height: h,
            annotations: anns,
        }
    }

    #[test]
    fn writes_one_file_per_tile_including_negatives() {
        let dir = tempdir().expect("create temp dir");
        let out = dir.path().join("tiles");
        fs::create_dir_all(&out).expect("mkdir");
        // One 40x40 box in the left half only.
        let rec = record(dir.path(), 256, 128, vec![Annotation::new(0, 0.25, 0.5, 40.0 / 256.0, 40.0 / 128.0)]);
        let settings = TransformSettings {
            target_width: 128,
            target_height: 128,
            ..Default::default()
        };
        let mut rng = StdRng::seed_from_u64(5);

        let output = tile_record(
            &IndexedRecord { index: 1, record: &rec },
            &out,
            &settings,
            &mut rng,
            &Cancellation::new(),
        )
        .expect("tile");

        assert_eq!(output.images.len(), 2);
        assert_eq!(output.images[0].annotation_count, 1);
        assert_eq!(output.images[1].annotation_count, 0);
        assert_eq!(fs::metadata(&output.images[1].label_path).expect("label").len(), 0);
        for img in &output.images {
            assert_eq!(image::image_dimensions(&img.image_path).expect("dims"), (128, 128));
        }
    }

    #[test]
    fn tiles_are_exact_crops_with_labels_in_tile_pixels() {
        let dir = tempdir().expect("create temp dir");
        let out = dir.path().join("tiles");
        fs::create_dir_all(&out).expect("mkdir");
        // 300x300 cell, 256 px tile at (22, 22). The first box is 60x60 at
        // (40, 40); the second reaches only 8 px past the tile edge.
        let rec = record(
            dir.path(),
            300,
            300,
            vec![
                Annotation::new(0, 70.0 / 300.0, 70.0 / 300.0, 60.0 / 300.0, 60.0 / 300.0),
                Annotation::new(1, 20.0 / 300.0, 150.0 / 300.0, 20.0 / 300.0, 20.0 / 300.0),
            ],
        );
        let settings = TransformSettings {
            target_width: 256,
            target_height: 256,
            tile_min_size: 10,
            resize_enabled: false,
            ..Default::default()
        };
        let mut rng = StdRng::seed_from_u64(8);

        let output = tile_record(
            &IndexedRecord { index: 2, record: &rec },
            &out,
            &settings,
            &mut rng,
            &Cancellation::new(),
        )
        .expect("tile");

        assert_eq!(output.images.len(), 1);
        assert_eq!(output.dropped_annotations, 1);
        let written = &output.images[0];
        assert_eq!(image::image_dimensions(&written.image_path).expect("dims"), (256, 256));
        let labels = crate::label::io::read_label_file(&written.label_path, None).expect("labels");
        assert_eq!(labels.len(), 1);
        assert!((labels[0].width - 60.0 / 256.0).abs() < 1e-5);
        assert!((labels[0].cx - 48.0 / 256.0).abs() < 1e-5);
    }

    #[test]
    fn whole_image_tile_skipped_when_resize_runs() {
        let dir = tempdir().expect("create temp dir");
        let rec = record(dir.path(), 100, 100, vec![]);
        let settings = TransformSettings {
            target_width: 128,
            target_height: 128,
            resize_enabled: true,
            ..Default::default()
        };
        let mut rng = StdRng::seed_from_u64(6);
        let output = tile_record(
            &IndexedRecord { index: 0, record: &rec },
            dir.path(),
            &settings,
            &mut rng,
            &Cancellation::new(),
        )
        .expect("tile");
        assert!(output.images.is_empty());
        assert_eq!(output.skipped, 1);
    }

    #[test]
    fn single_cell_grid_skipped_when_resize_runs_even_if_cropped() {
        let dir = tempdir().expect("create temp dir");
        let rec = record(dir.path(), 600, 600, vec![]);
        let settings = TransformSettings {
            target_width: 416,
            target_height: 416,
            resize_enabled: true,
            ..Default::default()
        };
        let mut rng = StdRng::seed_from_u64(9);
        let output = tile_record(
            &IndexedRecord { index: 0, record: &rec },
            dir.path(),
            &settings,
            &mut rng,
            &Cancellation::new(),
        )
        .expect("tile");
        assert!(output.images.is_empty());
        assert_eq!(output.skipped, 1);
    }
}
