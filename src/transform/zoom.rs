use std::path::Path;

use rand::{Rng, RngExt};

use super::codec::{open_image, random_filter, write_derived};
use super::pool::Cancellation;
use super::tile::clip_annotations;
use super::{
    derived_stem, IndexedRecord, ItemOutput, TransformSettings, ZOOM_ELIGIBILITY_FACTOR,
    ZOOM_MAX_REJECTIONS,
};
use crate::error::PrepError;
use crate::label::{Annotation, PixelRect};

/// Smallest crop, as a multiple of the target size.
const MIN_ZOOM_FACTOR: f64 = 0.8;

/// Only images at least 1.25x the target in both dimensions are zoomed.
pub fn zoom_eligible(width: u32, height: u32, target_width: u32, target_height: u32) -> bool {
    f64::from(width) >= ZOOM_ELIGIBILITY_FACTOR * f64::from(target_width)
        && f64::from(height) >= ZOOM_ELIGIBILITY_FACTOR * f64::from(target_height)
}

#[derive(Clone, Copy, Debug)]
struct PointOfInterest {
    x: f64,
    y: f64,
    claimed: bool,
}

/// Corner pixel centers and the center of every annotation.
fn points_of_interest(annotations: &[Annotation], width: u32, height: u32) -> Vec<PointOfInterest> {
    let mut points = Vec::with_capacity(annotations.len() * 5);
    for ann in annotations {
        let rect = ann.to_pixel_rect(width, height);
        let left = rect.x as f64 + 0.5;
        let top = rect.y as f64 + 0.5;
        let right = rect.right() as f64 - 0.5;
        let bottom = rect.bottom() as f64 - 0.5;
        let (cx, cy) = rect.midpoint();
        for (x, y) in [(left, top), (right, top), (left, bottom), (right, bottom), (cx, cy)] {
            points.push(PointOfInterest {
                x,
                y,
                claimed: false,
            });
        }
    }
    points
}

/// Samples crop rectangles for one image.
///
/// A crop is `factor * target` with `factor` uniform in
/// `[0.8, min(width / target_w, height / target_h)]` at a uniform position.
/// It is accepted when its midpoint lies outside every accepted crop, or when
/// it contains a point of interest no accepted crop has claimed yet.
/// Sampling stops after 5 consecutive rejections.
pub fn sample_crops<R: Rng + ?Sized>(
    width: u32,
    height: u32,
    annotations: &[Annotation],
    target_width: u32,
    target_height: u32,
    rng: &mut R,
    cancel: &Cancellation,
) -> Vec<PixelRect> {
    if !zoom_eligible(width, height, target_width, target_height) {
        return Vec::new();
    }

    let (w, h) = (i64::from(width), i64::from(height));
    let max_factor = (f64::from(width) / f64::from(target_width))
        .min(f64::from(height) / f64::from(target_height));
    let mut points = points_of_interest(annotations, width, height);
    let mut accepted: Vec<PixelRect> = Vec::new();
    let mut rejections = 0;

    while rejections < ZOOM_MAX_REJECTIONS {
        if cancel.is_cancelled() {
            break;
        }

        let factor = rng.random_range(MIN_ZOOM_FACTOR..=max_factor);
        let crop_w = ((factor * f64::from(target_width)).round() as i64).clamp(1, w);
        let crop_h = ((factor * f64::from(target_height)).round() as i64).clamp(1, h);
        let x = rng.random_range(0..=w - crop_w);
        let y = rng.random_range(0..=h - crop_h);
        let crop = PixelRect::new(x, y, crop_w, crop_h);

        let (mx, my) = crop.midpoint();
        let new_area = accepted.iter().all(|c| !c.contains_point(mx, my));
        let claims_point = points
            .iter()
            .any(|p| !p.claimed && crop.contains_point(p.x, p.y));

        if new_area || claims_point {
            for point in points.iter_mut() {
                if crop.contains_point(point.x, point.y) {
                    point.claimed = true;
                }
            }
            accepted.push(crop);
            rejections = 0;
        } else {
            rejections += 1;
        }
    }

    accepted
}

/// Writes random zoomed crops of one source image, each scaled to the target.
pub fn zoom_record<R: Rng + ?Sized>(
    item: &IndexedRecord,
    out_dir: &Path,
    settings: &TransformSettings,
    rng: &mut R,
    cancel: &Cancellation,
) -> Result<ItemOutput, PrepError> {
    let record = item.record;
    let mut output = ItemOutput::default();
    if !zoom_eligible(
        record.width,
        record.height,
        settings.target_width,
        settings.target_height,
    ) {
        output.skipped = 1;
        return Ok(output);
    }

    let img = open_image(&record.image_path)?;
    let crops = sample_crops(
        img.width(),
        img.height(),
        &record.annotations,
        settings.target_width,
        settings.target_height,
        rng,
        cancel,
    );

    for (n, crop) in crops.iter().enumerate() {
        if cancel.is_cancelled() {
            break;
        }

        let (annotations, dropped) = clip_annotations(
            &record.annotations,
            img.width(),
            img.height(),
            crop,
            settings.zoom_min_size,
        );
        output.dropped_annotations += dropped;

        let zoomed = img
            .crop_imm(crop.x as u32, crop.y as u32, crop.width as u32, crop.height as u32)
            .resize_exact(settings.target_width, settings.target_height, random_filter(rng));
        let stem = derived_stem(out_dir, item.index, &record.image_path, &format!("zoom_{n}"));
        output
            .images
            .push(write_derived(&zoomed, &stem, &annotations, settings.codec(rng))?);
    }

    output.audit = Some(format!(
        "zoom: {} ({}x{}) -> {} crop(s), {} annotation(s) dropped",
        record.image_path.display(),
        img.width(),
        img.height(),
        output.images.len(),
        output.dropped_annotations
    ));
    Ok(output)
}
