//! Annotation and image records.
//!
//! Annotations are stored normalized to the image they belong to. The pixel
//! form is always derived from the normalized one on demand, never stored.

use std::path::PathBuf;

use serde::Serialize;

use super::bbox::BBoxXYXY;
use super::rect::PixelRect;
use super::space::Normalized;

/// Number of decimals written for every coordinate in a label line.
pub const LABEL_DECIMALS: usize = 10;

/// One YOLO bounding box: class index plus normalized center and size.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Annotation {
    pub class_index: usize,
    pub cx: f64,
    pub cy: f64,
    pub width: f64,
    pub height: f64,
}

impl Annotation {
    pub fn new(class_index: usize, cx: f64, cy: f64, width: f64, height: f64) -> Self {
        Self {
            class_index,
            cx,
            cy,
            width,
            height,
        }
    }

    /// Builds a normalized annotation from a pixel rectangle inside an image
    /// of the given size. The result is clamped to the image.
    pub fn from_pixel_rect(
        class_index: usize,
        rect: &PixelRect,
        image_width: u32,
        image_height: u32,
    ) -> Self {
        let iw = image_width as f64;
        let ih = image_height as f64;
        let x0 = (rect.x as f64).clamp(0.0, iw);
        let y0 = (rect.y as f64).clamp(0.0, ih);
        let x1 = (rect.right() as f64).clamp(0.0, iw);
        let y1 = (rect.bottom() as f64).clamp(0.0, ih);
        let bbox = BBoxXYXY::<Normalized>::from_xyxy(x0 / iw, y0 / ih, x1 / iw, y1 / ih);
        let (cx, cy, w, h) = bbox.to_cxcywh();
        Self::new(class_index, cx, cy, w, h)
    }

    #[inline]
    pub fn bbox(&self) -> BBoxXYXY<Normalized> {
        BBoxXYXY::from_cxcywh(self.cx, self.cy, self.width, self.height)
    }

    /// Pixel rectangle for an image of the given size:
    /// `x = round((cx - w/2) * W)`, `width = round(w * W)`.
    pub fn to_pixel_rect(&self, image_width: u32, image_height: u32) -> PixelRect {
        let iw = image_width as f64;
        let ih = image_height as f64;
        PixelRect::new(
            ((self.cx - self.width / 2.0) * iw).round() as i64,
            ((self.cy - self.height / 2.0) * ih).round() as i64,
            (self.width * iw).round() as i64,
            (self.height * ih).round() as i64,
        )
    }

    /// True when the box has a positive size and its center is inside the image.
    pub fn is_valid(&self) -> bool {
        self.width > 0.0
            && self.height > 0.0
            && (0.0..=1.0).contains(&self.cx)
            && (0.0..=1.0).contains(&self.cy)
    }

    /// Formats the annotation as one `class cx cy w h` label line (no newline).
    pub fn to_label_line(&self) -> String {
        format!(
            "{} {:.prec$} {:.prec$} {:.prec$} {:.prec$}",
            self.class_index,
            self.cx,
            self.cy,
            self.width,
            self.height,
            prec = LABEL_DECIMALS
        )
    }
}

/// A source image discovered on disk together with its labels.
#[derive(Clone, Debug)]
pub struct ImageRecord {
    pub image_path: PathBuf,
    pub label_path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub annotations: Vec<Annotation>,
}

impl ImageRecord {
    #[inline]
    pub fn is_negative(&self) -> bool {
        self.annotations.is_empty()
    }
}

/// An image produced by one of the transform stages (or passed through).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DerivedImage {
    pub image_path: PathBuf,
    pub label_path: PathBuf,
    pub annotation_count: usize,
}
