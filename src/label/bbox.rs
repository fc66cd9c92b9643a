//! Floating point bounding boxes in XYXY form.

use std::marker::PhantomData;

/// An axis-aligned box `(xmin, ymin, xmax, ymax)` tagged with its space.
///
/// Construction does not check ordering; an inverted box has zero area.
#[derive(Clone, Copy, PartialEq)]
pub struct BBoxXYXY<TSpace> {
    pub xmin: f64,
    pub ymin: f64,
    pub xmax: f64,
    pub ymax: f64,
    _space: PhantomData<TSpace>,
}

impl<TSpace> BBoxXYXY<TSpace> {
    #[inline]
    pub fn from_xyxy(xmin: f64, ymin: f64, xmax: f64, ymax: f64) -> Self {
        Self {
            xmin,
            ymin,
            xmax,
            ymax,
            _space: PhantomData,
        }
    }

    /// Builds a box from its center and size.
    #[inline]
    pub fn from_cxcywh(cx: f64, cy: f64, w: f64, h: f64) -> Self {
        Self::from_xyxy(cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0)
    }

    #[inline]
    pub fn to_cxcywh(&self) -> (f64, f64, f64, f64) {
        (
            (self.xmin + self.xmax) / 2.0,
            (self.ymin + self.ymax) / 2.0,
            self.width(),
            self.height(),
        )
    }

    #[inline]
    pub fn width(&self) -> f64 {
        self.xmax - self.xmin
    }

    #[inline]
    pub fn height(&self) -> f64 {
        self.ymax - self.ymin
    }

    /// Area; zero for malformed boxes.
    #[inline]
    pub fn area(&self) -> f64 {
        self.width().max(0.0) * self.height().max(0.0)
    }

    /// Area of the overlap between two boxes in the same space.
    pub fn intersection_area(&self, other: &Self) -> f64 {
        let w = self.xmax.min(other.xmax) - self.xmin.max(other.xmin);
        let h = self.ymax.min(other.ymax) - self.ymin.max(other.ymin);
        if w <= 0.0 || h <= 0.0 {
            0.0
        } else {
            w * h
        }
    }

    /// Intersection over union. Returns 0.0 when the union is empty.
    pub fn iou(&self, other: &Self) -> f64 {
        let inter = self.intersection_area(other);
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }
}

impl<TSpace> std::fmt::Debug for BBoxXYXY<TSpace> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BBoxXYXY")
            .field("xmin", &self.xmin)
            .field("ymin", &self.ymin)
            .field("xmax", &self.xmax)
            .field("ymax", &self.ymax)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::label::Normalized;

    #[test]
    fn cxcywh_roundtrip() {
        let bbox: BBoxXYXY<Normalized> = BBoxXYXY::from_cxcywh(0.5, 0.4, 0.2, 0.1);
        let (cx, cy, w, h) = bbox.to_cxcywh();
        assert!((cx - 0.5).abs() < 1e-12);
        assert!((cy - 0.4).abs() < 1e-12);
        assert!((w - 0.2).abs() < 1e-12);
        assert!((h - 0.1).abs() < 1e-12);
    }

    #[test]
    fn iou_of_identical_boxes_is_one() {
        let a: BBoxXYXY<Normalized> = BBoxXYXY::from_xyxy(0.1, 0.1, 0.2, 0.3);
        assert!((a.iou(&a) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn iou_of_touching_boxes_is_zero() {
        let a: BBoxXYXY<Normalized> = BBoxXYXY::from_xyxy(0.0, 0.0, 0.1, 0.1);
        let b: BBoxXYXY<Normalized> = BBoxXYXY::from_xyxy(0.1, 0.0, 0.2, 0.1);
        assert_eq!(a.iou(&b), 0.0);
    }

    #[test]
    fn iou_partial_overlap() {
        let a: BBoxXYXY<Normalized> = BBoxXYXY::from_xyxy(0.0, 0.0, 0.1, 0.1);
        let b: BBoxXYXY<Normalized> = BBoxXYXY::from_xyxy(0.05, 0.0, 0.15, 0.1);
        // 1/2 overlap of each -> 1/3
        assert!((a.iou(&b) - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn inverted_box_has_zero_area() {
        let bbox: BBoxXYXY<Normalized> = BBoxXYXY::from_xyxy(0.1, 0.1, 0.05, 0.2);
        assert_eq!(bbox.area(), 0.0);
        assert_eq!(bbox.iou(&bbox), 0.0);
    }
}
