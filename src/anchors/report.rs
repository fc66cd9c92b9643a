//! Anchor set types and terminal formatting.

use serde::Serialize;
use std::fmt;

/// One anchor box shape in network pixels.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Anchor {
    pub width: f64,
    pub height: f64,
}

impl Anchor {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    #[inline]
    pub fn area(&self) -> f64 {
        self.width * self.height
    }
}

/// Result of anchor clustering for one network geometry.
#[derive(Clone, Debug, Serialize)]
pub struct AnchorSet {
    /// Anchors sorted by ascending area.
    pub anchors: Vec<Anchor>,
    /// Number of training boxes per class index.
    pub counters_per_class: Vec<usize>,
    /// Mean best-anchor IoU over every box, as a percentage.
    pub average_iou: f64,
}

impl AnchorSet {
    /// Darknet `anchors=` value: `"w, h, w, h, ..."` in whole pixels.
    pub fn format_anchors(&self) -> String {
        self.anchors
            .iter()
            .map(|a| format!("{}, {}", a.width.round() as i64, a.height.round() as i64))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for AnchorSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Anchors:     {}", self.format_anchors())?;
        writeln!(f, "Average IoU: {:.2}%", self.average_iou)?;
        writeln!(f, "Areas:")?;
        for (idx, anchor) in self.anchors.iter().enumerate() {
            writeln!(
                f,
                "  {:>2}: {:>4} x {:<4} (area {:.0})",
                idx,
                anchor.width.round() as i64,
                anchor.height.round() as i64,
                anchor.area()
            )?;
        }
        let counters = self
            .counters_per_class
            .iter()
            .map(usize::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        writeln!(f, "Boxes per class: {}", counters)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anchors_format_as_rounded_pairs() {
        let set = AnchorSet {
            anchors: vec![Anchor::new(10.4, 13.6), Anchor::new(33.0, 23.0)],
            counters_per_class: vec![4],
            average_iou: 80.0,
        };
        assert_eq!(set.format_anchors(), "10, 14, 33, 23");
        let text = set.to_string();
        assert!(text.contains("Average IoU: 80.00%"));
        assert!(text.contains("Boxes per class: 4"));
    }
}
