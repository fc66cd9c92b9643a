//! Coordinate space marker for floating point boxes.
//!
//! Pixel geometry uses the integer [`PixelRect`](super::PixelRect); boxes
//! tagged [`Normalized`] are relative to their image.

use std::fmt;

/// Marker for coordinates normalized to `0.0..=1.0` of the owning image.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub enum Normalized {}

impl fmt::Debug for Normalized {
    fn fmt(&self, _: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {}
    }
}
