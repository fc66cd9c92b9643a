//! Annotation store: the normalized YOLO label model and its file format.
//!
//! Labels are held in normalized `(cx, cy, w, h)` form relative to the image
//! they currently belong to. Pixel rectangles are derived on demand with
//! explicit rounding so repeated conversions do not drift.
//!
//! # Example
//!
//! ```
//! use yoloprep::label::{Annotation, PixelRect};
//!
//! let ann = Annotation::new(0, 0.5, 0.5, 0.5, 0.5);
//! assert_eq!(ann.to_pixel_rect(100, 100), PixelRect::new(25, 25, 50, 50));
//! ```

mod bbox;
pub mod io;
mod model;
mod rect;
mod space;

pub use bbox::BBoxXYXY;
pub use model::{Annotation, DerivedImage, ImageRecord, LABEL_DECIMALS};
pub use rect::PixelRect;
pub use space::Normalized;
