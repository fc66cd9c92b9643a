//! Integer pixel rectangles used by the tiling and crop workers.

/// A rectangle in whole pixels, `x`/`y` being the top-left corner.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PixelRect {
    pub x: i64,
    pub y: i64,
    pub width: i64,
    pub height: i64,
}

impl PixelRect {
    #[inline]
    pub fn new(x: i64, y: i64, width: i64, height: i64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    #[inline]
    pub fn right(&self) -> i64 {
        self.x + self.width
    }

    #[inline]
    pub fn bottom(&self) -> i64 {
        self.y + self.height
    }

    #[inline]
    pub fn area(&self) -> i64 {
        self.width.max(0) * self.height.max(0)
    }

    /// Overlap of two rectangles, `None` unless it has a non-zero area.
    pub fn intersect(&self, other: &PixelRect) -> Option<PixelRect> {
        let x0 = self.x.max(other.x);
        let y0 = self.y.max(other.y);
        let x1 = self.right().min(other.right());
        let y1 = self.bottom().min(other.bottom());
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some(PixelRect::new(x0, y0, x1 - x0, y1 - y0))
    }

    /// Half-open containment test: the right and bottom edges are outside.
    #[inline]
    pub fn contains_point(&self, px: f64, py: f64) -> bool {
        px >= self.x as f64 && px < self.right() as f64 && py >= self.y as f64 && py < self.bottom() as f64
    }

    #[inline]
    pub fn contains_rect(&self, other: &PixelRect) -> bool {
        other.x >= self.x
            && other.y >= self.y
            && other.right() <= self.right()
            && other.bottom() <= self.bottom()
    }

    #[inline]
    pub fn midpoint(&self) -> (f64, f64) {
        (
            self.x as f64 + self.width as f64 / 2.0,
            self.y as f64 + self.height as f64 / 2.0,
        )
    }

    /// Moves the rectangle so that `origin` becomes (0, 0).
    #[inline]
    pub fn relative_to(&self, origin: &PixelRect) -> PixelRect {
        PixelRect::new(self.x - origin.x, self.y - origin.y, self.width, self.height)
    }
}
