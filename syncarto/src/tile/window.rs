//! Pyramid level selection and tile pixel windows.
//!
//! Pyramid levels are enumerated finest-first (level 0 is the full
//! resolution image) while map zoom grows from coarse to fine, so a tile at
//! zoom `z` reads level `level_count - z - 1`.
//!
//! ```text
//! levels (finest-first):   0      1      2      3
//! map zoom:                3      2      1      0
//! ```
//!
//! Tile rows are counted from the bottom edge of the image, raster rows from
//! the top, so the vertical window is flipped:
//!
//! ```text
//! [x·tw, H − (y+1)·th, (x+1)·tw, H − y·th]
//! ```

/// Returns the pyramid level serving zoom `z`, or `None` when the pyramid has
/// no level for it.
#[inline]
pub fn level_index(level_count: usize, z: u8) -> Option<usize> {
    let z = z as usize;
    if z >= level_count {
        return None;
    }
    Some(level_count - z - 1)
}

/// A pixel window `[x0, y0, x1, y1)` into one pyramid level.
///
/// The window may extend past the image edges; pixels outside the image are
/// filled by the decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PixelWindow {
    pub x0: i64,
    pub y0: i64,
    pub x1: i64,
    pub y1: i64,
}

impl PixelWindow {
    /// Create a window from its corner coordinates.
    pub fn new(x0: i64, y0: i64, x1: i64, y1: i64) -> Self {
        Self { x0, y0, x1, y1 }
    }

    /// Window covering tile `(x, y)` of a level with the given tile size and
    /// image height.
    pub fn for_tile(x: u32, y: u32, tile_width: u32, tile_height: u32, image_height: u32) -> Self {
        let (x, y) = (x as i64, y as i64);
        let (tw, th, h) = (tile_width as i64, tile_height as i64, image_height as i64);
        Self {
            x0: x * tw,
            y0: h - (y + 1) * th,
            x1: (x + 1) * tw,
            y1: h - y * th,
        }
    }

    /// Window width in pixels.
    pub fn width(&self) -> usize {
        (self.x1 - self.x0).max(0) as usize
    }

    /// Window height in pixels.
    pub fn height(&self) -> usize {
        (self.y1 - self.y0).max(0) as usize
    }

    /// Number of pixels covered by the window.
    pub fn pixel_count(&self) -> usize {
        self.width() * self.height()
    }

    /// Intersection with an image of the given size, or `None` when the window
    /// lies entirely outside it.
    pub fn clip(&self, width: u32, height: u32) -> Option<PixelWindow> {
        let clipped = PixelWindow {
            x0: self.x0.max(0),
            y0: self.y0.max(0),
            x1: self.x1.min(width as i64),
            y1: self.y1.min(height as i64),
        };
        (clipped.x0 < clipped.x1 && clipped.y0 < clipped.y1).then_some(clipped)
    }
}
