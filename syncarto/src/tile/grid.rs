//! Tile grid derived from a COG's image pyramid.

use std::fmt;

/// Axis-aligned extent `[min_x, min_y, max_x, max_y]` in some projection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Extent {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Extent {
    /// Create an extent, normalising the corner order.
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self {
            min_x: x1.min(x2),
            min_y: y1.min(y2),
            max_x: x1.max(x2),
            max_y: y1.max(y2),
        }
    }

    /// Returns true when the point lies inside the extent (edges included).
    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.min_x && x <= self.max_x && y >= self.min_y && y <= self.max_y
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    /// Centre point of the extent.
    pub fn center(&self) -> (f64, f64) {
        (
            (self.min_x + self.max_x) / 2.0,
            (self.min_y + self.max_y) / 2.0,
        )
    }

    /// Smallest extent containing every point, or `None` for an empty slice.
    pub fn enclosing(points: &[(f64, f64)]) -> Option<Self> {
        let (first, rest) = points.split_first()?;
        let mut extent = Extent::new(first.0, first.1, first.0, first.1);
        for &(x, y) in rest {
            extent.min_x = extent.min_x.min(x);
            extent.min_y = extent.min_y.min(y);
            extent.max_x = extent.max_x.max(x);
            extent.max_y = extent.max_y.max(y);
        }
        Some(extent)
    }
}

impl fmt::Display for Extent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {}, {}, {}]",
            self.min_x, self.min_y, self.max_x, self.max_y
        )
    }
}

/// Errors raised while building a tile grid.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TileGridError {
    #[error("tile grid needs at least one level")]
    Empty,
    #[error("tile grid has {resolutions} resolutions but {tile_sizes} tile sizes")]
    LengthMismatch {
        resolutions: usize,
        tile_sizes: usize,
    },
}

/// Per-zoom resolutions and tile sizes plus the grid's origin and extent.
///
/// Levels are ordered coarsest-first so that index `z` of the grid serves map
/// zoom `z`.
#[derive(Debug, Clone, PartialEq)]
pub struct TileGrid {
    extent: Extent,
    origin: (f64, f64),
    resolutions: Vec<f64>,
    tile_sizes: Vec<(u32, u32)>,
}

impl TileGrid {
    /// Build a grid from coarsest-first resolutions and tile sizes.
    pub fn new(
        extent: Extent,
        origin: (f64, f64),
        resolutions: Vec<f64>,
        tile_sizes: Vec<(u32, u32)>,
    ) -> Result<Self, TileGridError> {
        if resolutions.is_empty() {
            return Err(TileGridError::Empty);
        }
        if resolutions.len() != tile_sizes.len() {
            return Err(TileGridError::LengthMismatch {
                resolutions: resolutions.len(),
                tile_sizes: tile_sizes.len(),
            });
        }
        Ok(Self {
            extent,
            origin,
            resolutions,
            tile_sizes,
        })
    }

    /// Build a grid from a pyramid enumerated finest-first.
    ///
    /// The levels are reversed so the coarsest level becomes zoom 0, and the
    /// origin sits at the bottom-left corner of the extent's x origin.
    pub fn from_pyramid(
        extent: Extent,
        origin_x: f64,
        finest_first: &[(f64, u32, u32)],
    ) -> Result<Self, TileGridError> {
        let resolutions = finest_first.iter().rev().map(|l| l.0).collect();
        let tile_sizes = finest_first.iter().rev().map(|l| (l.1, l.2)).collect();
        Self::new(extent, (origin_x, extent.min_y), resolutions, tile_sizes)
    }

    pub fn extent(&self) -> Extent {
        self.extent
    }

    pub fn origin(&self) -> (f64, f64) {
        self.origin
    }

    /// Resolutions, coarsest first.
    pub fn resolutions(&self) -> &[f64] {
        &self.resolutions
    }

    /// Tile sizes `(width, height)`, coarsest first.
    pub fn tile_sizes(&self) -> &[(u32, u32)] {
        &self.tile_sizes
    }

    /// Number of zoom levels in the grid.
    pub fn zoom_count(&self) -> usize {
        self.resolutions.len()
    }

    /// Highest zoom the grid serves.
    pub fn max_zoom(&self) -> u8 {
        (self.resolutions.len() - 1).min(u8::MAX as usize) as u8
    }

    /// Map-space extent covered by a tile, or `None` for a zoom outside the
    /// grid.
    pub fn tile_extent(&self, z: u8, x: u32, y: u32) -> Option<Extent> {
        let resolution = *self.resolutions.get(z as usize)?;
        let (tw, th) = *self.tile_sizes.get(z as usize)?;
        let span_x = tw as f64 * resolution.abs();
        let span_y = th as f64 * resolution.abs();
        let min_x = self.origin.0 + x as f64 * span_x;
        let min_y = self.origin.1 + y as f64 * span_y;
        Some(Extent::new(min_x, min_y, min_x + span_x, min_y + span_y))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_extent() -> Extent {
        Extent::new(500_000.0, 4_000_000.0, 510_240.0, 4_010_240.0)
    }

    #[test]
    fn test_extent_normalises_corners() {
        let extent = Extent::new(10.0, 20.0, -10.0, -20.0);
        assert_eq!(extent.min_x, -10.0);
        assert_eq!(extent.max_y, 20.0);
        assert!(extent.contains(0.0, 0.0));
        assert!(!extent.contains(11.0, 0.0));
    }

    #[test]
    fn test_from_pyramid_reverses_levels() {
        let levels = [(10.0, 512, 512), (20.0, 256, 256), (40.0, 128, 128)];
        let grid = TileGrid::from_pyramid(sample_extent(), 500_000.0, &levels).unwrap();

        assert_eq!(grid.resolutions(), &[40.0, 20.0, 10.0]);
        assert_eq!(grid.tile_sizes(), &[(128, 128), (256, 256), (512, 512)]);
        assert_eq!(grid.origin(), (500_000.0, 4_000_000.0));
        assert_eq!(grid.max_zoom(), 2);
    }

    #[test]
    fn test_tile_extent_from_bottom_left_origin() {
        let levels = [(10.0, 256, 256)];
        let grid = TileGrid::from_pyramid(sample_extent(), 500_000.0, &levels).unwrap();

        let extent = grid.tile_extent(0, 1, 2).unwrap();
        assert_eq!(extent.min_x, 502_560.0);
        assert_eq!(extent.min_y, 4_005_120.0);
        assert!(grid.tile_extent(1, 0, 0).is_none());
    }

    #[test]
    fn test_new_rejects_empty_and_mismatched() {
        assert_eq!(
            TileGrid::new(sample_extent(), (0.0, 0.0), vec![], vec![]),
            Err(TileGridError::Empty)
        );
        assert!(matches!(
            TileGrid::new(sample_extent(), (0.0, 0.0), vec![1.0], vec![]),
            Err(TileGridError::LengthMismatch { .. })
        ));
    }
}
