//! Tile addressing and pyramid geometry.
//!
//! Maps the map framework's `z/x/y` tile coordinates onto pyramid levels and
//! pixel windows of a COG, and derives the tile grid a map layer needs.

mod coord;
mod grid;
mod window;

pub use coord::{TileCoord, TileCoordParseError};
pub use grid::{Extent, TileGrid, TileGridError};
pub use window::{level_index, PixelWindow};
