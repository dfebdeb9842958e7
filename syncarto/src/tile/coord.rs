//! Tile coordinate type.

use std::fmt;
use std::str::FromStr;

/// A map tile address as requested by the map framework.
///
/// `z` counts up from the coarsest level of the layer's tile grid, `x` grows
/// eastward and `y` grows away from the grid origin.
///
/// # Example
///
/// ```
/// use syncarto::tile::TileCoord;
///
/// let tile: TileCoord = "3/2/1".parse().unwrap();
/// assert_eq!(tile, TileCoord::new(3, 2, 1));
/// assert_eq!(tile.to_string(), "3/2/1");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileCoord {
    /// Zoom level (0 = coarsest level of the grid)
    pub z: u8,
    /// Tile column
    pub x: u32,
    /// Tile row
    pub y: u32,
}

impl TileCoord {
    /// Create a new tile coordinate.
    pub fn new(z: u8, x: u32, y: u32) -> Self {
        Self { z, x, y }
    }
}

impl fmt::Display for TileCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.z, self.x, self.y)
    }
}

/// Error returned when a `z/x/y` string cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid tile coordinate '{0}', expected z/x/y")]
pub struct TileCoordParseError(pub String);

impl FromStr for TileCoord {
    type Err = TileCoordParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || TileCoordParseError(s.to_string());
        let mut parts = s.trim().split('/');
        let z = parts.next().and_then(|p| p.parse().ok()).ok_or_else(invalid)?;
        let x = parts.next().and_then(|p| p.parse().ok()).ok_or_else(invalid)?;
        let y = parts.next().and_then(|p| p.parse().ok()).ok_or_else(invalid)?;
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(Self { z, x, y })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rejects_malformed_input() {
        assert!("1/2".parse::<TileCoord>().is_err());
        assert!("1/2/3/4".parse::<TileCoord>().is_err());
        assert!("a/2/3".parse::<TileCoord>().is_err());
        assert!("300/0/0".parse::<TileCoord>().is_err());
    }

    #[test]
    fn test_parse_trims_whitespace() {
        let tile: TileCoord = " 0/0/0 ".parse().unwrap();
        assert_eq!(tile, TileCoord::new(0, 0, 0));
    }
}
