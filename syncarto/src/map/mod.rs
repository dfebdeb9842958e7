//! Boundary to the map framework.
//!
//! The adapter never owns a camera or schedules tiles itself. It talks to the
//! map through [`MapHost`] and hands each layer a [`TileSource`] the map calls
//! back with the tiles it wants drawn.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use image::RgbaImage;

use crate::adapter::AdapterError;
use crate::tile::{Extent, TileCoord, TileGrid};
use crate::BoxFuture;

/// Draws tiles of one layer.
pub trait TileSource: Send + Sync {
    /// Render `tile` into `target`.
    ///
    /// Returns `Ok(false)` without touching `target` when there is nothing to
    /// draw (the layer's scene is gone).
    fn load_tile<'a>(
        &'a self,
        target: &'a mut RgbaImage,
        tile: TileCoord,
    ) -> BoxFuture<'a, Result<bool, AdapterError>>;
}

/// A tile layer registered with the map.
#[derive(Clone)]
pub struct TileLayer {
    pub scene_id: String,
    /// Projection code of the layer's tile grid.
    pub projection: String,
    pub grid: TileGrid,
    pub attribution: Option<String>,
    pub source: Arc<dyn TileSource>,
}

impl fmt::Debug for TileLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TileLayer")
            .field("scene_id", &self.scene_id)
            .field("projection", &self.projection)
            .field("zooms", &self.grid.zoom_count())
            .field("attribution", &self.attribution)
            .finish()
    }
}

/// Viewport animation settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitOptions {
    pub duration: Duration,
    /// Top, right, bottom, left padding in pixels.
    pub padding: [f64; 4],
}

impl FitOptions {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            padding: [0.0; 4],
        }
    }
}

impl Default for FitOptions {
    fn default() -> Self {
        Self::new(Duration::from_millis(crate::config::DEFAULT_FIT_DURATION_MS))
    }
}

/// The map widget as seen by the adapter.
pub trait MapHost: Send + Sync {
    fn add_layer(&self, layer: TileLayer);

    /// Remove the layer of `scene_id`; returns whether one existed.
    fn remove_layer(&self, scene_id: &str) -> bool;

    /// Current view centre in view projection coordinates.
    fn view_center(&self) -> (f64, f64);

    /// Projection code of the view.
    fn view_projection(&self) -> String;

    /// Animate the view to show `extent` (view projection).
    fn fit(&self, extent: Extent, options: FitOptions);
}
