//! Map host without a display.
//!
//! Keeps the layers the adapter registers and follows `fit` requests by
//! moving its centre, so commands can drive a session and read tiles back.

use parking_lot::Mutex;
use syncarto::config::ViewConfig;
use syncarto::map::{FitOptions, MapHost, TileLayer};
use syncarto::tile::Extent;
use tracing::debug;

pub struct HeadlessMap {
    projection: String,
    center: Mutex<(f64, f64)>,
    layers: Mutex<Vec<TileLayer>>,
}

impl HeadlessMap {
    pub fn new(view: &ViewConfig) -> Self {
        Self {
            projection: view.projection.clone(),
            center: Mutex::new(view.center),
            layers: Mutex::new(Vec::new()),
        }
    }

    /// The layer showing `scene_id`.
    pub fn layer(&self, scene_id: &str) -> Option<TileLayer> {
        self.layers
            .lock()
            .iter()
            .find(|layer| layer.scene_id == scene_id)
            .cloned()
    }

    pub fn layer_count(&self) -> usize {
        self.layers.lock().len()
    }
}

impl MapHost for HeadlessMap {
    fn add_layer(&self, layer: TileLayer) {
        debug!(scene = %layer.scene_id, projection = %layer.projection, "Layer added");
        self.layers.lock().push(layer);
    }

    fn remove_layer(&self, scene_id: &str) -> bool {
        let mut layers = self.layers.lock();
        let before = layers.len();
        layers.retain(|layer| layer.scene_id != scene_id);
        layers.len() != before
    }

    fn view_center(&self) -> (f64, f64) {
        *self.center.lock()
    }

    fn view_projection(&self) -> String {
        self.projection.clone()
    }

    fn fit(&self, extent: Extent, _options: FitOptions) {
        debug!(extent = %extent, "Fitting view");
        *self.center.lock() = extent.center();
    }
}
