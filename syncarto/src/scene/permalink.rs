//! Shareable view state encoded in a URL hash.
//!
//! ```text
//! #long=13.405&lat=52.520&zoom=9&scene=LC08&bands=B4,B3,B2&pipeline=gamma(all,1.5)
//! ```

use std::fmt;
use std::str::FromStr;

use super::{Scene, SceneError};
use crate::render::Pipeline;

/// Camera position plus the scene shown.
#[derive(Debug, Clone, PartialEq)]
pub struct Permalink {
    pub longitude: f64,
    pub latitude: f64,
    pub zoom: f64,
    pub scene: Option<String>,
    /// Comma-separated band references; empty for RGB scenes.
    pub bands: String,
    pub pipeline: Pipeline,
}

impl Permalink {
    /// Link for the current view showing `scene`.
    pub fn for_view(longitude: f64, latitude: f64, zoom: f64, scene: Option<&Scene>) -> Self {
        Self {
            longitude,
            latitude,
            zoom,
            scene: scene.map(|s| s.id().to_string()),
            bands: scene.map(Scene::band_list).unwrap_or_default(),
            pipeline: scene.map(|s| s.pipeline().clone()).unwrap_or_default(),
        }
    }

    /// Zoom rounded half up.
    pub fn rounded_zoom(&self) -> i64 {
        (self.zoom + 0.5).floor() as i64
    }
}

impl fmt::Display for Permalink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#long={:.3}&lat={:.3}&zoom={}&scene={}&bands={}&pipeline={}",
            self.longitude,
            self.latitude,
            self.rounded_zoom(),
            self.scene.as_deref().unwrap_or(""),
            self.bands,
            self.pipeline
        )
    }
}

impl FromStr for Permalink {
    type Err = SceneError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |what: &str| SceneError::InvalidPermalink(format!("{} in '{}'", what, s));
        let number = |key: &str, value: &str| {
            value
                .parse::<f64>()
                .map_err(|_| invalid(&format!("bad {} '{}'", key, value)))
        };

        let mut link = Permalink {
            longitude: 0.0,
            latitude: 0.0,
            zoom: 0.0,
            scene: None,
            bands: String::new(),
            pipeline: Pipeline::default(),
        };

        for pair in s.trim_start_matches('#').split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').ok_or_else(|| invalid("missing '='"))?;
            match key {
                "long" => link.longitude = number(key, value)?,
                "lat" => link.latitude = number(key, value)?,
                "zoom" => link.zoom = number(key, value)?,
                "scene" if !value.is_empty() => link.scene = Some(value.to_string()),
                "bands" => link.bands = value.to_string(),
                "pipeline" => {
                    link.pipeline = value
                        .parse()
                        .map_err(|e| invalid(&format!("bad pipeline ({})", e)))?
                }
                _ => {}
            }
        }
        Ok(link)
    }
}
