//! Rendered tile cache.
//!
//! Memoizes finished RGBA canvases by (scene id, z, x, y). A miss looks the
//! scene up, decodes the windows its kind needs through the
//! [`TileDecodeCache`] and runs the render engine.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use image::RgbaImage;
use tracing::debug;

use super::resolver::RegisteredScene;
use super::AdapterError;
use crate::cache::{DecodeSelection, Flight, SingleFlight, TileDecodeCache};
use crate::cog::{RasterWindow, Samples};
use crate::render::{render_data, scale_multiband, ChannelInput, RenderError, ScaleRange};
use crate::scene::SceneKind;
use crate::telemetry::TileMetrics;
use crate::tile::TileCoord;

/// Registered scenes by id.
pub type SceneRegistry = DashMap<String, Arc<RegisteredScene>>;

/// Rendered tile cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RenderKey {
    pub scene: Arc<str>,
    pub tile: TileCoord,
}

impl fmt::Display for RenderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.scene, self.tile)
    }
}

/// Session-lifetime cache of rendered tiles.
pub struct TileRenderer {
    scenes: Arc<SceneRegistry>,
    decodes: Arc<TileDecodeCache>,
    flights: SingleFlight<RenderKey, Option<Arc<RgbaImage>>, AdapterError>,
    default_range: ScaleRange,
    metrics: Arc<TileMetrics>,
}

impl TileRenderer {
    pub fn new(
        scenes: Arc<SceneRegistry>,
        decodes: Arc<TileDecodeCache>,
        default_range: ScaleRange,
        metrics: Arc<TileMetrics>,
    ) -> Self {
        Self {
            scenes,
            decodes,
            flights: SingleFlight::new("render"),
            default_range,
            metrics,
        }
    }

    /// Rendered canvas of `tile` for `scene_id`; `None` when no such scene is
    /// registered.
    pub async fn render(
        &self,
        scene_id: &str,
        tile: TileCoord,
    ) -> Result<Option<Arc<RgbaImage>>, AdapterError> {
        self.metrics.render_requested();

        let key = RenderKey {
            scene: Arc::from(scene_id),
            tile,
        };
        let job = RenderJob {
            scenes: Arc::clone(&self.scenes),
            decodes: Arc::clone(&self.decodes),
            default_range: self.default_range,
            metrics: Arc::clone(&self.metrics),
            key: key.clone(),
        };

        let ticket = self.flights.join_or_start(key, move || job.run());
        match ticket.flight() {
            Flight::Started => self.metrics.render_started(),
            Flight::Joined => self.metrics.render_coalesced(),
        }
        ticket.wait().await
    }

    /// Forget every rendered tile of `scene_id`.
    pub fn forget_scene(&self, scene_id: &str) -> usize {
        self.flights.retain(|key| key.scene.as_ref() != scene_id)
    }

    pub fn contains(&self, key: &RenderKey) -> bool {
        self.flights.contains(key)
    }

    /// Number of pending or cached renders.
    pub fn len(&self) -> usize {
        self.flights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flights.is_empty()
    }

    pub fn decodes(&self) -> &Arc<TileDecodeCache> {
        &self.decodes
    }
}

struct RenderJob {
    scenes: Arc<SceneRegistry>,
    decodes: Arc<TileDecodeCache>,
    default_range: ScaleRange,
    metrics: Arc<TileMetrics>,
    key: RenderKey,
}

impl RenderJob {
    async fn run(self) -> Result<Option<Arc<RgbaImage>>, AdapterError> {
        let scene = self
            .scenes
            .get(self.key.scene.as_ref())
            .map(|entry| Arc::clone(entry.value()));
        let Some(scene) = scene else {
            self.metrics.render_skipped();
            debug!(key = %self.key, "Scene not registered, skipping tile");
            return Ok(None);
        };

        let start = Instant::now();
        match self.render(&scene).await {
            Ok(image) => {
                self.metrics.render_finished(start.elapsed());
                Ok(Some(Arc::new(image)))
            }
            Err(e) => {
                self.metrics.render_failed();
                debug!(key = %self.key, error = %e, "Tile render failed");
                Err(e)
            }
        }
    }

    async fn render(&self, scene: &RegisteredScene) -> Result<RgbaImage, AdapterError> {
        let tile = self.key.tile;
        let pipeline = scene.scene.pipeline();
        let mut image = RgbaImage::new(0, 0);

        let decode_start = Instant::now();
        match scene.scene.kind() {
            SceneKind::RgbComposite { url } => {
                let resource = scene.resource(url)?;
                let raster = self
                    .decodes
                    .get_raw_tile(resource, tile, DecodeSelection::Rgb)
                    .await?;
                debug!(key = %self.key, elapsed = ?decode_start.elapsed(), "Parsed tile");

                let (width, height) = dimensions(&raster)?;
                let [red, green, blue] = first_bands(&raster)?;
                let render_start = Instant::now();
                render_data(
                    &mut image,
                    pipeline,
                    width,
                    height,
                    ChannelInput::Precomposed { red, green, blue },
                )?;
                debug!(key = %self.key, elapsed = ?render_start.elapsed(), "Rendered tile");
            }

            SceneKind::SingleMultiband {
                url,
                samples,
                range,
            } => {
                let resource = scene.resource(url)?;
                let selection = DecodeSelection::samples(samples.iter().copied());
                let raster = self.decodes.get_raw_tile(resource, tile, selection).await?;
                debug!(key = %self.key, elapsed = ?decode_start.elapsed(), "Parsed tile");

                let (width, height) = dimensions(&raster)?;
                let band = |sample: usize| {
                    raster
                        .band_for_sample(sample)
                        .ok_or(RenderError::MissingBand(sample))
                };
                let render_start = Instant::now();
                let scaled = scale_multiband(
                    band(samples[0])?,
                    band(samples[1])?,
                    band(samples[2])?,
                    range.unwrap_or(self.default_range),
                    raster.fill_value,
                )?;
                render_data(
                    &mut image,
                    pipeline,
                    width,
                    height,
                    ChannelInput::Scaled {
                        red: &scaled.red,
                        green: &scaled.green,
                        blue: &scaled.blue,
                    },
                )?;
                debug!(key = %self.key, elapsed = ?render_start.elapsed(), "Rendered tile");
            }

            SceneKind::MultiResourceComposite { red, green, blue } => {
                let (red, green, blue) = (
                    scene.resource(red)?,
                    scene.resource(green)?,
                    scene.resource(blue)?,
                );
                let (red, green, blue) = futures::try_join!(
                    self.decodes.get_raw_tile(red, tile, DecodeSelection::All),
                    self.decodes.get_raw_tile(green, tile, DecodeSelection::All),
                    self.decodes.get_raw_tile(blue, tile, DecodeSelection::All),
                )?;
                debug!(key = %self.key, elapsed = ?decode_start.elapsed(), "Parsed tile");

                let (width, height) = dimensions(&red)?;
                let render_start = Instant::now();
                render_data(
                    &mut image,
                    pipeline,
                    width,
                    height,
                    ChannelInput::Composed {
                        red: first_band(&red)?,
                        green: first_band(&green)?,
                        blue: first_band(&blue)?,
                    },
                )?;
                debug!(key = %self.key, elapsed = ?render_start.elapsed(), "Rendered tile");
            }
        }

        Ok(image)
    }
}

fn dimensions(raster: &RasterWindow) -> Result<(u32, u32), RenderError> {
    match (u32::try_from(raster.width), u32::try_from(raster.height)) {
        (Ok(width), Ok(height)) => Ok((width, height)),
        _ => Err(RenderError::InvalidDimensions {
            width: u32::MAX,
            height: u32::MAX,
        }),
    }
}

fn first_band(raster: &RasterWindow) -> Result<&Samples, RenderError> {
    raster.bands.first().ok_or(RenderError::MissingBand(0))
}

fn first_bands(raster: &RasterWindow) -> Result<[&Samples; 3], RenderError> {
    match raster.bands.as_slice() {
        [red, green, blue, ..] => Ok([red, green, blue]),
        bands => Err(RenderError::MissingBand(bands.len())),
    }
}
