//! The session object tying scenes, caches and the map together.
//!
//! A [`CogAdapter`] owns every cache and registry of one map session:
//!
//! ```text
//!                    ┌────────────────────── CogAdapter ───────────────────────┐
//! add_scene ───────► │ SceneResolver ─► ResourceRegistry (url, ovr) ─► opener  │
//!                    │       │        └► CrsResolver ─► ProjectionRegistry    │
//!                    │       ▼                                                │
//!                    │ scenes: id ─► RegisteredScene ─► MapHost::add_layer    │
//!                    │                                                        │
//! load_tile ───────► │ TileRenderer (scene, z, x, y) ─► TileDecodeCache ─► pool│
//!                    └────────────────────────────────────────────────────────┘
//! ```
//!
//! Nothing is global: two adapters share no state. Caches grow for the
//! lifetime of the session; the rendered tiles of a scene are dropped when
//! the scene is replaced or removed.

mod error;
mod renderer;
mod resolver;
mod source;

pub use error::AdapterError;
pub use renderer::{RenderKey, SceneRegistry, TileRenderer};
pub use resolver::{pyramid_grid, RegisteredScene, ResourceKey, ResourceRegistry, SceneResolver};
pub use source::SceneTileSource;

use std::collections::HashSet;
use std::sync::Arc;

use image::RgbaImage;
use tracing::{debug, info, instrument};

use crate::cache::TileDecodeCache;
use crate::cog::{build_http_client, BlockCache, DecodePool, HttpCogOpener, ResourceOpener};
use crate::config::AdapterConfig;
use crate::map::{FitOptions, MapHost, TileLayer};
use crate::projection::{CrsRegistry, CrsResolver, EpsgIoRegistry, ProjectionRegistry};
use crate::scene::{parse_channel_message, ChannelCommand, Scene};
use crate::telemetry::{TelemetrySnapshot, TileMetrics};
use crate::tile::TileCoord;

/// Shared state of one session.
pub(crate) struct Session {
    config: AdapterConfig,
    host: Arc<dyn MapHost>,
    resolver: SceneResolver,
    scenes: Arc<SceneRegistry>,
    renderer: TileRenderer,
    metrics: Arc<TileMetrics>,
}

/// Handle on a map session. Cheap to clone.
#[derive(Clone)]
pub struct CogAdapter {
    session: Arc<Session>,
}

impl CogAdapter {
    /// Session reading COGs over HTTP and CRS definitions from the configured
    /// registry URL.
    pub fn new(config: AdapterConfig, host: Arc<dyn MapHost>) -> Result<Self, AdapterError> {
        let client = build_http_client(config.http_timeout)?;
        let blocks = BlockCache::new(config.block_cache_bytes, config.block_size);
        let opener = Arc::new(HttpCogOpener::new(client.clone(), blocks));
        let registry = Arc::new(EpsgIoRegistry::new(client, config.crs_registry_url.clone()));
        Ok(Self::with_components(config, host, opener, registry))
    }

    /// Session with explicit resource opener and CRS registry.
    pub fn with_components(
        config: AdapterConfig,
        host: Arc<dyn MapHost>,
        opener: Arc<dyn ResourceOpener>,
        crs_registry: Arc<dyn CrsRegistry>,
    ) -> Self {
        let metrics = Arc::new(TileMetrics::new());
        let pool = Arc::new(DecodePool::new(config.decode_workers));
        let decodes = Arc::new(TileDecodeCache::new(
            pool,
            config.fill_value,
            Arc::clone(&metrics),
        ));
        let crs = CrsResolver::new(
            crs_registry,
            Arc::new(ProjectionRegistry::new()),
            Arc::clone(&metrics),
        );
        let scenes = Arc::new(SceneRegistry::new());
        let renderer = TileRenderer::new(
            Arc::clone(&scenes),
            decodes,
            config.scale_range,
            Arc::clone(&metrics),
        );

        Self {
            session: Arc::new(Session {
                config,
                host,
                resolver: SceneResolver::new(ResourceRegistry::new(opener), crs),
                scenes,
                renderer,
                metrics,
            }),
        }
    }

    /// Open the scene's resources, derive its grid and projection, and show
    /// it as a map layer.
    ///
    /// Nothing is registered unless every step succeeds; resources opened by
    /// a failed add are released again. A scene with the same id is replaced. The view is fitted to the scene only when its
    /// centre lies outside the scene.
    #[instrument(skip(self, scene), fields(scene = scene.id()))]
    pub async fn add_scene(&self, scene: Scene) -> Result<(), AdapterError> {
        let session = &self.session;
        let view_projection = session.host.view_projection();
        let attempted: Vec<ResourceKey> = scene
            .urls()
            .into_iter()
            .map(|url| ResourceKey::new(url, scene.has_overviews()))
            .collect();
        let registered = match session.resolver.resolve(scene, &view_projection).await {
            Ok(registered) => Arc::new(registered),
            Err(e) => {
                self.release_attempted(&attempted);
                return Err(e);
            }
        };

        let id = registered.scene.id().to_string();
        let replaced = session.scenes.insert(id.clone(), Arc::clone(&registered));
        if replaced.is_some() {
            session.host.remove_layer(&id);
        }
        session.renderer.forget_scene(&id);
        if replaced.is_some() {
            self.release_unused_resources();
        }

        session.host.add_layer(TileLayer {
            scene_id: id.clone(),
            projection: registered.projection.clone(),
            grid: registered.grid.clone(),
            attribution: registered.scene.attribution().map(str::to_string),
            source: Arc::new(SceneTileSource::new(session, &id)),
        });
        session.metrics.scene_added();
        info!(
            scene = %id,
            projection = %registered.projection,
            zooms = registered.grid.zoom_count(),
            replaced = replaced.is_some(),
            "Scene added"
        );

        let (cx, cy) = session.host.view_center();
        if !registered.view_extent.contains(cx, cy) {
            session.host.fit(
                registered.view_extent,
                FitOptions::new(session.config.view.fit_duration),
            );
        }
        Ok(())
    }

    /// Add the RGB scene for a single COG URL.
    pub async fn add_scene_from_url(&self, url: &str) -> Result<(), AdapterError> {
        self.add_scene(Scene::from_cog_url(url)).await
    }

    /// Act on a session channel message. Returns the id of the scene added,
    /// if any.
    pub async fn handle_channel_message(&self, text: &str) -> Result<Option<String>, AdapterError> {
        match parse_channel_message(text)? {
            ChannelCommand::Update { url } => {
                self.add_scene_from_url(&url).await?;
                Ok(Some(url))
            }
            ChannelCommand::Other(command) => {
                debug!(command = %command, "Ignoring channel command");
                Ok(None)
            }
        }
    }

    /// Remove a scene and its layer. Returns whether it existed.
    pub fn remove_scene(&self, id: &str) -> bool {
        let session = &self.session;
        if session.scenes.remove(id).is_none() {
            return false;
        }
        session.host.remove_layer(id);
        let forgotten = session.renderer.forget_scene(id);
        let released = self.release_unused_resources();
        session.metrics.scene_removed();
        info!(scene = %id, tiles = forgotten, resources = released, "Scene removed");
        true
    }

    /// Rendered tile of a scene; `None` when the scene is not registered.
    pub async fn render_tile(
        &self,
        scene_id: &str,
        tile: TileCoord,
    ) -> Result<Option<Arc<RgbaImage>>, AdapterError> {
        self.session.renderer.render(scene_id, tile).await
    }

    pub fn scene(&self, id: &str) -> Option<Scene> {
        self.session.scenes.get(id).map(|entry| entry.scene.clone())
    }

    pub fn registered_scene(&self, id: &str) -> Option<Arc<RegisteredScene>> {
        self.session
            .scenes
            .get(id)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Ids of every registered scene, sorted.
    pub fn scene_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .session
            .scenes
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn config(&self) -> &AdapterConfig {
        &self.session.config
    }

    pub fn projections(&self) -> &Arc<ProjectionRegistry> {
        self.session.resolver.crs().projections()
    }

    pub fn resources(&self) -> &ResourceRegistry {
        self.session.resolver.resources()
    }

    pub fn decode_cache(&self) -> &Arc<TileDecodeCache> {
        self.session.renderer.decodes()
    }

    pub fn renderer(&self) -> &TileRenderer {
        &self.session.renderer
    }

    pub fn metrics(&self) -> TelemetrySnapshot {
        self.session.metrics.snapshot()
    }

    /// Drop resources no registered scene uses, with their decoded tiles.
    fn resources_in_use(&self) -> HashSet<ResourceKey> {
        let mut keep = HashSet::new();
        for entry in self.session.scenes.iter() {
            keep.extend(entry.resource_keys());
        }
        keep
    }

    /// Drop the resources a failed add opened that no registered scene uses.
    fn release_attempted(&self, attempted: &[ResourceKey]) -> usize {
        let in_use = self.resources_in_use();
        let resources = self.session.resolver.resources();
        let released = attempted
            .iter()
            .filter(|key| !in_use.contains(*key))
            .filter(|key| resources.forget(key))
            .count();
        if released > 0 {
            debug!(released, "Released resources of failed scene");
        }
        released
    }

    fn release_unused_resources(&self) -> usize {
        let session = &self.session;
        let keep = self.resources_in_use();
        let released = session.resolver.resources().retain(&keep);

        let urls: HashSet<&str> = keep.iter().map(|key| key.url.as_str()).collect();
        let dropped = session
            .renderer
            .decodes()
            .retain_resources(|url| urls.contains(url));
        if released > 0 || dropped > 0 {
            debug!(released, dropped, "Released unused resources");
        }
        released
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cog::tests::StaticResource;
    use crate::cog::{geokeys, CogError, CogResource, GeoKeys, ImageInfo};
    use crate::map::tests::RecordingHost;
    use crate::projection::{CrsError, MapRegistry, EPSG_4326};
    use crate::BoxFuture;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Opener handing out constant resources, counting opens.
    struct StaticOpener {
        opens: AtomicUsize,
        fail: bool,
        /// URL opened without any GeoKeys
        without_crs: Option<&'static str>,
    }

    impl StaticOpener {
        fn new() -> Self {
            Self {
                opens: AtomicUsize::new(0),
                fail: false,
                without_crs: None,
            }
        }
    }

    fn geographic_levels() -> Vec<ImageInfo> {
        let mut directory = vec![1, 1, 0, 1];
        directory.extend_from_slice(&[geokeys::GEOGRAPHIC_TYPE_GEO_KEY, 0, 1, 4326]);
        let keys = GeoKeys::parse(&directory, &[], "").unwrap();
        vec![
            ImageInfo::new(512, 512, 256, 256)
                .with_samples(3, 8, 1)
                .with_georeference((0.01, 0.01), (10.0, 50.0))
                .with_geo_keys(keys),
            ImageInfo::new(256, 256, 256, 256).with_samples(3, 8, 1),
        ]
    }

    impl ResourceOpener for StaticOpener {
        fn open(
            &self,
            url: String,
            _with_overviews: bool,
        ) -> BoxFuture<'_, Result<Arc<dyn CogResource>, CogError>> {
            Box::pin(async move {
                self.opens.fetch_add(1, Ordering::SeqCst);
                if self.fail {
                    return Err(CogError::Http {
                        url,
                        message: "404".to_string(),
                    });
                }
                let mut images = geographic_levels();
                if self.without_crs == Some(url.as_str()) {
                    images[0].geo_keys = GeoKeys::default();
                }
                Ok(Arc::new(StaticResource {
                    key: url,
                    images,
                    value: 0.5,
                }) as Arc<dyn CogResource>)
            })
        }
    }

    fn adapter(opener: StaticOpener, center: (f64, f64)) -> (CogAdapter, Arc<RecordingHost>) {
        let host = Arc::new(RecordingHost::new(EPSG_4326, center));
        let adapter = CogAdapter::with_components(
            AdapterConfig::default().with_decode_workers(2),
            host.clone(),
            Arc::new(opener),
            Arc::new(MapRegistry::default()),
        );
        (adapter, host)
    }

    #[tokio::test]
    async fn test_add_scene_registers_layer_and_fits() {
        let (adapter, host) = adapter(StaticOpener::new(), (0.0, 0.0));
        adapter.add_scene_from_url("mem://a.tif").await.unwrap();

        let layer = host.layer("mem://a.tif").expect("layer registered");
        assert_eq!(layer.projection, "EPSG:4326");
        assert_eq!(layer.grid.zoom_count(), 2);
        assert_eq!(layer.grid.resolutions(), &[0.02, 0.01]);

        let fits = host.fits.lock();
        assert_eq!(fits.len(), 1);
        let (extent, options) = fits[0];
        assert!((extent.min_x - 10.0).abs() < 1e-9);
        assert!((extent.max_y - 50.0).abs() < 1e-9);
        assert!((extent.min_y - 44.88).abs() < 1e-9);
        assert_eq!(options.padding, [0.0; 4]);
    }

    #[tokio::test]
    async fn test_no_fit_when_center_inside() {
        let (adapter, host) = adapter(StaticOpener::new(), (12.0, 48.0));
        adapter.add_scene_from_url("mem://a.tif").await.unwrap();
        assert!(host.fits.lock().is_empty());
    }

    #[tokio::test]
    async fn test_failed_open_registers_nothing() {
        let opener = StaticOpener {
            fail: true,
            ..StaticOpener::new()
        };
        let (adapter, host) = adapter(opener, (0.0, 0.0));

        let err = adapter.add_scene_from_url("mem://a.tif").await.unwrap_err();
        assert!(matches!(err, AdapterError::Cog(CogError::Http { .. })));
        assert!(host.layers.lock().is_empty());
        assert!(adapter.scene_ids().is_empty());
        assert!(adapter.resources().is_empty());
    }

    #[tokio::test]
    async fn test_failed_crs_releases_opened_resources() {
        let opener = StaticOpener {
            without_crs: Some("mem://b.tif"),
            ..StaticOpener::new()
        };
        let (adapter, host) = adapter(opener, (12.0, 48.0));
        adapter.add_scene_from_url("mem://a.tif").await.unwrap();

        let err = adapter.add_scene_from_url("mem://b.tif").await.unwrap_err();
        assert_eq!(err, AdapterError::Crs(CrsError::MissingCrsCode));
        assert_eq!(host.layers.lock().len(), 1);
        assert_eq!(adapter.resources().len(), 1);
        assert!(adapter
            .resources()
            .contains(&ResourceKey::new("mem://a.tif", false)));
    }

    #[tokio::test]
    async fn test_layer_source_draws_tile() {
        let (adapter, host) = adapter(StaticOpener::new(), (12.0, 48.0));
        adapter.add_scene_from_url("mem://a.tif").await.unwrap();
        let layer = host.layer("mem://a.tif").unwrap();

        let mut target = RgbaImage::new(1, 1);
        let drawn = layer
            .source
            .load_tile(&mut target, TileCoord::new(0, 0, 0))
            .await
            .unwrap();
        assert!(drawn);
        assert_eq!(target.dimensions(), (256, 256));
        assert_eq!(target.get_pixel(0, 0).0, [128, 128, 128, 255]);
    }

    #[tokio::test]
    async fn test_remove_scene() {
        let (adapter, host) = adapter(StaticOpener::new(), (12.0, 48.0));
        adapter.add_scene_from_url("mem://a.tif").await.unwrap();
        let layer = host.layer("mem://a.tif").unwrap();
        adapter
            .render_tile("mem://a.tif", TileCoord::new(1, 0, 0))
            .await
            .unwrap();

        assert!(adapter.remove_scene("mem://a.tif"));
        assert!(!adapter.remove_scene("mem://a.tif"));
        assert!(host.layers.lock().is_empty());
        assert!(adapter.resources().is_empty());
        assert!(adapter.decode_cache().is_empty());

        let mut target = RgbaImage::new(3, 3);
        assert!(!layer
            .source
            .load_tile(&mut target, TileCoord::new(1, 0, 0))
            .await
            .unwrap());
        assert_eq!(target.dimensions(), (3, 3));
    }

    #[tokio::test]
    async fn test_channel_messages() {
        let (adapter, _host) = adapter(StaticOpener::new(), (12.0, 48.0));
        let added = adapter
            .handle_channel_message(r#"{"command": "update", "data": "mem://b.tif"}"#)
            .await
            .unwrap();
        assert_eq!(added.as_deref(), Some("mem://b.tif"));
        assert_eq!(adapter.scene_ids(), vec!["mem://b.tif".to_string()]);

        let ignored = adapter
            .handle_channel_message(r#"{"command": "ping"}"#)
            .await
            .unwrap();
        assert_eq!(ignored, None);
    }
}
