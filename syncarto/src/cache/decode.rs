//! Tile decode cache.
//!
//! Memoizes decoded pixel windows for the session. A key is the resource,
//! the band selection and the tile coordinate; concurrent requests for a key
//! share one decode, and completed windows are kept for the whole session.
//!
//! On a miss the pyramid level is `level_count - z - 1` and the window is the
//! tile's flipped pixel window at that level (see [`crate::tile`]). The
//! window's bytes are prefetched first; LZW levels then take a slot from the
//! session's [`DecodePool`] for the decode alone.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, instrument};

use super::single_flight::{Flight, SingleFlight};
use crate::cog::{CogError, CogResource, DecodePool, RasterWindow};
use crate::telemetry::TileMetrics;
use crate::tile::{level_index, PixelWindow, TileCoord};

/// Fill value written for pixels outside the image.
pub const DEFAULT_FILL_VALUE: f64 = -999.0;

/// Which bands a decode produces.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DecodeSelection {
    /// Direct RGB decode
    Rgb,
    /// Every sample of the image
    All,
    /// The listed samples, sorted and de-duplicated
    Samples(Vec<usize>),
}

impl DecodeSelection {
    /// Selection of the given samples in canonical order.
    pub fn samples(samples: impl IntoIterator<Item = usize>) -> Self {
        let mut samples: Vec<usize> = samples.into_iter().collect();
        samples.sort_unstable();
        samples.dedup();
        DecodeSelection::Samples(samples)
    }
}

impl fmt::Display for DecodeSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeSelection::Rgb => write!(f, "rgb"),
            DecodeSelection::All => write!(f, "all"),
            DecodeSelection::Samples(samples) => {
                let list: Vec<String> = samples.iter().map(|s| s.to_string()).collect();
                write!(f, "{}", list.join(","))
            }
        }
    }
}

/// Decode cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DecodeKey {
    pub resource: Arc<str>,
    /// Whether the pyramid continues in the `.ovr` sidecar
    pub overviews: bool,
    pub selection: DecodeSelection,
    pub tile: TileCoord,
}

impl DecodeKey {
    pub fn new(resource: &str, selection: DecodeSelection, tile: TileCoord) -> Self {
        Self {
            resource: Arc::from(resource),
            overviews: false,
            selection,
            tile,
        }
    }

    /// Key for a resource whose pyramid includes the `.ovr` sidecar.
    pub fn with_overviews(mut self, overviews: bool) -> Self {
        self.overviews = overviews;
        self
    }
}

impl fmt::Display for DecodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ovr = if self.overviews { "+ovr" } else { "" };
        write!(
            f,
            "{}{}-{}-{}-{}-{}",
            self.resource, ovr, self.selection, self.tile.z, self.tile.x, self.tile.y
        )
    }
}

/// Session-lifetime cache of decoded tile windows.
pub struct TileDecodeCache {
    flights: SingleFlight<DecodeKey, Arc<RasterWindow>, CogError>,
    pool: Arc<DecodePool>,
    fill_value: f64,
    metrics: Arc<TileMetrics>,
}

impl TileDecodeCache {
    pub fn new(pool: Arc<DecodePool>, fill_value: f64, metrics: Arc<TileMetrics>) -> Self {
        Self {
            flights: SingleFlight::new("decode"),
            pool,
            fill_value,
            metrics,
        }
    }

    /// Decoded window of `tile` from `resource`.
    ///
    /// Returns the cached window when one exists or is being decoded; the
    /// same `Arc` is handed to every caller of a key.
    #[instrument(level = "trace", skip(self, resource), fields(resource = resource.key()))]
    pub async fn get_raw_tile(
        &self,
        resource: &Arc<dyn CogResource>,
        tile: TileCoord,
        selection: DecodeSelection,
    ) -> Result<Arc<RasterWindow>, CogError> {
        self.metrics.decode_requested();

        let key = DecodeKey::new(resource.key(), selection.clone(), tile)
            .with_overviews(resource.has_overviews());
        let job = DecodeJob {
            resource: Arc::clone(resource),
            tile,
            selection,
            fill_value: self.fill_value,
            pool: Arc::clone(&self.pool),
            metrics: Arc::clone(&self.metrics),
        };

        let ticket = self.flights.join_or_start(key, move || job.run());
        match ticket.flight() {
            Flight::Started => self.metrics.decode_started(),
            Flight::Joined => self.metrics.decode_coalesced(),
        }
        ticket.wait().await
    }

    /// Whether a decode for the key is pending or cached.
    pub fn contains(&self, key: &DecodeKey) -> bool {
        self.flights.contains(key)
    }

    /// Number of pending or cached decodes.
    pub fn len(&self) -> usize {
        self.flights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flights.is_empty()
    }

    /// Drop every entry decoded from `resource`.
    pub fn forget_resource(&self, resource: &str) -> usize {
        self.flights.retain(|key| key.resource.as_ref() != resource)
    }

    /// Keep only entries whose resource satisfies `keep`.
    pub fn retain_resources(&self, mut keep: impl FnMut(&str) -> bool) -> usize {
        self.flights.retain(|key| keep(&key.resource))
    }

    pub fn fill_value(&self) -> f64 {
        self.fill_value
    }

    pub fn pool(&self) -> &Arc<DecodePool> {
        &self.pool
    }
}

/// Everything one decode needs, moved into the spawned task.
struct DecodeJob {
    resource: Arc<dyn CogResource>,
    tile: TileCoord,
    selection: DecodeSelection,
    fill_value: f64,
    pool: Arc<DecodePool>,
    metrics: Arc<TileMetrics>,
}

impl DecodeJob {
    async fn run(self) -> Result<Arc<RasterWindow>, CogError> {
        let metrics = Arc::clone(&self.metrics);
        let result = self.decode().await;
        if let Err(e) = &result {
            metrics.decode_failed();
            debug!(error = %e, "Tile decode failed");
        }
        result
    }

    async fn decode(self) -> Result<Arc<RasterWindow>, CogError> {
        let start = Instant::now();
        let levels = self.resource.level_count();
        let level = level_index(levels, self.tile.z).ok_or(CogError::InvalidZoom {
            z: self.tile.z,
            levels,
        })?;

        let info = self.resource.image(level)?;
        let window = PixelWindow::for_tile(
            self.tile.x,
            self.tile.y,
            info.tile_width,
            info.tile_height,
            info.height,
        );

        self.resource.prefetch(level, window).await?;

        let _permit = if info.uses_pool() {
            self.metrics.decode_pooled();
            Some(self.pool.acquire().await?)
        } else {
            None
        };

        let raster = match self.selection {
            DecodeSelection::Rgb => self.resource.read_rgb(level, window).await?,
            DecodeSelection::All => {
                self.resource
                    .read_rasters(level, window, None, self.fill_value)
                    .await?
            }
            DecodeSelection::Samples(ref samples) => {
                self.resource
                    .read_rasters(level, window, Some(samples.clone()), self.fill_value)
                    .await?
            }
        };

        let elapsed = start.elapsed();
        self.metrics.decode_finished(elapsed);
        debug!(
            resource = self.resource.key(),
            tile = %self.tile,
            level,
            selection = %self.selection,
            width = raster.width,
            height = raster.height,
            elapsed_ms = elapsed.as_millis() as u64,
            "Decoded tile window"
        );

        Ok(Arc::new(raster))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cog::{ImageInfo, SampleKind, Samples, COMPRESSION_LZW};
    use crate::BoxFuture;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Resource recording every decode request it receives.
    struct RecordingResource {
        images: Vec<ImageInfo>,
        calls: AtomicUsize,
        requests: Mutex<Vec<(usize, PixelWindow, Option<Vec<usize>>)>>,
        fail: bool,
        overviews: bool,
        /// Pool whose busy slots are recorded at each prefetch
        pool: Option<Arc<DecodePool>>,
        prefetch_busy: Mutex<Vec<usize>>,
    }

    impl RecordingResource {
        fn new(images: Vec<ImageInfo>) -> Self {
            Self {
                images,
                calls: AtomicUsize::new(0),
                requests: Mutex::new(Vec::new()),
                fail: false,
                overviews: false,
                pool: None,
                prefetch_busy: Mutex::new(Vec::new()),
            }
        }
    }

    impl CogResource for RecordingResource {
        fn key(&self) -> &str {
            "mem://recording.tif"
        }

        fn images(&self) -> &[ImageInfo] {
            &self.images
        }

        fn has_overviews(&self) -> bool {
            self.overviews
        }

        fn prefetch(&self, _level: usize, _window: PixelWindow) -> BoxFuture<'_, Result<(), CogError>> {
            Box::pin(async move {
                let busy = self.pool.as_ref().map_or(0, |pool| pool.in_flight());
                self.prefetch_busy.lock().push(busy);
                Ok(())
            })
        }

        fn read_rgb(
            &self,
            level: usize,
            window: PixelWindow,
        ) -> BoxFuture<'_, Result<RasterWindow, CogError>> {
            self.read_rasters(level, window, Some(vec![0, 1, 2]), 0.0)
        }

        fn read_rasters(
            &self,
            level: usize,
            window: PixelWindow,
            samples: Option<Vec<usize>>,
            fill_value: f64,
        ) -> BoxFuture<'_, Result<RasterWindow, CogError>> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                self.requests.lock().push((level, window, samples.clone()));
                tokio::time::sleep(Duration::from_millis(5)).await;
                if self.fail {
                    return Err(CogError::Tiff("corrupt tile".to_string()));
                }
                let samples = samples.unwrap_or_else(|| vec![0]);
                Ok(RasterWindow {
                    width: window.width(),
                    height: window.height(),
                    bands: samples
                        .iter()
                        .map(|_| Samples::filled(SampleKind::U8, window.pixel_count(), 1.0))
                        .collect(),
                    sample_indices: samples,
                    fill_value,
                })
            })
        }
    }

    fn pyramid() -> Vec<ImageInfo> {
        vec![
            ImageInfo::new(1024, 1024, 256, 256),
            ImageInfo::new(512, 512, 256, 256),
            ImageInfo::new(256, 256, 128, 128),
        ]
    }

    fn cache() -> TileDecodeCache {
        TileDecodeCache::new(
            Arc::new(DecodePool::new(2)),
            DEFAULT_FILL_VALUE,
            Arc::new(TileMetrics::new()),
        )
    }

    #[test]
    fn test_key_display() {
        let key = DecodeKey::new(
            "http://x/a.tif",
            DecodeSelection::samples([2, 0, 2]),
            TileCoord::new(1, 2, 3),
        );
        assert_eq!(key.to_string(), "http://x/a.tif-0,2-1-2-3");
        assert_eq!(
            DecodeKey::new("u", DecodeSelection::All, TileCoord::new(0, 0, 0)).to_string(),
            "u-all-0-0-0"
        );
        assert_eq!(
            DecodeKey::new("u", DecodeSelection::Rgb, TileCoord::new(0, 0, 0))
                .with_overviews(true)
                .to_string(),
            "u+ovr-rgb-0-0-0"
        );
    }

    #[tokio::test]
    async fn test_same_key_decodes_once_and_shares_buffer() {
        let cache = cache();
        let recording = Arc::new(RecordingResource::new(pyramid()));
        let resource: Arc<dyn CogResource> = recording.clone();
        let tile = TileCoord::new(0, 0, 0);

        let (a, b) = tokio::join!(
            cache.get_raw_tile(&resource, tile, DecodeSelection::All),
            cache.get_raw_tile(&resource, tile, DecodeSelection::All),
        );
        let c = cache
            .get_raw_tile(&resource, tile, DecodeSelection::All)
            .await
            .unwrap();

        let (a, b) = (a.unwrap(), b.unwrap());
        assert!(Arc::ptr_eq(&a, &b));
        assert!(Arc::ptr_eq(&a, &c));
        assert_eq!(recording.calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.metrics.snapshot().decodes_coalesced, 2);
    }

    #[tokio::test]
    async fn test_level_and_window_selection() {
        let cache = cache();
        let recording = Arc::new(RecordingResource::new(pyramid()));
        let resource: Arc<dyn CogResource> = recording.clone();

        // z = 0 reads the coarsest level (2), z = 2 the finest (0)
        cache
            .get_raw_tile(&resource, TileCoord::new(0, 0, 0), DecodeSelection::All)
            .await
            .unwrap();
        cache
            .get_raw_tile(&resource, TileCoord::new(2, 1, 0), DecodeSelection::All)
            .await
            .unwrap();

        let requests = recording.requests.lock().clone();
        assert_eq!(requests[0].0, 2);
        assert_eq!(requests[0].1, PixelWindow::new(0, 128, 128, 256));
        assert_eq!(requests[1].0, 0);
        assert_eq!(requests[1].1, PixelWindow::new(256, 768, 512, 1024));
    }

    #[tokio::test]
    async fn test_selections_are_separate_entries() {
        let cache = cache();
        let recording = Arc::new(RecordingResource::new(pyramid()));
        let resource: Arc<dyn CogResource> = recording.clone();
        let tile = TileCoord::new(1, 0, 0);

        cache
            .get_raw_tile(&resource, tile, DecodeSelection::samples([2, 0, 1]))
            .await
            .unwrap();
        cache
            .get_raw_tile(&resource, tile, DecodeSelection::samples([0, 1, 2]))
            .await
            .unwrap();
        cache
            .get_raw_tile(&resource, tile, DecodeSelection::Rgb)
            .await
            .unwrap();

        assert_eq!(recording.calls.load(Ordering::SeqCst), 2);
        assert_eq!(recording.requests.lock()[0].2, Some(vec![0, 1, 2]));
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test]
    async fn test_zoom_outside_pyramid() {
        let cache = cache();
        let resource: Arc<dyn CogResource> = Arc::new(RecordingResource::new(pyramid()));

        let result = cache
            .get_raw_tile(&resource, TileCoord::new(3, 0, 0), DecodeSelection::All)
            .await;
        assert_eq!(result, Err(CogError::InvalidZoom { z: 3, levels: 3 }));
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_failed_decode_is_not_cached() {
        let cache = cache();
        let mut failing = RecordingResource::new(pyramid());
        failing.fail = true;
        let failing = Arc::new(failing);
        let resource: Arc<dyn CogResource> = failing.clone();
        let tile = TileCoord::new(0, 0, 0);

        assert!(cache
            .get_raw_tile(&resource, tile, DecodeSelection::All)
            .await
            .is_err());
        assert!(cache
            .get_raw_tile(&resource, tile, DecodeSelection::All)
            .await
            .is_err());

        assert_eq!(failing.calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.metrics.snapshot().decodes_failed, 2);
    }

    #[tokio::test]
    async fn test_lzw_levels_use_pool() {
        let cache = cache();
        let images = vec![ImageInfo::new(256, 256, 256, 256).with_compression(COMPRESSION_LZW)];
        let resource: Arc<dyn CogResource> = Arc::new(RecordingResource::new(images));

        cache
            .get_raw_tile(&resource, TileCoord::new(0, 0, 0), DecodeSelection::Rgb)
            .await
            .unwrap();

        assert_eq!(cache.pool().completed(), 1);
        assert_eq!(cache.metrics.snapshot().decodes_pooled, 1);
    }

    #[tokio::test]
    async fn test_forget_resource() {
        let cache = cache();
        let resource: Arc<dyn CogResource> = Arc::new(RecordingResource::new(pyramid()));
        cache
            .get_raw_tile(&resource, TileCoord::new(0, 0, 0), DecodeSelection::All)
            .await
            .unwrap();

        assert_eq!(cache.forget_resource("mem://other.tif"), 0);
        assert_eq!(cache.forget_resource("mem://recording.tif"), 1);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_prefetch_runs_before_taking_a_pool_slot() {
        let pool = Arc::new(DecodePool::new(1));
        let cache = TileDecodeCache::new(
            Arc::clone(&pool),
            DEFAULT_FILL_VALUE,
            Arc::new(TileMetrics::new()),
        );
        let images = vec![ImageInfo::new(512, 512, 256, 256).with_compression(COMPRESSION_LZW)];
        let mut recording = RecordingResource::new(images);
        recording.pool = Some(Arc::clone(&pool));
        let recording = Arc::new(recording);
        let resource: Arc<dyn CogResource> = recording.clone();

        // Hold the only slot: prefetches still proceed while decodes wait
        let held = pool.acquire().await.unwrap();
        let pending = tokio::spawn({
            let cache = Arc::new(cache);
            let resource = Arc::clone(&resource);
            async move {
                let (a, b) = tokio::join!(
                    cache.get_raw_tile(&resource, TileCoord::new(0, 0, 0), DecodeSelection::All),
                    cache.get_raw_tile(&resource, TileCoord::new(0, 1, 0), DecodeSelection::All),
                );
                a.and(b)
            }
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(*recording.prefetch_busy.lock(), vec![1, 1]);
        assert_eq!(recording.calls.load(Ordering::SeqCst), 0);

        drop(held);
        pending.await.unwrap().unwrap();
        assert_eq!(recording.calls.load(Ordering::SeqCst), 2);
        // The held slot plus one per decode
        assert_eq!(pool.completed(), 3);
    }

    #[tokio::test]
    async fn test_overview_pyramids_are_separate_entries() {
        let cache = cache();
        let plain: Arc<dyn CogResource> = Arc::new(RecordingResource::new(pyramid()));
        let mut with_sidecar = RecordingResource::new(pyramid());
        with_sidecar.overviews = true;
        let with_sidecar = Arc::new(with_sidecar);
        let sidecar: Arc<dyn CogResource> = with_sidecar.clone();
        let tile = TileCoord::new(0, 0, 0);

        cache
            .get_raw_tile(&plain, tile, DecodeSelection::All)
            .await
            .unwrap();
        cache
            .get_raw_tile(&sidecar, tile, DecodeSelection::All)
            .await
            .unwrap();

        assert_eq!(with_sidecar.calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 2);
        // Both pyramids belong to the same URL
        assert_eq!(cache.forget_resource("mem://recording.tif"), 2);
    }
}
