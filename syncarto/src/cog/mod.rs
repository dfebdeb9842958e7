//! Cloud-Optimized GeoTIFF access.
//!
//! This module is the decode capability the tile caches build on:
//!
//! - [`CogResource`]: an opened COG exposing per-level metadata and window
//!   decodes
//! - [`ResourceOpener`]: opens resources by URL, optionally with an `.ovr`
//!   sidecar holding the overview levels
//! - [`HttpCogOpener`]: the default opener, reading over HTTP range requests
//!   through a shared [`BlockCache`] and decoding with the `tiff` crate
//!
//! Levels are always enumerated finest-first: the main file's directories,
//! then the sidecar's.

mod dataset;
mod error;
pub mod geokeys;
mod image;
mod pool;
mod range;
mod samples;

use std::sync::Arc;
use std::time::Duration;

pub use dataset::CogDataset;
pub use error::CogError;
pub use geokeys::{GeoKeyValue, GeoKeys};
pub use image::{ImageInfo, COMPRESSION_LZW};
pub use pool::{default_workers, DecodePermit, DecodePool};
pub use range::{
    BlockCache, BlockingCursor, CachedRangeReader, HttpRangeReader, MemoryRangeReader,
    RangeReader, DEFAULT_BLOCK_CACHE_BYTES, DEFAULT_BLOCK_SIZE,
};
pub use samples::{RasterWindow, SampleKind, Samples};

use crate::tile::PixelWindow;
use crate::BoxFuture;

/// Suffix of the sidecar file holding overview levels.
pub const OVERVIEW_SUFFIX: &str = ".ovr";

/// An opened COG.
///
/// Metadata is read once when the resource opens and never changes. Window
/// decodes may run concurrently.
pub trait CogResource: Send + Sync {
    /// Key identifying the resource in decode cache keys (its URL).
    fn key(&self) -> &str;

    /// Pyramid levels, finest first.
    fn images(&self) -> &[ImageInfo];

    /// Decode a window as three colour bands. Pixels outside the image are 0.
    fn read_rgb(
        &self,
        level: usize,
        window: PixelWindow,
    ) -> BoxFuture<'_, Result<RasterWindow, CogError>>;

    /// Decode the given samples (all when `None`) of a window, writing
    /// `fill_value` for pixels outside the image.
    fn read_rasters(
        &self,
        level: usize,
        window: PixelWindow,
        samples: Option<Vec<usize>>,
        fill_value: f64,
    ) -> BoxFuture<'_, Result<RasterWindow, CogError>>;

    /// Whether the pyramid continues in an overview sidecar.
    fn has_overviews(&self) -> bool {
        false
    }

    /// Fetch the bytes a window decode will read, so the decode itself runs
    /// from memory.
    fn prefetch(&self, _level: usize, _window: PixelWindow) -> BoxFuture<'_, Result<(), CogError>> {
        Box::pin(async { Ok(()) })
    }

    /// Number of pyramid levels.
    fn level_count(&self) -> usize {
        self.images().len()
    }

    /// Metadata of one level.
    fn image(&self, level: usize) -> Result<&ImageInfo, CogError> {
        let images = self.images();
        images.get(level).ok_or(CogError::InvalidLevel {
            level,
            levels: images.len(),
        })
    }
}

/// Opens COG resources by URL.
pub trait ResourceOpener: Send + Sync {
    /// Open `url`; with `with_overviews` the pyramid continues in `url.ovr`.
    fn open(
        &self,
        url: String,
        with_overviews: bool,
    ) -> BoxFuture<'_, Result<Arc<dyn CogResource>, CogError>>;
}

/// Build the HTTP client used for range requests.
pub fn build_http_client(timeout: Duration) -> Result<reqwest::Client, CogError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| CogError::Http {
            url: String::new(),
            message: format!("Failed to create HTTP client: {}", e),
        })
}

/// Opens COGs over HTTP range requests.
#[derive(Clone)]
pub struct HttpCogOpener {
    client: reqwest::Client,
    blocks: BlockCache,
}

impl HttpCogOpener {
    /// Create an opener sharing `blocks` across every resource it opens.
    pub fn new(client: reqwest::Client, blocks: BlockCache) -> Self {
        Self { client, blocks }
    }

    /// The block cache shared by the opened resources.
    pub fn block_cache(&self) -> &BlockCache {
        &self.blocks
    }

    async fn connect(&self, url: String) -> Result<Arc<dyn RangeReader>, CogError> {
        let reader = HttpRangeReader::connect(self.client.clone(), url).await?;
        Ok(self.blocks.wrap(Arc::new(reader)))
    }
}

impl ResourceOpener for HttpCogOpener {
    fn open(
        &self,
        url: String,
        with_overviews: bool,
    ) -> BoxFuture<'_, Result<Arc<dyn CogResource>, CogError>> {
        Box::pin(async move {
            let main = self.connect(url.clone()).await?;
            let overviews = if with_overviews {
                Some(self.connect(format!("{}{}", url, OVERVIEW_SUFFIX)).await?)
            } else {
                None
            };
            let dataset = CogDataset::open(url, main, overviews).await?;
            Ok(Arc::new(dataset) as Arc<dyn CogResource>)
        })
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;

    /// Resource with fixed metadata whose decodes return constant bands.
    pub struct StaticResource {
        pub key: String,
        pub images: Vec<ImageInfo>,
        pub value: f64,
    }

    impl CogResource for StaticResource {
        fn key(&self) -> &str {
            &self.key
        }

        fn images(&self) -> &[ImageInfo] {
            &self.images
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
            _level: usize,
            window: PixelWindow,
            samples: Option<Vec<usize>>,
            fill_value: f64,
        ) -> BoxFuture<'_, Result<RasterWindow, CogError>> {
            Box::pin(async move {
                let samples = samples.unwrap_or_else(|| vec![0]);
                Ok(RasterWindow {
                    width: window.width(),
                    height: window.height(),
                    bands: samples
                        .iter()
                        .map(|_| Samples::filled(SampleKind::F64, window.pixel_count(), self.value))
                        .collect(),
                    sample_indices: samples,
                    fill_value,
                })
            })
        }
    }

    #[test]
    fn test_default_image_accessors() {
        let resource = StaticResource {
            key: "mem://static".to_string(),
            images: vec![ImageInfo::new(512, 512, 256, 256), ImageInfo::new(256, 256, 256, 256)],
            value: 1.0,
        };
        assert_eq!(resource.level_count(), 2);
        assert_eq!(resource.image(1).unwrap().width, 256);
        assert_eq!(
            resource.image(2).unwrap_err(),
            CogError::InvalidLevel { level: 2, levels: 2 }
        );
    }
}
