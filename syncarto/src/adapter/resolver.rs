//! Scene to resource resolution.
//!
//! ```text
//! Scene ──► open every URL (coalesced per (url, overviews))
//!       ──► reference pyramid: extent, origin, resolutions, tile sizes
//!       ──► GeoKeys ──► EPSG code ──► CrsResolver (fetch once)
//!       ──► extent in view projection
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::debug;

use super::AdapterError;
use crate::cache::SingleFlight;
use crate::cog::{CogError, CogResource, ImageInfo, ResourceOpener};
use crate::projection::CrsResolver;
use crate::scene::Scene;
use crate::tile::{Extent, TileGrid};

/// Identity of an opened resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceKey {
    pub url: String,
    pub overviews: bool,
}

impl ResourceKey {
    pub fn new(url: impl Into<String>, overviews: bool) -> Self {
        Self {
            url: url.into(),
            overviews,
        }
    }
}

/// Opened resources of the session, one per (url, overviews) pair.
pub struct ResourceRegistry {
    opener: Arc<dyn ResourceOpener>,
    flights: SingleFlight<ResourceKey, Arc<dyn CogResource>, CogError>,
}

impl ResourceRegistry {
    pub fn new(opener: Arc<dyn ResourceOpener>) -> Self {
        Self {
            opener,
            flights: SingleFlight::new("resource"),
        }
    }

    /// Open `key`, or join an open already under way. Failed opens are not
    /// retained.
    pub async fn open(&self, key: ResourceKey) -> Result<Arc<dyn CogResource>, CogError> {
        let opener = Arc::clone(&self.opener);
        self.flights
            .run(key.clone(), move || async move {
                debug!(url = %key.url, overviews = key.overviews, "Opening resource");
                opener.open(key.url, key.overviews).await
            })
            .await
    }

    pub fn contains(&self, key: &ResourceKey) -> bool {
        self.flights.contains(key)
    }

    pub fn len(&self) -> usize {
        self.flights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flights.is_empty()
    }

    /// Drop one resource; returns whether it was present.
    pub fn forget(&self, key: &ResourceKey) -> bool {
        self.flights.forget(key)
    }

    /// Drop every resource not in `keep`; returns how many were dropped.
    pub fn retain(&self, keep: &HashSet<ResourceKey>) -> usize {
        self.flights.retain(|key| keep.contains(key))
    }
}

/// A scene with everything needed to render its tiles.
pub struct RegisteredScene {
    pub scene: Scene,
    /// Opened resources by URL.
    pub resources: HashMap<String, Arc<dyn CogResource>>,
    /// Projection code of the scene's data.
    pub projection: String,
    pub grid: TileGrid,
    /// Data extent in the view projection.
    pub view_extent: Extent,
}

impl RegisteredScene {
    pub fn resource(&self, url: &str) -> Result<&Arc<dyn CogResource>, AdapterError> {
        self.resources
            .get(url)
            .ok_or_else(|| AdapterError::MissingResource(url.to_string()))
    }

    /// Registry keys of the scene's resources.
    pub fn resource_keys(&self) -> impl Iterator<Item = ResourceKey> + '_ {
        let overviews = self.scene.has_overviews();
        self.resources
            .keys()
            .map(move |url| ResourceKey::new(url.clone(), overviews))
    }
}

/// Tile grid of a pyramid given finest level first.
///
/// The extent and origin come from the first level; every level contributes
/// its x resolution and tile size.
pub fn pyramid_grid(images: &[ImageInfo]) -> Result<TileGrid, AdapterError> {
    let first = images
        .first()
        .ok_or_else(|| CogError::Unsupported("pyramid has no images".to_string()))?;

    let extent = first.bounding_box()?;
    let (origin_x, _) = first.origin()?;
    let levels = images
        .iter()
        .map(|image| {
            let (resolution, _) = image.resolution(first)?;
            Ok((resolution, image.tile_width, image.tile_height))
        })
        .collect::<Result<Vec<_>, CogError>>()?;
    Ok(TileGrid::from_pyramid(extent, origin_x, &levels)?)
}

/// Opens a scene's resources and derives its grid and projection.
pub struct SceneResolver {
    resources: ResourceRegistry,
    crs: CrsResolver,
}

impl SceneResolver {
    pub fn new(resources: ResourceRegistry, crs: CrsResolver) -> Self {
        Self { resources, crs }
    }

    pub fn resources(&self) -> &ResourceRegistry {
        &self.resources
    }

    pub fn crs(&self) -> &CrsResolver {
        &self.crs
    }

    /// Resolve `scene` for a view in `view_projection`.
    pub async fn resolve(
        &self,
        scene: Scene,
        view_projection: &str,
    ) -> Result<RegisteredScene, AdapterError> {
        let overviews = scene.has_overviews();
        let urls: Vec<String> = scene.urls().into_iter().map(str::to_string).collect();

        let opened = futures::future::try_join_all(
            urls.iter()
                .map(|url| self.resources.open(ResourceKey::new(url.clone(), overviews))),
        )
        .await?;
        let resources: HashMap<String, Arc<dyn CogResource>> =
            urls.into_iter().zip(opened).collect();

        let reference_url = scene.reference_url();
        let reference = resources
            .get(reference_url)
            .ok_or_else(|| AdapterError::MissingResource(reference_url.to_string()))?;

        let grid = pyramid_grid(reference.images())?;
        let extent = grid.extent();
        let first = &reference.images()[0];

        let projection = self.crs.resolve(&first.geo_keys).await?;
        let view_extent =
            self.crs
                .projections()
                .transform_extent(&extent, &projection, view_projection)?;

        debug!(
            scene = scene.id(),
            projection = %projection,
            zooms = grid.zoom_count(),
            extent = %extent,
            "Resolved scene"
        );

        Ok(RegisteredScene {
            scene,
            resources,
            projection,
            grid,
            view_extent,
        })
    }
}
