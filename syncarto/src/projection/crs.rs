//! Lazy resolution of EPSG codes against a remote CRS registry.

use std::sync::Arc;
use std::time::Duration;

use crate::cache::SingleFlight;
use crate::cog::GeoKeys;
use crate::telemetry::TileMetrics;
use crate::BoxFuture;

use super::registry::{epsg_name, ProjectionRegistry};
use super::CrsError;

/// Default proj4 lookup URL; `{code}` is replaced by the EPSG code.
pub const DEFAULT_REGISTRY_URL: &str = "https://epsg.io/{code}.proj4";

/// Source of proj4 definitions by EPSG code.
pub trait CrsRegistry: Send + Sync {
    fn fetch_proj4(&self, code: u16) -> BoxFuture<'_, Result<String, CrsError>>;
}

/// Fetches definitions over HTTP from an epsg.io-style URL template.
pub struct EpsgIoRegistry {
    client: reqwest::Client,
    url_template: String,
}

impl EpsgIoRegistry {
    pub fn new(client: reqwest::Client, url_template: impl Into<String>) -> Self {
        Self {
            client,
            url_template: url_template.into(),
        }
    }

    /// Registry using [`DEFAULT_REGISTRY_URL`] and its own client.
    pub fn with_timeout(timeout: Duration) -> Result<Self, CrsError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CrsError::Fetch {
                code: 0,
                message: format!("Failed to create HTTP client: {}", e),
            })?;
        Ok(Self::new(client, DEFAULT_REGISTRY_URL))
    }

    pub fn url_for(&self, code: u16) -> String {
        self.url_template.replace("{code}", &code.to_string())
    }
}

impl CrsRegistry for EpsgIoRegistry {
    fn fetch_proj4(&self, code: u16) -> BoxFuture<'_, Result<String, CrsError>> {
        Box::pin(async move {
            let url = self.url_for(code);
            let fetch_error = |message: String| CrsError::Fetch { code, message };

            let response = self
                .client
                .get(&url)
                .send()
                .await
                .map_err(|e| fetch_error(format!("request to {} failed: {}", url, e)))?;

            let status = response.status();
            if !status.is_success() {
                return Err(fetch_error(format!("{} returned HTTP {}", url, status)));
            }

            let body = response
                .text()
                .await
                .map_err(|e| fetch_error(format!("failed to read {}: {}", url, e)))?;
            let definition = body.trim();
            if definition.is_empty() {
                return Err(fetch_error(format!("{} returned an empty definition", url)));
            }
            Ok(definition.to_string())
        })
    }
}

/// Resolves a resource's GeoKeys to a registered projection name.
///
/// Unknown codes are fetched from the [`CrsRegistry`] and registered. Each
/// code is fetched successfully at most once per session; concurrent lookups
/// share one fetch and failures are not remembered.
pub struct CrsResolver {
    registry: Arc<dyn CrsRegistry>,
    projections: Arc<ProjectionRegistry>,
    fetches: SingleFlight<u16, (), CrsError>,
    metrics: Arc<TileMetrics>,
}

impl CrsResolver {
    pub fn new(
        registry: Arc<dyn CrsRegistry>,
        projections: Arc<ProjectionRegistry>,
        metrics: Arc<TileMetrics>,
    ) -> Self {
        Self {
            registry,
            projections,
            fetches: SingleFlight::new("crs"),
            metrics,
        }
    }

    pub fn projections(&self) -> &Arc<ProjectionRegistry> {
        &self.projections
    }

    /// Projection name (`EPSG:<code>`) for `geo_keys`, registering it first if
    /// needed.
    pub async fn resolve(&self, geo_keys: &GeoKeys) -> Result<String, CrsError> {
        let code = geo_keys.epsg_code().ok_or(CrsError::MissingCrsCode)?;
        self.ensure_registered(code).await?;
        Ok(epsg_name(code))
    }

    /// Make sure `EPSG:<code>` is registered.
    pub async fn ensure_registered(&self, code: u16) -> Result<(), CrsError> {
        let name = epsg_name(code);
        if self.projections.contains(&name) {
            return Ok(());
        }

        let registry = Arc::clone(&self.registry);
        let projections = Arc::clone(&self.projections);
        let metrics = Arc::clone(&self.metrics);
        self.fetches
            .run(code, move || async move {
                tracing::info!(code, "Fetching CRS definition");
                metrics.crs_fetched();
                let definition = registry.fetch_proj4(code).await?;
                projections.register(&name, &definition)
            })
            .await
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::cog::geokeys::{GEOGRAPHIC_TYPE_GEO_KEY, PROJECTED_CS_TYPE_GEO_KEY};
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Registry serving definitions from a map, counting fetches.
    #[derive(Default)]
    pub struct MapRegistry {
        pub definitions: Mutex<HashMap<u16, String>>,
        pub fetches: AtomicUsize,
    }

    impl MapRegistry {
        pub fn with(code: u16, proj4: &str) -> Self {
            let registry = Self::default();
            registry.definitions.lock().insert(code, proj4.to_string());
            registry
        }
    }

    impl CrsRegistry for MapRegistry {
        fn fetch_proj4(&self, code: u16) -> BoxFuture<'_, Result<String, CrsError>> {
            Box::pin(async move {
                self.fetches.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                self.definitions
                    .lock()
                    .get(&code)
                    .cloned()
                    .ok_or(CrsError::Fetch {
                        code,
                        message: "not found".to_string(),
                    })
            })
        }
    }

    fn keys(entries: &[(u16, u16)]) -> GeoKeys {
        let mut directory = vec![1, 1, 0, entries.len() as u16];
        for (key, value) in entries {
            directory.extend_from_slice(&[*key, 0, 1, *value]);
        }
        GeoKeys::parse(&directory, &[], "").unwrap()
    }

    fn resolver(registry: Arc<MapRegistry>) -> CrsResolver {
        CrsResolver::new(
            registry,
            Arc::new(ProjectionRegistry::new()),
            Arc::new(TileMetrics::new()),
        )
    }

    const UTM_33N: &str = "+proj=utm +zone=33 +datum=WGS84 +units=m +no_defs";

    #[tokio::test]
    async fn test_known_code_needs_no_fetch() {
        let registry = Arc::new(MapRegistry::default());
        let resolver = resolver(Arc::clone(&registry));

        let name = resolver
            .resolve(&keys(&[(GEOGRAPHIC_TYPE_GEO_KEY, 4326)]))
            .await
            .unwrap();
        assert_eq!(name, "EPSG:4326");
        assert_eq!(registry.fetches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unknown_code_fetched_once() {
        let registry = Arc::new(MapRegistry::with(32633, UTM_33N));
        let resolver = Arc::new(resolver(Arc::clone(&registry)));
        let geo_keys = keys(&[
            (GEOGRAPHIC_TYPE_GEO_KEY, 4326),
            (PROJECTED_CS_TYPE_GEO_KEY, 32633),
        ]);

        let lookups = (0..4).map(|_| resolver.resolve(&geo_keys));
        let names = futures::future::join_all(lookups).await;
        for name in names {
            assert_eq!(name.unwrap(), "EPSG:32633");
        }
        resolver.resolve(&geo_keys).await.unwrap();

        assert_eq!(registry.fetches.load(Ordering::SeqCst), 1);
        assert!(resolver.projections().contains("EPSG:32633"));
    }

    #[tokio::test]
    async fn test_failed_fetch_is_not_cached() {
        let registry = Arc::new(MapRegistry::default());
        let resolver = resolver(Arc::clone(&registry));
        let geo_keys = keys(&[(PROJECTED_CS_TYPE_GEO_KEY, 32633)]);

        assert!(matches!(
            resolver.resolve(&geo_keys).await,
            Err(CrsError::Fetch { code: 32633, .. })
        ));

        registry
            .definitions
            .lock()
            .insert(32633, UTM_33N.to_string());
        assert_eq!(resolver.resolve(&geo_keys).await.unwrap(), "EPSG:32633");
        assert_eq!(registry.fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_missing_code() {
        let resolver = resolver(Arc::new(MapRegistry::default()));
        assert_eq!(
            resolver.resolve(&keys(&[(PROJECTED_CS_TYPE_GEO_KEY, 32767)])).await,
            Err(CrsError::MissingCrsCode)
        );
    }

    #[test]
    fn test_url_template() {
        let registry = EpsgIoRegistry::new(reqwest::Client::new(), DEFAULT_REGISTRY_URL);
        assert_eq!(registry.url_for(32633), "https://epsg.io/32633.proj4");
    }
}
