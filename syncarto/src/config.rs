//! Session configuration.
//!
//! `AdapterConfig` gathers every tunable of a [`CogAdapter`](crate::adapter::CogAdapter)
//! session. It can be built in code with the `with_*` methods or loaded from
//! an INI file:
//!
//! ```ini
//! [decode]
//! workers = 8
//! fill_value = -999
//! block_size_kb = 64
//! block_cache_mb = 256
//!
//! [scale]
//! min = -0.2
//! max = 0.7
//!
//! [crs]
//! registry_url = https://epsg.io/{code}.proj4
//!
//! [http]
//! timeout_secs = 30
//!
//! [view]
//! projection = EPSG:4326
//! center_lon = 0
//! center_lat = 0
//! zoom = 5
//! fit_duration_ms = 1000
//! ```
//!
//! Missing keys keep their defaults.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use ini::{Ini, Properties};
use thiserror::Error;

use crate::cache::DEFAULT_FILL_VALUE;
use crate::cog::{default_workers, DEFAULT_BLOCK_CACHE_BYTES, DEFAULT_BLOCK_SIZE};
use crate::projection::{DEFAULT_REGISTRY_URL, EPSG_4326};
use crate::render::ScaleRange;

/// Default timeout for HTTP requests (range reads and CRS lookups).
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

/// Default duration of the viewport animation after adding a scene.
pub const DEFAULT_FIT_DURATION_MS: u64 = 1000;

/// Default view projection.
pub const DEFAULT_VIEW_PROJECTION: &str = EPSG_4326;

/// Default view zoom.
pub const DEFAULT_VIEW_ZOOM: f64 = 5.0;

/// Name of the configuration file inside the config directory.
pub const CONFIG_FILE_NAME: &str = "config.ini";

/// Errors loading configuration.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {message}")]
    Read { path: PathBuf, message: String },

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("invalid value '{value}' for [{section}] {key}")]
    InvalidValue {
        section: String,
        key: String,
        value: String,
    },
}

/// Initial camera of the map host.
#[derive(Clone, Debug, PartialEq)]
pub struct ViewConfig {
    /// Projection code of the view, e.g. `EPSG:4326`.
    pub projection: String,
    /// View centre in view projection coordinates.
    pub center: (f64, f64),
    pub zoom: f64,
    /// Duration of the fit animation when a scene is added.
    pub fit_duration: Duration,
}

impl Default for ViewConfig {
    fn default() -> Self {
        Self {
            projection: DEFAULT_VIEW_PROJECTION.to_string(),
            center: (0.0, 0.0),
            zoom: DEFAULT_VIEW_ZOOM,
            fit_duration: Duration::from_millis(DEFAULT_FIT_DURATION_MS),
        }
    }
}

/// Configuration of one adapter session.
#[derive(Clone, Debug, PartialEq)]
pub struct AdapterConfig {
    /// Size of the decode pool for LZW-compressed levels.
    pub decode_workers: usize,

    /// Value written for pixels outside the image in multi-band decodes.
    pub fill_value: f64,

    /// Size of one block in the byte-range cache.
    pub block_size: u64,

    /// Memory budget of the byte-range cache.
    pub block_cache_bytes: u64,

    /// Range scaled onto the ramp of single-file multiband scenes that do
    /// not carry their own.
    pub scale_range: ScaleRange,

    /// CRS lookup URL template; `{code}` is replaced by the EPSG code.
    pub crs_registry_url: String,

    /// Timeout for HTTP requests.
    pub http_timeout: Duration,

    pub view: ViewConfig,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            decode_workers: default_workers(),
            fill_value: DEFAULT_FILL_VALUE,
            block_size: DEFAULT_BLOCK_SIZE,
            block_cache_bytes: DEFAULT_BLOCK_CACHE_BYTES,
            scale_range: ScaleRange::default(),
            crs_registry_url: DEFAULT_REGISTRY_URL.to_string(),
            http_timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
            view: ViewConfig::default(),
        }
    }
}

impl AdapterConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the decode pool size.
    pub fn with_decode_workers(mut self, workers: usize) -> Self {
        self.decode_workers = workers;
        self
    }

    /// Set the fill value for pixels outside the image.
    pub fn with_fill_value(mut self, fill_value: f64) -> Self {
        self.fill_value = fill_value;
        self
    }

    /// Set the block cache geometry.
    pub fn with_block_cache(mut self, block_size: u64, max_bytes: u64) -> Self {
        self.block_size = block_size;
        self.block_cache_bytes = max_bytes;
        self
    }

    pub fn with_scale_range(mut self, range: ScaleRange) -> Self {
        self.scale_range = range;
        self
    }

    pub fn with_crs_registry_url(mut self, url: impl Into<String>) -> Self {
        self.crs_registry_url = url.into();
        self
    }

    pub fn with_http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = timeout;
        self
    }

    pub fn with_view(mut self, view: ViewConfig) -> Self {
        self.view = view;
        self
    }

    /// Default config file location: `<config dir>/syncarto/config.ini`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("syncarto").join(CONFIG_FILE_NAME))
    }

    /// Load from an INI file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let ini = Ini::load_from_file(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::from_ini(&ini)
    }

    /// Load from `path` when it exists, defaults otherwise.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            Ok(Self::default())
        }
    }

    /// Parse INI text.
    pub fn from_ini_str(text: &str) -> Result<Self, ConfigError> {
        let ini = Ini::load_from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        Self::from_ini(&ini)
    }

    fn from_ini(ini: &Ini) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(section) = ini.section(Some("decode")) {
            read(section, "decode", "workers", &mut config.decode_workers)?;
            read(section, "decode", "fill_value", &mut config.fill_value)?;
            let mut block_kb = config.block_size / 1024;
            read(section, "decode", "block_size_kb", &mut block_kb)?;
            config.block_size = block_kb * 1024;
            let mut cache_mb = config.block_cache_bytes / (1024 * 1024);
            read(section, "decode", "block_cache_mb", &mut cache_mb)?;
            config.block_cache_bytes = cache_mb * 1024 * 1024;
        }

        if let Some(section) = ini.section(Some("scale")) {
            read(section, "scale", "min", &mut config.scale_range.min)?;
            read(section, "scale", "max", &mut config.scale_range.max)?;
        }

        if let Some(section) = ini.section(Some("crs")) {
            if let Some(url) = section.get("registry_url") {
                config.crs_registry_url = url.trim().to_string();
            }
        }

        if let Some(section) = ini.section(Some("http")) {
            let mut secs = config.http_timeout.as_secs();
            read(section, "http", "timeout_secs", &mut secs)?;
            config.http_timeout = Duration::from_secs(secs);
        }

        if let Some(section) = ini.section(Some("view")) {
            let view = &mut config.view;
            if let Some(projection) = section.get("projection") {
                view.projection = projection.trim().to_string();
            }
            read(section, "view", "center_lon", &mut view.center.0)?;
            read(section, "view", "center_lat", &mut view.center.1)?;
            read(section, "view", "zoom", &mut view.zoom)?;
            let mut fit_ms = view.fit_duration.as_millis() as u64;
            read(section, "view", "fit_duration_ms", &mut fit_ms)?;
            view.fit_duration = Duration::from_millis(fit_ms);
        }

        Ok(config)
    }
}

/// Overwrite `target` with `key` from `section` when present.
fn read<T: FromStr>(
    properties: &Properties,
    section: &str,
    key: &str,
    target: &mut T,
) -> Result<(), ConfigError> {
    if let Some(value) = properties.get(key) {
        *target = value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue {
                section: section.to_string(),
                key: key.to_string(),
                value: value.to_string(),
            })?;
    }
    Ok(())
}
