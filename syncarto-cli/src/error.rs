//! CLI error type.

use std::fmt;
use std::path::PathBuf;

use syncarto::adapter::AdapterError;
use syncarto::cog::CogError;
use syncarto::config::ConfigError;
use syncarto::render::PipelineParseError;
use syncarto::scene::SceneError;
use syncarto::tile::TileCoordParseError;

/// Errors reported by CLI commands. Every variant exits with status 1.
#[derive(Debug)]
pub enum CliError {
    /// Configuration file could not be loaded
    Config(ConfigError),
    /// Tokio runtime could not be created
    Runtime(String),
    /// Logging could not be initialised
    Logging(String),
    /// A COG could not be opened or read
    Cog(CogError),
    /// Scene registration or rendering failed
    Adapter(AdapterError),
    /// Scene file or descriptor is invalid
    Scene(SceneError),
    /// Scene file could not be read
    ReadScene { path: PathBuf, message: String },
    Pipeline(PipelineParseError),
    Tile(TileCoordParseError),
    /// The requested tile has no data
    EmptyTile(String),
    /// Output image could not be written
    WriteImage { path: PathBuf, message: String },
    Json(String),
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::Config(e) => write!(f, "Configuration error: {}", e),
            CliError::Runtime(msg) => write!(f, "Failed to start async runtime: {}", msg),
            CliError::Logging(msg) => write!(f, "Failed to initialise logging: {}", msg),
            CliError::Cog(e) => write!(f, "{}", e),
            CliError::Adapter(e) => write!(f, "{}", e),
            CliError::Scene(e) => write!(f, "Invalid scene: {}", e),
            CliError::ReadScene { path, message } => {
                write!(f, "Failed to read scene file {}: {}", path.display(), message)
            }
            CliError::Pipeline(e) => write!(f, "Invalid pipeline: {}", e),
            CliError::Tile(e) => write!(f, "{}", e),
            CliError::EmptyTile(tile) => write!(f, "Tile {} has no data", tile),
            CliError::WriteImage { path, message } => {
                write!(f, "Failed to write {}: {}", path.display(), message)
            }
            CliError::Json(msg) => write!(f, "Failed to serialise JSON: {}", msg),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::Config(e) => Some(e),
            CliError::Cog(e) => Some(e),
            CliError::Adapter(e) => Some(e),
            CliError::Scene(e) => Some(e),
            CliError::Pipeline(e) => Some(e),
            CliError::Tile(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(e: ConfigError) -> Self {
        CliError::Config(e)
    }
}

impl From<CogError> for CliError {
    fn from(e: CogError) -> Self {
        CliError::Cog(e)
    }
}

impl From<AdapterError> for CliError {
    fn from(e: AdapterError) -> Self {
        CliError::Adapter(e)
    }
}

impl From<SceneError> for CliError {
    fn from(e: SceneError) -> Self {
        CliError::Scene(e)
    }
}

impl From<PipelineParseError> for CliError {
    fn from(e: PipelineParseError) -> Self {
        CliError::Pipeline(e)
    }
}

impl From<TileCoordParseError> for CliError {
    fn from(e: TileCoordParseError) -> Self {
        CliError::Tile(e)
    }
}

impl From<serde_json::Error> for CliError {
    fn from(e: serde_json::Error) -> Self {
        CliError::Json(e.to_string())
    }
}
