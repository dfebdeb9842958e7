//! Session-level error type.

use thiserror::Error;
use tokio::task::JoinError;

use crate::cog::CogError;
use crate::config::ConfigError;
use crate::projection::CrsError;
use crate::render::RenderError;
use crate::scene::SceneError;
use crate::tile::TileGridError;

/// Errors surfaced by [`CogAdapter`](super::CogAdapter) operations.
///
/// Cloneable so one failed render reaches every caller waiting on it.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AdapterError {
    #[error(transparent)]
    Cog(#[from] CogError),

    #[error(transparent)]
    Crs(#[from] CrsError),

    #[error(transparent)]
    Scene(#[from] SceneError),

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("cannot build tile grid: {0}")]
    Grid(#[from] TileGridError),

    /// A scene references a URL that was never opened
    #[error("no open resource for {0}")]
    MissingResource(String),

    #[error("render task failed: {0}")]
    Task(String),
}

impl From<JoinError> for AdapterError {
    fn from(e: JoinError) -> Self {
        AdapterError::Task(e.to_string())
    }
}
