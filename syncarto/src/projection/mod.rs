//! Projections: named proj4 definitions and remote CRS lookup.
//!
//! The [`ProjectionRegistry`] starts with EPSG:4326 and EPSG:3857. A scene in
//! any other EPSG system has its definition fetched once through the
//! [`CrsResolver`] before its extent is transformed to the view projection.

mod crs;
mod registry;

pub use crs::{CrsRegistry, CrsResolver, EpsgIoRegistry, DEFAULT_REGISTRY_URL};
pub use registry::{epsg_name, ProjectionRegistry, EPSG_3857, EPSG_4326};

#[cfg(test)]
pub use crs::tests::MapRegistry;

use tokio::task::JoinError;

/// Errors resolving or using a coordinate reference system.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CrsError {
    /// The image's GeoKeys name no usable EPSG code
    #[error("image declares no EPSG coordinate system")]
    MissingCrsCode,

    #[error("failed to fetch definition for EPSG:{code}: {message}")]
    Fetch { code: u16, message: String },

    #[error("invalid projection definition for {name}: {message}")]
    InvalidDefinition { name: String, message: String },

    #[error("projection {0} is not registered")]
    UnknownProjection(String),

    #[error("cannot transform from {from} to {to}: {message}")]
    Transform {
        from: String,
        to: String,
        message: String,
    },

    #[error("CRS task failed: {0}")]
    Task(String),
}

impl From<JoinError> for CrsError {
    fn from(e: JoinError) -> Self {
        CrsError::Task(e.to_string())
    }
}
