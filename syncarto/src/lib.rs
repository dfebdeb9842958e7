//! Syncarto - Cloud-Optimized GeoTIFF tiles for interactive maps
//!
//! This library turns remote Cloud-Optimized GeoTIFF (COG) imagery into
//! rendered map tiles. Given a tile coordinate it resolves the backing
//! resources, decodes only the byte ranges of the matching overview level,
//! applies the scene's processing pipeline and hands back an RGBA canvas.
//!
//! # Architecture
//!
//! ```text
//! MapHost ──► TileSource ──► Rendered Tile Cache ──► Tile Decode Cache ──► CogResource
//!  (layers)   (per scene)    (scene, z, x, y)        (resource, bands,     (range reads,
//!                                 │                   z, x, y)             tiff decode)
//!                                 ▼
//!                          Pipeline Engine
//!                    (scaling, sigmoidal, gamma)
//! ```
//!
//! Every cache is owned by a [`adapter::CogAdapter`] session and coalesces
//! concurrent requests through [`cache::SingleFlight`].

use std::future::Future;
use std::pin::Pin;

pub mod adapter;
pub mod cache;
pub mod cog;
pub mod config;
pub mod map;
pub mod projection;
pub mod render;
pub mod scene;
pub mod telemetry;
pub mod tile;

/// Boxed future used by the dyn-compatible traits at the crate's seams.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Library version, taken from the package manifest.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
