//! Tile pipeline telemetry.
//!
//! Lock-free atomic counters recorded by the caches and the session, copied
//! into a plain [`TelemetrySnapshot`] for display.
//!
//! ```text
//! Decode/Render caches ─────► TileMetrics ─────► TelemetrySnapshot ─────► CLI, logs
//!                            (atomic counters)   (point-in-time copy)
//! ```

mod metrics;
mod snapshot;

pub use metrics::TileMetrics;
pub use snapshot::TelemetrySnapshot;
