//! Request-coalescing caches.
//!
//! - [`SingleFlight`]: the keyed shared-computation map every cache uses
//! - [`TileDecodeCache`]: decoded pixel windows keyed by
//!   (resource, band selection, z, x, y)
//!
//! The rendered tile cache lives with the session in
//! [`adapter`](crate::adapter) since it needs the scene registry.

mod decode;
mod single_flight;

pub use decode::{DecodeKey, DecodeSelection, TileDecodeCache, DEFAULT_FILL_VALUE};
pub use single_flight::{Flight, SingleFlight, Ticket};
