//! Atomic counters for the tile pipeline.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use super::TelemetrySnapshot;

/// Counters shared by every component of one session.
#[derive(Debug, Default)]
pub struct TileMetrics {
    decode_requests: AtomicU64,
    decodes_coalesced: AtomicU64,
    decodes_started: AtomicU64,
    decodes_failed: AtomicU64,
    decodes_pooled: AtomicU64,
    decode_micros: AtomicU64,

    render_requests: AtomicU64,
    renders_coalesced: AtomicU64,
    renders_started: AtomicU64,
    renders_failed: AtomicU64,
    renders_skipped: AtomicU64,
    render_micros: AtomicU64,

    scenes_added: AtomicU64,
    scenes_removed: AtomicU64,
    crs_fetches: AtomicU64,
}

impl TileMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    // Decode cache

    pub fn decode_requested(&self) {
        self.decode_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn decode_coalesced(&self) {
        self.decodes_coalesced.fetch_add(1, Ordering::Relaxed);
    }

    pub fn decode_started(&self) {
        self.decodes_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn decode_failed(&self) {
        self.decodes_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn decode_pooled(&self) {
        self.decodes_pooled.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the wall time of one finished decode.
    pub fn decode_finished(&self, elapsed: Duration) {
        self.decode_micros
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
    }

    // Render cache

    pub fn render_requested(&self) {
        self.render_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn render_coalesced(&self) {
        self.renders_coalesced.fetch_add(1, Ordering::Relaxed);
    }

    pub fn render_started(&self) {
        self.renders_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn render_failed(&self) {
        self.renders_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// A render found its scene removed and drew nothing.
    pub fn render_skipped(&self) {
        self.renders_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn render_finished(&self, elapsed: Duration) {
        self.render_micros
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
    }

    // Session

    pub fn scene_added(&self) {
        self.scenes_added.fetch_add(1, Ordering::Relaxed);
    }

    pub fn scene_removed(&self) {
        self.scenes_removed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn crs_fetched(&self) {
        self.crs_fetches.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of every counter.
    pub fn snapshot(&self) -> TelemetrySnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        TelemetrySnapshot {
            decode_requests: load(&self.decode_requests),
            decodes_coalesced: load(&self.decodes_coalesced),
            decodes_started: load(&self.decodes_started),
            decodes_failed: load(&self.decodes_failed),
            decodes_pooled: load(&self.decodes_pooled),
            decode_time: Duration::from_micros(load(&self.decode_micros)),
            render_requests: load(&self.render_requests),
            renders_coalesced: load(&self.renders_coalesced),
            renders_started: load(&self.renders_started),
            renders_failed: load(&self.renders_failed),
            renders_skipped: load(&self.renders_skipped),
            render_time: Duration::from_micros(load(&self.render_micros)),
            scenes_added: load(&self.scenes_added),
            scenes_removed: load(&self.scenes_removed),
            crs_fetches: load(&self.crs_fetches),
        }
    }
}
