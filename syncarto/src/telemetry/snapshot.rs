//! Point-in-time telemetry copy.

use std::fmt;
use std::time::Duration;

/// Plain copy of [`TileMetrics`](super::TileMetrics) counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TelemetrySnapshot {
    pub decode_requests: u64,
    pub decodes_coalesced: u64,
    pub decodes_started: u64,
    pub decodes_failed: u64,
    pub decodes_pooled: u64,
    /// Summed wall time of finished decodes
    pub decode_time: Duration,

    pub render_requests: u64,
    pub renders_coalesced: u64,
    pub renders_started: u64,
    pub renders_failed: u64,
    pub renders_skipped: u64,
    /// Summed wall time of finished renders
    pub render_time: Duration,

    pub scenes_added: u64,
    pub scenes_removed: u64,
    pub crs_fetches: u64,
}

impl TelemetrySnapshot {
    /// Share of decode requests served without starting a decode.
    pub fn decode_hit_rate(&self) -> f64 {
        hit_rate(self.decodes_coalesced, self.decode_requests)
    }

    /// Share of render requests served without starting a render.
    pub fn render_hit_rate(&self) -> f64 {
        hit_rate(self.renders_coalesced, self.render_requests)
    }

    /// Mean wall time of a started decode.
    pub fn mean_decode_time(&self) -> Duration {
        mean(self.decode_time, self.decodes_started)
    }

    /// Mean wall time of a started render.
    pub fn mean_render_time(&self) -> Duration {
        mean(self.render_time, self.renders_started)
    }
}

fn hit_rate(hits: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64
    }
}

fn mean(total: Duration, count: u64) -> Duration {
    if count == 0 {
        Duration::ZERO
    } else {
        total / count.min(u32::MAX as u64) as u32
    }
}

impl fmt::Display for TelemetrySnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "decodes: {} requested, {} started, {} coalesced ({:.0}%), {} pooled, {} failed, mean {:?}",
            self.decode_requests,
            self.decodes_started,
            self.decodes_coalesced,
            self.decode_hit_rate() * 100.0,
            self.decodes_pooled,
            self.decodes_failed,
            self.mean_decode_time()
        )?;
        writeln!(
            f,
            "renders: {} requested, {} started, {} coalesced ({:.0}%), {} skipped, {} failed, mean {:?}",
            self.render_requests,
            self.renders_started,
            self.renders_coalesced,
            self.render_hit_rate() * 100.0,
            self.renders_skipped,
            self.renders_failed,
            self.mean_render_time()
        )?;
        write!(
            f,
            "scenes: {} added, {} removed; CRS fetches: {}",
            self.scenes_added, self.scenes_removed, self.crs_fetches
        )
    }
}
