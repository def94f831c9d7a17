//! Driver timings and per-space population counts, served by the metrics and
//! status routes.

use authority_core::SpaceState;
use contracts::VesselMode;
use serde::Serialize;

/// Running last, mean and max of one timed phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct TimingBucket {
    pub last_ms: f64,
    pub avg_ms: f64,
    pub max_ms: f64,
    pub count: u64,
}

impl TimingBucket {
    pub fn record(&mut self, ms: f64) {
        self.last_ms = ms;
        self.max_ms = self.max_ms.max(ms);
        self.avg_ms = if self.count == 0 {
            ms
        } else {
            self.avg_ms + (ms - self.avg_ms) / (self.count + 1) as f64
        };
        self.count += 1;
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct DriverTimings {
    /// World tick under the runtime lock.
    pub tick: TimingBucket,
    /// Routing the tick's effects to sockets and workers.
    pub broadcast: TimingBucket,
    pub updated_at: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SpaceMetrics {
    pub space_id: String,
    pub connected: usize,
    pub vessels: usize,
    pub ai_vessels: usize,
    pub player_vessels: usize,
    pub tick_count: u64,
}

impl SpaceMetrics {
    /// Counts active vessels only; stored ones are not on the water.
    pub fn of(space: &SpaceState) -> Self {
        let active = || space.vessels().values().filter(|vessel| vessel.is_active());
        Self {
            space_id: space.space_id().to_string(),
            connected: space.socket_count(),
            vessels: active().count(),
            ai_vessels: active().filter(|vessel| vessel.mode == VesselMode::Ai).count(),
            player_vessels: active()
                .filter(|vessel| vessel.mode == VesselMode::Player)
                .count(),
            tick_count: space.tick_count(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerMetrics {
    pub connected: usize,
    pub timings: DriverTimings,
    pub spaces: Vec<SpaceMetrics>,
}
