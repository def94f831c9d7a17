use std::collections::HashMap;

use serde::Serialize;

/// True when no trigger was recorded or the last one is at least `window_ms` old.
pub fn can_trigger(last_triggered_at: Option<u64>, now_ms: u64, window_ms: u64) -> bool {
    match last_triggered_at {
        None => true,
        Some(last) => now_ms.saturating_sub(last) >= window_ms,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CooldownKind {
    Collision,
    NearMiss,
    SpeedViolation,
}

/// Keyed by kind plus either an unordered vessel pair or a single vessel.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CooldownKey {
    kind: CooldownKind,
    first: String,
    second: Option<String>,
}

impl CooldownKey {
    pub fn pair(kind: CooldownKind, a: &str, b: &str) -> Self {
        let (first, second) = if a <= b { (a, b) } else { (b, a) };
        Self {
            kind,
            first: first.to_string(),
            second: Some(second.to_string()),
        }
    }

    pub fn vessel(kind: CooldownKind, vessel_id: &str) -> Self {
        Self {
            kind,
            first: vessel_id.to_string(),
            second: None,
        }
    }

    pub fn kind(&self) -> CooldownKind {
        self.kind
    }

    pub fn involves(&self, vessel_id: &str) -> bool {
        self.first == vessel_id || self.second.as_deref() == Some(vessel_id)
    }
}

#[derive(Debug, Clone, Default)]
pub struct CooldownTracker {
    last_triggered: HashMap<CooldownKey, u64>,
}

impl CooldownTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_triggered(&self, key: &CooldownKey) -> Option<u64> {
        self.last_triggered.get(key).copied()
    }

    /// Records `now_ms` and returns true only when the key is out of cooldown.
    pub fn try_trigger(&mut self, key: CooldownKey, now_ms: u64, window_ms: u64) -> bool {
        if !can_trigger(self.last_triggered(&key), now_ms, window_ms) {
            return false;
        }
        self.last_triggered.insert(key, now_ms);
        true
    }

    /// Drops entries older than `max_window_ms`; they can no longer block a trigger.
    pub fn prune(&mut self, now_ms: u64, max_window_ms: u64) {
        self.last_triggered
            .retain(|_, last| now_ms.saturating_sub(*last) < max_window_ms);
    }

    pub fn forget_vessel(&mut self, vessel_id: &str) {
        self.last_triggered.retain(|key, _| !key.involves(vessel_id));
    }

    pub fn len(&self) -> usize {
        self.last_triggered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_triggered.is_empty()
    }
}
