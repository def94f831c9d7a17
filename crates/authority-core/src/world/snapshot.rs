use super::*;

impl SpaceState {
    /// Every active vessel plus the environment.
    pub fn full_snapshot(&self, now_ms: u64) -> SimulationUpdate {
        SimulationUpdate {
            space_id: self.space_id.clone(),
            vessels: self
                .vessels
                .values()
                .filter(|vessel| vessel.is_active())
                .map(|vessel| (vessel.id.clone(), VesselSnapshot::from(vessel)))
                .collect(),
            environment: Some(self.environment.clone()),
            partial: false,
            timestamp: now_ms,
        }
    }

    /// Changed vessels (and the environment, if it moved) since the last flush.
    pub fn partial_snapshot(&self, now_ms: u64) -> Option<SimulationUpdate> {
        if self.changed.is_empty() && !self.environment_dirty {
            return None;
        }
        Some(SimulationUpdate {
            space_id: self.space_id.clone(),
            vessels: self
                .changed
                .iter()
                .filter_map(|vessel_id| self.vessels.get(vessel_id))
                .map(|vessel| (vessel.id.clone(), VesselSnapshot::from(vessel)))
                .collect(),
            environment: self.environment_dirty.then(|| self.environment.clone()),
            partial: true,
            timestamp: now_ms,
        })
    }

    pub(super) fn flush_snapshots(&mut self, now_ms: u64, effects: &mut Effects) {
        if let Some(update) = self.partial_snapshot(now_ms) {
            effects.to_space(&self.space_id, ServerMessage::SimulationUpdate(update));
            if self.environment_dirty {
                effects.push(self.environment_write(false));
            }
        }
        self.changed.clear();
        self.environment_dirty = false;

        let pending = std::mem::take(&mut self.pending_full);
        if pending.is_empty() {
            return;
        }
        let full = self.full_snapshot(now_ms);
        for connection_id in pending {
            if self.sockets.contains_key(&connection_id) {
                effects.send(
                    Audience::Connection(connection_id),
                    ServerMessage::SimulationUpdate(full.clone()),
                );
            }
        }
    }
}

impl WorldState {
    pub fn full_snapshot(&self, space_id: &str, now_ms: u64) -> Option<SimulationUpdate> {
        self.spaces
            .get(space_id)
            .map(|space| space.full_snapshot(now_ms))
    }
}
