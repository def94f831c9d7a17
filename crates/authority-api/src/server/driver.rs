/// Fires the world tick on a fixed cadence until shutdown. Returns the number
/// of passes run.
async fn run_tick_driver(state: AppState, mut shutdown: watch::Receiver<bool>) -> u64 {
    let interval_ms = state.driver_interval_ms.max(1);
    let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    info!(interval_ms, "tick driver started");

    let mut passes = 0_u64;
    let mut last = Instant::now();
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
        }

        let elapsed_ms = last.elapsed().as_millis() as u64;
        last = Instant::now();
        if passes > 0 && elapsed_ms * 2 > interval_ms * 3 {
            warn!(elapsed_ms, interval_ms, "tick driver drifting");
        }

        let now = now_ms();
        let report = {
            let mut inner = state.inner.lock().await;
            let started = Instant::now();
            let report = inner.tick(now);
            inner.record_tick_duration(started.elapsed().as_secs_f64() * 1_000.0, now);
            report
        };
        passes += 1;

        for incident in &report.incidents {
            info!(
                space_id = %incident.space_id,
                kind = ?incident.kind,
                vessels = ?incident.vessel_ids,
                distance_m = ?incident.distance_m,
                "incident"
            );
        }
        for (space_id, vessel_id) in &report.demoted {
            info!(space_id = %space_id, vessel_id = %vessel_id, "vessel handed to AI");
        }
        for (space_id, transition) in &report.event_transitions {
            info!(space_id = %space_id, transition = ?transition, "environment event");
        }
        for failure in &report.failures {
            warn!(space_id = %failure.space_id, error = %failure.error, "space tick failed");
        }

        let routing = Instant::now();
        state.effects.route(report.effects, now);
        let broadcast_ms = routing.elapsed().as_secs_f64() * 1_000.0;
        state
            .inner
            .lock()
            .await
            .record_broadcast_duration(broadcast_ms, now);
    }

    info!(passes, "tick driver stopping");
    passes
}
