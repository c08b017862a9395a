//! Optional periodic heartbeat driven by the server.

use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::state::AppState;

/// Run `advance_active` every `interval` in a background task.
///
/// Ticks do not coordinate with `POST /api/orchestrator/step`: a project can
/// be stepped by both at once. Callers that step projects by hand while the
/// ticker runs must not double-trigger the same project.
pub fn start_heartbeat(state: AppState, interval: Duration) {
    info!(interval_secs = interval.as_secs(), "starting heartbeat ticker");
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately.
        tick.tick().await;
        loop {
            tick.tick().await;
            let orchestrator = state.orchestrator.clone();
            match tokio::task::spawn_blocking(move || orchestrator.advance_active(None)).await {
                Ok(Ok(report)) => debug!(
                    stepped = report.results.len(),
                    failed = report.failures(),
                    "heartbeat tick"
                ),
                Ok(Err(err)) => warn!(error = %format!("{err:#}"), "heartbeat failed"),
                Err(err) => warn!(error = %err, "heartbeat task panicked"),
            }
        }
    });
}
