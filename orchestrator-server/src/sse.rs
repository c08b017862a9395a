//! Server-Sent Events stream of orchestrator events.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use orchestrator::model::EventRecord;
use tokio::sync::broadcast;
use tracing::warn;

use crate::state::AppState;

/// SSE endpoint handler.
///
/// Sends `connected` once, then one message per recorded event, named after
/// the event kind with the JSON record as data.
pub async fn events_handler(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut rx = state.event_tx.subscribe();

    let stream = async_stream::stream! {
        yield Ok(Event::default().event("connected").data("{}"));

        loop {
            match rx.recv().await {
                Ok(record) => {
                    if let Some(event) = sse_event(&record) {
                        yield Ok(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "SSE client lagged, some events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    break;
                }
            }
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    )
}

fn sse_event(record: &EventRecord) -> Option<Event> {
    match serde_json::to_string(record) {
        Ok(json) => Some(Event::default().event(record.kind.as_str()).data(json)),
        Err(err) => {
            warn!(event_id = %record.id, error = %err, "failed to encode event for SSE");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use orchestrator::io::store::StoreHealth;
    use orchestrator::test_support::{intake_request, memory_orchestrator};

    use super::*;

    #[test]
    fn recorded_events_reach_subscribers_in_order() {
        let state = AppState::new(memory_orchestrator(), StoreHealth::Healthy);
        let mut rx = state.event_tx.subscribe();

        let outcome = state
            .orchestrator
            .intake(&intake_request("Portal", Some("design")))
            .expect("intake");

        let mut kinds = Vec::new();
        while let Ok(record) = rx.try_recv() {
            assert_eq!(record.project_id.as_deref(), Some(outcome.project_id.as_str()));
            kinds.push(record.kind.as_str());
        }
        assert_eq!(kinds, vec!["intake", "classification"]);
    }

    #[test]
    fn recording_without_subscribers_succeeds() {
        let state = AppState::new(memory_orchestrator(), StoreHealth::Healthy);
        state
            .orchestrator
            .intake(&intake_request("Portal", None))
            .expect("intake");
    }
}
