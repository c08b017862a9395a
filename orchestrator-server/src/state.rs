//! Shared application state for the orchestrator server.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use orchestrator::Orchestrator;
use orchestrator::io::config::OrchestratorConfig;
use orchestrator::io::store::StoreHealth;
use orchestrator::model::EventRecord;
use tokio::sync::broadcast;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Shared state accessible from all request handlers.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    /// Fixed when the store was opened at startup.
    pub health: StoreHealth,
    /// Every event the orchestrator records, for SSE clients.
    pub event_tx: Arc<broadcast::Sender<EventRecord>>,
}

impl AppState {
    /// Wrap `orchestrator`, forwarding its recorded events to `event_tx`.
    pub fn new(orchestrator: Orchestrator, health: StoreHealth) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let event_tx = Arc::new(event_tx);
        let sink_tx = Arc::clone(&event_tx);
        let orchestrator = orchestrator.with_event_sink(Arc::new(move |event: &EventRecord| {
            // No subscribers is not an error.
            let _ = sink_tx.send(event.clone());
        }));
        Self {
            orchestrator: Arc::new(orchestrator),
            health,
            event_tx,
        }
    }

    /// Open the store and agent backend on the blocking pool and wrap them.
    pub async fn open(root: PathBuf, config: OrchestratorConfig) -> Result<Self> {
        let (orchestrator, health) =
            tokio::task::spawn_blocking(move || Orchestrator::from_config(&root, &config))
                .await
                .context("open orchestrator task")??;
        Ok(Self::new(orchestrator, health))
    }

    /// Drop this handle on the blocking pool. Backends may hold blocking
    /// clients that panic when dropped on an executor thread.
    pub async fn close(self) {
        if let Err(err) = tokio::task::spawn_blocking(move || drop(self)).await {
            tracing::warn!(error = %err, "failed to release orchestrator");
        }
    }
}
