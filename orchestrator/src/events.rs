//! Append-only audit trail.

use anyhow::{Context, Result};
use chrono::Utc;
use serde_json::Value;
use tracing::debug;

use crate::context::Orchestrator;
use crate::core::types::EventKind;
use crate::model::{EventRecord, new_id};

impl Orchestrator {
    /// Append one event and notify the sink, if any.
    pub fn record_event(
        &self,
        project_id: Option<&str>,
        kind: EventKind,
        payload: Value,
    ) -> Result<EventRecord> {
        let event = EventRecord {
            id: new_id(),
            project_id: project_id.map(str::to_string),
            kind,
            payload,
            created_at: Utc::now(),
        };
        self.store
            .append_event(&event)
            .with_context(|| format!("append {} event", kind.as_str()))?;
        debug!(kind = kind.as_str(), project_id, "event recorded");
        if let Some(sink) = &self.sink {
            sink(&event);
        }
        Ok(event)
    }

    /// Newest first.
    pub fn recent_events(&self, project_id: Option<&str>, limit: usize) -> Result<Vec<EventRecord>> {
        self.store.list_events(project_id, limit)
    }
}
