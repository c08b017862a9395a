//! CI and deploy-preview status callbacks.
//!
//! Each delivery resolves run → task → project, updates the run and appends
//! a `run_update` event carrying the raw payload. Deliveries for unknown runs
//! are still recorded (without a project) before failing with
//! [`MissingRecord`].

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::context::Orchestrator;
use crate::core::types::{EventKind, RunState, TaskStatus};
use crate::error::MissingRecord;
use crate::io::store::RunPatch;
use crate::ledger::RunChain;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CiStatus {
    Queued,
    Running,
    Passed,
    Failed,
}

impl CiStatus {
    fn run_state(self) -> RunState {
        match self {
            CiStatus::Queued => RunState::Queued,
            CiStatus::Running => RunState::Running,
            CiStatus::Passed => RunState::Passed,
            CiStatus::Failed => RunState::Failed,
        }
    }

    fn task_status(self) -> Option<TaskStatus> {
        match self {
            CiStatus::Passed => Some(TaskStatus::Review),
            CiStatus::Failed => Some(TaskStatus::Blocked),
            CiStatus::Queued | CiStatus::Running => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CiWebhook {
    pub run_id: String,
    pub status: CiStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ci_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logs: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PreviewStatus {
    Ready,
    Building,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewWebhook {
    pub run_id: String,
    pub preview_url: String,
    pub status: PreviewStatus,
}

/// What a delivery changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookReceipt {
    pub run_id: String,
    pub project_id: Option<String>,
    /// New task status, when the delivery moved the task.
    pub task_status: Option<TaskStatus>,
}

impl Orchestrator {
    #[instrument(skip_all, fields(run_id = %payload.run_id, status = ?payload.status))]
    pub fn ingest_ci(&self, payload: &CiWebhook) -> Result<WebhookReceipt> {
        let chain = self.resolve_for_delivery(&payload.run_id, payload)?;

        let patch = RunPatch {
            state: Some(payload.status.run_state()),
            ci_url: payload.ci_url.clone(),
            logs: payload.logs.clone(),
            preview_url: payload.preview_url.clone(),
            ..RunPatch::default()
        };
        self.store
            .update_run(&payload.run_id, &patch, Utc::now())
            .with_context(|| format!("apply ci status to run {}", payload.run_id))?;

        let task_status = match (&chain.task, payload.status.task_status()) {
            (Some(task), Some(status)) => {
                self.store
                    .update_task_status(&task.id, status, Utc::now())
                    .with_context(|| format!("move task {} to {status}", task.id))?;
                Some(status)
            }
            _ => None,
        };

        self.record_event(
            chain.project_id(),
            EventKind::RunUpdate,
            serde_json::to_value(payload)?,
        )?;
        info!(task_status = ?task_status, "ci delivery applied");
        Ok(WebhookReceipt {
            run_id: payload.run_id.clone(),
            project_id: chain.project_id().map(str::to_string),
            task_status,
        })
    }

    /// Record a preview URL. Run state and task status are left alone.
    #[instrument(skip_all, fields(run_id = %payload.run_id, status = ?payload.status))]
    pub fn ingest_preview(&self, payload: &PreviewWebhook) -> Result<WebhookReceipt> {
        let chain = self.resolve_for_delivery(&payload.run_id, payload)?;

        let patch = RunPatch {
            preview_url: Some(payload.preview_url.clone()),
            ..RunPatch::default()
        };
        self.store
            .update_run(&payload.run_id, &patch, Utc::now())
            .with_context(|| format!("apply preview to run {}", payload.run_id))?;

        self.record_event(
            chain.project_id(),
            EventKind::RunUpdate,
            serde_json::to_value(payload)?,
        )?;
        Ok(WebhookReceipt {
            run_id: payload.run_id.clone(),
            project_id: chain.project_id().map(str::to_string),
            task_status: None,
        })
    }

    fn resolve_for_delivery<P: Serialize>(&self, run_id: &str, payload: &P) -> Result<RunChain> {
        match self.resolve_run_chain(run_id) {
            Ok(chain) => Ok(chain),
            Err(err) if err.downcast_ref::<MissingRecord>().is_some() => {
                self.record_event(None, EventKind::RunUpdate, serde_json::to_value(payload)?)?;
                Err(err)
            }
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::ledger::RunMetadata;
    use crate::test_support::{memory_orchestrator, task_record};

    fn running_task(orchestrator: &Orchestrator) -> String {
        let mut task = task_record("p1/t1", "p1");
        task.status = TaskStatus::InProgress;
        orchestrator.store().insert_tasks(&[task]).expect("task");
        orchestrator
            .start_run("p1/t1", RunMetadata::default())
            .expect("run")
            .id
    }

    fn ci(run_id: &str, status: CiStatus) -> CiWebhook {
        CiWebhook {
            run_id: run_id.to_string(),
            status,
            ci_url: None,
            logs: None,
            preview_url: None,
        }
    }

    #[test]
    fn payload_parses_camel_case() {
        let payload: CiWebhook = serde_json::from_value(json!({
            "runId": "r1",
            "status": "passed",
            "ciUrl": "https://ci.example/1"
        }))
        .expect("parse");
        assert_eq!(payload.status, CiStatus::Passed);
        assert_eq!(payload.ci_url.as_deref(), Some("https://ci.example/1"));
        assert!(serde_json::from_value::<CiWebhook>(json!({"runId": "r1", "status": "exploded"})).is_err());
    }

    #[test]
    fn passed_moves_task_to_review() {
        let orchestrator = memory_orchestrator();
        let run_id = running_task(&orchestrator);
        let mut payload = ci(&run_id, CiStatus::Passed);
        payload.ci_url = Some("https://ci.example/7".to_string());

        let receipt = orchestrator.ingest_ci(&payload).expect("ingest");
        assert_eq!(receipt.task_status, Some(TaskStatus::Review));
        assert_eq!(receipt.project_id.as_deref(), Some("p1"));

        let run = orchestrator.store().get_run(&run_id).expect("get").expect("run");
        assert_eq!(run.state, RunState::Passed);
        assert_eq!(run.ci_url.as_deref(), Some("https://ci.example/7"));
        let task = orchestrator.store().get_task("p1/t1").expect("get").expect("task");
        assert_eq!(task.status, TaskStatus::Review);

        let events = orchestrator.recent_events(Some("p1"), 10).expect("events");
        assert_eq!(events[0].kind, EventKind::RunUpdate);
        assert_eq!(events[0].payload["status"], "passed");
    }

    #[test]
    fn failed_blocks_task() {
        let orchestrator = memory_orchestrator();
        let run_id = running_task(&orchestrator);
        let mut payload = ci(&run_id, CiStatus::Failed);
        payload.logs = Some("FAIL a.spec".to_string());
        orchestrator.ingest_ci(&payload).expect("ingest");

        let task = orchestrator.store().get_task("p1/t1").expect("get").expect("task");
        assert_eq!(task.status, TaskStatus::Blocked);
        let run = orchestrator.store().get_run(&run_id).expect("get").expect("run");
        assert_eq!(run.logs.as_deref(), Some("FAIL a.spec"));
    }

    #[test]
    fn running_leaves_task_alone() {
        let orchestrator = memory_orchestrator();
        let run_id = running_task(&orchestrator);
        let receipt = orchestrator
            .ingest_ci(&ci(&run_id, CiStatus::Running))
            .expect("ingest");
        assert_eq!(receipt.task_status, None);
        let task = orchestrator.store().get_task("p1/t1").expect("get").expect("task");
        assert_eq!(task.status, TaskStatus::InProgress);
    }

    #[test]
    fn preview_only_sets_url() {
        let orchestrator = memory_orchestrator();
        let run_id = running_task(&orchestrator);
        let receipt = orchestrator
            .ingest_preview(&PreviewWebhook {
                run_id: run_id.clone(),
                preview_url: "https://preview.example/abc".to_string(),
                status: PreviewStatus::Ready,
            })
            .expect("ingest");
        assert_eq!(receipt.task_status, None);

        let run = orchestrator.store().get_run(&run_id).expect("get").expect("run");
        assert_eq!(run.state, RunState::Queued);
        assert_eq!(run.preview_url.as_deref(), Some("https://preview.example/abc"));
        let task = orchestrator.store().get_task("p1/t1").expect("get").expect("task");
        assert_eq!(task.status, TaskStatus::InProgress);
        assert_eq!(orchestrator.recent_events(Some("p1"), 10).expect("events").len(), 1);
    }

    #[test]
    fn unknown_run_is_recorded_then_rejected() {
        let orchestrator = memory_orchestrator();
        let err = orchestrator
            .ingest_ci(&ci("ghost", CiStatus::Passed))
            .unwrap_err();
        assert!(err.downcast_ref::<MissingRecord>().is_some());

        let events = orchestrator.recent_events(None, 10).expect("events");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].project_id, None);
        assert_eq!(events[0].payload["runId"], "ghost");
    }
}
