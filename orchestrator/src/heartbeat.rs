//! Advance a bounded batch of active projects.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::context::Orchestrator;
use crate::core::types::Stage;
use crate::step::StepResult;

/// Outcome for one project in a heartbeat batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged, rename_all_fields = "camelCase")]
pub enum HeartbeatEntry {
    Failed {
        project_id: String,
        stage: String,
        error: String,
    },
    Stepped(StepResult),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatReport {
    pub results: Vec<HeartbeatEntry>,
}

impl HeartbeatReport {
    pub fn failures(&self) -> usize {
        self.results
            .iter()
            .filter(|entry| matches!(entry, HeartbeatEntry::Failed { .. }))
            .count()
    }
}

impl Orchestrator {
    /// Step up to `limit` active projects, oldest first.
    ///
    /// `None` uses the configured batch size. A failing project is reported
    /// in the result list and the batch continues.
    pub fn advance_active(&self, limit: Option<usize>) -> Result<HeartbeatReport> {
        let limit = limit.unwrap_or(self.settings.heartbeat_batch);
        let stages: Vec<&str> = Stage::ACTIVE.iter().map(Stage::as_str).collect();
        let projects = self
            .store
            .list_projects_by_stage(&stages, limit)
            .context("list active projects")?;

        let mut report = HeartbeatReport::default();
        for project in projects {
            match self.step(&project.id) {
                Ok(result) => report.results.push(HeartbeatEntry::Stepped(result)),
                Err(err) => {
                    let error = format!("{err:#}");
                    warn!(project_id = %project.id, %error, "heartbeat step failed");
                    report.results.push(HeartbeatEntry::Failed {
                        project_id: project.id,
                        stage: project.stage,
                        error,
                    });
                }
            }
        }
        info!(
            stepped = report.results.len(),
            failed = report.failures(),
            "heartbeat finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::*;
    use crate::test_support::{memory_orchestrator, project_record, seed_project};

    #[test]
    fn batch_is_capped_and_skips_inactive_projects() {
        let orchestrator = memory_orchestrator();
        for idx in 0..4 {
            seed_project(&orchestrator, &format!("p{idx}"), "intake", None);
        }
        orchestrator
            .store()
            .insert_project(&project_record("done", "done"))
            .expect("insert");

        let report = orchestrator.advance_active(Some(3)).expect("heartbeat");
        assert_eq!(report.results.len(), 3);
        assert_eq!(report.failures(), 0);
    }

    #[test]
    fn failing_project_does_not_stop_the_batch() {
        let orchestrator = memory_orchestrator();
        let mut broken = project_record("broken", "planning");
        broken.created_at = Utc::now() - Duration::seconds(60);
        orchestrator.store().insert_project(&broken).expect("insert");
        seed_project(&orchestrator, "ok", "intake", Some("research"));

        let report = orchestrator.advance_active(None).expect("heartbeat");
        assert_eq!(report.results.len(), 2);
        assert_eq!(report.failures(), 1);
        match &report.results[0] {
            HeartbeatEntry::Failed {
                project_id, error, ..
            } => {
                assert_eq!(project_id, "broken");
                assert!(error.contains("brief not found"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
        match &report.results[1] {
            HeartbeatEntry::Stepped(result) => assert_eq!(result.stage, "planning"),
            other => panic!("expected step, got {other:?}"),
        }
    }

    #[test]
    fn failed_entries_serialize_flat() {
        let entry = HeartbeatEntry::Failed {
            project_id: "p1".to_string(),
            stage: "planning".to_string(),
            error: "brief not found: p1".to_string(),
        };
        let value = serde_json::to_value(&entry).expect("serialize");
        assert_eq!(value["projectId"], "p1");
        assert_eq!(value["error"], "brief not found: p1");
    }
}
