//! Orchestration for a single `step(project_id)`.
//!
//! The machine is pull-based: each call performs at most one stage's worth of
//! work and returns. Every state-changing path appends an event; the idle
//! paths (review/done/blocked, unknown stages, no tasks, waiting for CI)
//! write nothing.

use std::collections::HashSet;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, instrument};

use crate::agents::classify::ClassifyAgent;
use crate::agents::estimate::EstimateAgent;
use crate::agents::plan::PlanAgent;
use crate::context::Orchestrator;
use crate::core::brief::ProjectBrief;
use crate::core::seeding::seed_tasks;
use crate::core::selector::{ExecutingDecision, decide_executing, sort_tasks};
use crate::core::types::{EventKind, Stage, StepAction, TaskStatus};
use crate::error::MissingRecord;
use crate::io::store::ProjectPatch;
use crate::ledger::RunMetadata;
use crate::model::{PlanRecord, ProjectRecord, new_id};

const NOTE_EXHAUSTED: &str = "Repair attempts exhausted";

/// Summary of one step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepResult {
    pub project_id: String,
    /// Stage after the step.
    pub stage: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<StepAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl StepResult {
    fn acted(project_id: &str, stage: Stage, action: StepAction) -> Self {
        Self {
            project_id: project_id.to_string(),
            stage: stage.as_str().to_string(),
            action: Some(action),
            notes: None,
        }
    }

    fn idle(project_id: &str, stage: &str, notes: Option<&str>) -> Self {
        Self {
            project_id: project_id.to_string(),
            stage: stage.to_string(),
            action: None,
            notes: notes.map(str::to_string),
        }
    }

    fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    /// The step stopped on a blocked task that ran out of repair attempts.
    pub fn is_exhausted(&self) -> bool {
        self.action.is_none() && self.notes.as_deref() == Some(NOTE_EXHAUSTED)
    }
}

impl Orchestrator {
    /// Advance `project_id` by at most one stage.
    ///
    /// Fails with [`MissingRecord`] when the project, or the brief/plan the
    /// current stage needs, does not exist.
    #[instrument(skip(self))]
    pub fn step(&self, project_id: &str) -> Result<StepResult> {
        let project = self.load_project(project_id)?;
        let result = match project.stage() {
            Some(Stage::Intake) => self.classify_stage(&project)?,
            Some(Stage::Planning) => self.planning_stage(&project)?,
            Some(Stage::Estimated) => self.estimation_stage(&project)?,
            Some(Stage::Executing) => self.executing_stage(&project)?,
            Some(Stage::Review | Stage::Done | Stage::Blocked) => {
                StepResult::idle(&project.id, &project.stage, None)
            }
            None => StepResult::idle(&project.id, &project.stage, Some("Unknown status")),
        };
        info!(
            stage = %result.stage,
            action = ?result.action,
            notes = result.notes.as_deref().unwrap_or(""),
            "step finished"
        );
        Ok(result)
    }

    pub(crate) fn load_project(&self, project_id: &str) -> Result<ProjectRecord> {
        let project = self
            .store
            .get_project(project_id)
            .with_context(|| format!("load project {project_id}"))?
            .ok_or_else(|| MissingRecord::new("project", project_id))?;
        Ok(project)
    }

    fn latest_brief(&self, project: &ProjectRecord) -> Result<ProjectBrief> {
        let record = self
            .store
            .latest_brief(&project.id)
            .with_context(|| format!("load brief for {}", project.id))?
            .ok_or_else(|| MissingRecord::new("brief", project.id.as_str()))?;
        Ok(record.to_brief(project))
    }

    fn latest_plan(&self, project: &ProjectRecord) -> Result<PlanRecord> {
        let plan = self
            .store
            .latest_plan(&project.id)
            .with_context(|| format!("load plan for {}", project.id))?
            .ok_or_else(|| MissingRecord::new("plan", project.id.as_str()))?;
        Ok(plan)
    }

    fn set_stage(&self, project_id: &str, stage: Stage, project_type: Option<String>) -> Result<()> {
        let patch = ProjectPatch {
            stage: Some(stage.as_str().to_string()),
            project_type,
        };
        self.store
            .update_project(project_id, &patch, Utc::now())
            .with_context(|| format!("move project {project_id} to {stage}"))
    }

    fn classify_stage(&self, project: &ProjectRecord) -> Result<StepResult> {
        let brief = self.latest_brief(project)?;
        let classification = self.gateway.invoke::<ClassifyAgent>(&brief);

        self.set_stage(&project.id, Stage::Planning, Some(classification.primary.clone()))?;
        self.record_event(
            Some(&project.id),
            EventKind::Classification,
            serde_json::to_value(&classification)?,
        )?;

        Ok(
            StepResult::acted(&project.id, Stage::Planning, StepAction::Classification)
                .with_notes(format!("Classified as {}", classification.primary)),
        )
    }

    fn planning_stage(&self, project: &ProjectRecord) -> Result<StepResult> {
        let brief = self.latest_brief(project)?;
        let plan = self.gateway.invoke::<PlanAgent>(&brief);

        let record = PlanRecord::from_work_plan(new_id(), &project.id, &plan, Utc::now());
        self.store
            .insert_plan(&record)
            .with_context(|| format!("insert plan for {}", project.id))?;
        self.set_stage(&project.id, Stage::Estimated, None)?;
        self.record_event(
            Some(&project.id),
            EventKind::Planning,
            serde_json::to_value(&plan)?,
        )?;

        Ok(StepResult::acted(&project.id, Stage::Estimated, StepAction::Planning))
    }

    fn estimation_stage(&self, project: &ProjectRecord) -> Result<StepResult> {
        let plan_record = self.latest_plan(project)?;
        let plan = plan_record.work_plan();
        let estimates = self.gateway.invoke::<EstimateAgent>(&plan);

        let now = Utc::now();
        self.store
            .set_plan_estimates(&plan_record.id, &estimates, now)
            .with_context(|| format!("attach estimates to plan {}", plan_record.id))?;

        let existing: HashSet<String> = self
            .store
            .list_tasks(&project.id)?
            .into_iter()
            .map(|task| task.id)
            .collect();
        let rows = seed_tasks(&project.id, &plan, &estimates, &existing, now);
        let inserted = self
            .store
            .insert_tasks(&rows)
            .with_context(|| format!("seed tasks for {}", project.id))?;
        if inserted > 0 {
            self.record_event(
                Some(&project.id),
                EventKind::TaskUpdate,
                json!({ "inserted": inserted }),
            )?;
        }

        self.set_stage(&project.id, Stage::Executing, None)?;
        self.record_event(
            Some(&project.id),
            EventKind::Estimate,
            serde_json::to_value(&estimates)?,
        )?;

        Ok(StepResult::acted(&project.id, Stage::Executing, StepAction::Estimation))
    }

    fn executing_stage(&self, project: &ProjectRecord) -> Result<StepResult> {
        let mut tasks = self.store.list_tasks(&project.id)?;
        sort_tasks(&mut tasks);
        let decision = decide_executing(&tasks, |task| self.attempts_exhausted(&task.id))?;

        let executing = Stage::Executing.as_str();
        match decision {
            ExecutingDecision::NoTasks => Ok(StepResult::idle(
                &project.id,
                executing,
                Some("No tasks to execute"),
            )),
            ExecutingDecision::StartRun(task) => {
                let run = self.start_run(&task.id, RunMetadata::default())?;
                self.store
                    .update_task_status(&task.id, TaskStatus::InProgress, Utc::now())
                    .with_context(|| format!("mark task {} in progress", task.id))?;
                self.record_event(
                    Some(&project.id),
                    EventKind::RunUpdate,
                    json!({ "runId": run.id, "taskId": task.id, "state": run.state }),
                )?;
                Ok(
                    StepResult::acted(&project.id, Stage::Executing, StepAction::RunStarted)
                        .with_notes(format!(
                            "Started attempt #{} for task {}",
                            run.attempt, task.title
                        )),
                )
            }
            ExecutingDecision::RepairExhausted(task) => {
                self.record_event(
                    Some(&project.id),
                    EventKind::Repair,
                    json!({ "taskId": task.id, "reason": "Attempts exhausted" }),
                )?;
                Ok(StepResult::idle(&project.id, executing, Some(NOTE_EXHAUSTED)))
            }
            ExecutingDecision::AllComplete => {
                self.set_stage(&project.id, Stage::Review, None)?;
                self.record_event(
                    Some(&project.id),
                    EventKind::Tracker,
                    json!({ "status": Stage::Review }),
                )?;
                Ok(StepResult::acted(&project.id, Stage::Review, StepAction::CompletedTasks))
            }
            ExecutingDecision::WaitingForCi => Ok(StepResult::idle(
                &project.id,
                executing,
                Some("Waiting for CI"),
            )),
        }
    }
}
