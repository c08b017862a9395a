//! Intake: turn a raw submission into a project with a brief.

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, instrument, warn};

use crate::agents::brief::BriefAgent;
use crate::context::Orchestrator;
use crate::core::brief::{IntakeRequest, ProjectBrief};
use crate::core::types::{EventKind, Stage};
use crate::error::InvalidInput;
use crate::model::{BriefRecord, DEFAULT_PRIORITY, ProjectRecord, new_id};
use crate::step::StepResult;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntakeOutcome {
    pub project_id: String,
    pub brief: ProjectBrief,
    /// Result of the step run right after intake.
    pub next: StepResult,
}

impl Orchestrator {
    /// Create a project and its first brief, then step it once.
    ///
    /// If the brief cannot be stored the freshly inserted project is deleted
    /// again before the error is returned.
    #[instrument(skip_all, fields(title = %request.title))]
    pub fn intake(&self, request: &IntakeRequest) -> Result<IntakeOutcome> {
        validate_request(request)?;

        let mut brief = self.gateway.invoke::<BriefAgent>(request);
        let project_id = new_id();
        brief.project_id = Some(project_id.clone());

        let now = Utc::now();
        let title = if brief.title.trim().is_empty() {
            request.title.trim().to_string()
        } else {
            brief.title.clone()
        };
        let project = ProjectRecord {
            id: project_id.clone(),
            title,
            owner: request.owner.clone(),
            stage: Stage::Intake.as_str().to_string(),
            project_type: brief.category_guess.clone(),
            priority: DEFAULT_PRIORITY,
            due_date: request.due_date.clone(),
            created_at: now,
            updated_at: now,
        };
        self.store
            .insert_project(&project)
            .context("insert intake project")?;

        let record = BriefRecord {
            id: new_id(),
            project_id: project_id.clone(),
            summary: brief.summary.clone(),
            scope: brief.scope.clone(),
            constraints: brief.constraints.clone(),
            success_criteria: brief.success_criteria.clone(),
            category_guess: brief.category_guess.clone(),
            clarifying_questions: brief.clarifying_questions.clone(),
            attachments: brief.attachments.clone(),
            created_at: now,
        };
        if let Err(err) = self.store.insert_brief(&record) {
            if let Err(rollback) = self.store.delete_project(&project_id) {
                warn!(%project_id, err = %format!("{rollback:#}"), "intake rollback failed");
            }
            return Err(err.context("insert intake brief"));
        }

        self.record_event(
            Some(&project_id),
            EventKind::Intake,
            json!({ "brief": brief, "clarifyingQuestions": brief.clarifying_questions }),
        )?;
        info!(%project_id, "project created");

        let next = self.step(&project_id)?;
        Ok(IntakeOutcome {
            project_id,
            brief,
            next,
        })
    }
}

fn validate_request(request: &IntakeRequest) -> Result<(), InvalidInput> {
    if request.title.trim().is_empty() {
        return Err(InvalidInput::new("title must not be empty"));
    }
    if request.description.trim().is_empty() {
        return Err(InvalidInput::new("description must not be empty"));
    }
    Ok(())
}
