//! Persisted records.
//!
//! One struct per store collection. Field names are the snake_case column
//! names; ids are UUID v4 strings except tasks, whose ids are derived from the
//! owning project and plan task (see [`crate::core::seeding::task_key`]).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::brief::{Attachment, ProjectBrief};
use crate::core::plan::{AcceptanceTest, Milestone, PlanEstimate, PlanTask, WorkPlan};
use crate::core::types::{EventKind, RunState, Stage, TaskStatus};

pub const DEFAULT_PRIORITY: i64 = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectRecord {
    pub id: String,
    pub title: String,
    pub owner: Option<String>,
    /// Raw stage string. Manual review statuses live here too, so this is not
    /// a [`Stage`].
    pub stage: String,
    pub project_type: Option<String>,
    pub priority: i64,
    pub due_date: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProjectRecord {
    pub fn stage(&self) -> Option<Stage> {
        Stage::parse(&self.stage)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BriefRecord {
    pub id: String,
    pub project_id: String,
    pub summary: String,
    pub scope: Vec<String>,
    pub constraints: Vec<String>,
    pub success_criteria: Vec<String>,
    pub category_guess: Option<String>,
    pub clarifying_questions: Vec<String>,
    pub attachments: Vec<Attachment>,
    pub created_at: DateTime<Utc>,
}

impl BriefRecord {
    /// Rebuild the agent-facing brief. The project's classified type takes
    /// precedence over the intake-time category guess.
    pub fn to_brief(&self, project: &ProjectRecord) -> ProjectBrief {
        ProjectBrief {
            project_id: Some(project.id.clone()),
            title: project.title.clone(),
            summary: self.summary.clone(),
            scope: self.scope.clone(),
            constraints: self.constraints.clone(),
            success_criteria: self.success_criteria.clone(),
            category_guess: project
                .project_type
                .clone()
                .or_else(|| self.category_guess.clone()),
            clarifying_questions: self.clarifying_questions.clone(),
            attachments: self.attachments.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanRecord {
    pub id: String,
    pub project_id: String,
    pub milestones: Vec<Milestone>,
    /// Flattened milestone tasks, kept alongside for tracker queries.
    pub tasks: Vec<PlanTask>,
    pub risks: Vec<String>,
    pub acceptance: Vec<AcceptanceTest>,
    pub success_metrics: Vec<String>,
    pub estimates: Option<PlanEstimate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PlanRecord {
    pub fn from_work_plan(id: String, project_id: &str, plan: &WorkPlan, now: DateTime<Utc>) -> Self {
        Self {
            id,
            project_id: project_id.to_string(),
            milestones: plan.milestones.clone(),
            tasks: plan.tasks().cloned().collect(),
            risks: plan.risks.clone(),
            acceptance: plan.acceptance.clone(),
            success_metrics: plan.success_metrics.clone(),
            estimates: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn work_plan(&self) -> WorkPlan {
        WorkPlan {
            project_id: Some(self.project_id.clone()),
            milestones: self.milestones.clone(),
            risks: self.risks.clone(),
            acceptance: self.acceptance.clone(),
            success_metrics: self.success_metrics.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: String,
    pub project_id: String,
    pub plan_task_id: String,
    pub title: String,
    pub description: Option<String>,
    pub status: TaskStatus,
    pub assignee: Option<String>,
    pub labels: Vec<String>,
    pub estimate_hours: Option<f64>,
    pub depends_on: Vec<String>,
    pub acceptance: Vec<AcceptanceTest>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: String,
    pub task_id: String,
    pub state: RunState,
    pub attempt: u32,
    pub branch: Option<String>,
    pub ci_url: Option<String>,
    pub preview_url: Option<String>,
    pub logs: Option<String>,
    pub result: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Append-only audit row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: String,
    pub project_id: Option<String>,
    pub kind: EventKind,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
}

pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
