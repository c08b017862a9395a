//! Work plan and estimate shapes shared by the planning and estimation stages.

use serde::{Deserialize, Serialize};

/// A measurable acceptance criterion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptanceTest {
    pub id: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Timeline {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanTask {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub acceptance: Vec<AcceptanceTest>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeline: Option<Timeline>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Milestone {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    pub tasks: Vec<PlanTask>,
}

/// Milestones, tasks and project-level acceptance produced from a brief.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkPlan {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    pub milestones: Vec<Milestone>,
    #[serde(default)]
    pub risks: Vec<String>,
    #[serde(default)]
    pub acceptance: Vec<AcceptanceTest>,
    #[serde(default)]
    pub success_metrics: Vec<String>,
}

impl WorkPlan {
    /// All plan tasks in milestone order.
    pub fn tasks(&self) -> impl Iterator<Item = &PlanTask> {
        self.milestones
            .iter()
            .flat_map(|milestone| milestone.tasks.iter())
    }
}

/// Three-point estimate for one plan task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskEstimate {
    pub task_id: String,
    pub role: String,
    pub optimistic_hours: f64,
    pub likely_hours: f64,
    pub pessimistic_hours: f64,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanEstimate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_likely_hours: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_cost: Option<f64>,
    #[serde(default)]
    pub assumptions: Vec<String>,
    pub tasks: Vec<TaskEstimate>,
}

impl PlanEstimate {
    pub fn for_task(&self, task_id: &str) -> Option<&TaskEstimate> {
        self.tasks.iter().find(|estimate| estimate.task_id == task_id)
    }
}
