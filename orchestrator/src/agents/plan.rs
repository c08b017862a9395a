//! Work plan generation from a brief.

use std::collections::HashSet;

use anyhow::{Result, bail};

use super::Agent;
use crate::core::brief::ProjectBrief;
use crate::core::plan::{AcceptanceTest, Milestone, PlanTask, WorkPlan};
use crate::core::types::AgentKind;

pub struct PlanAgent;

impl Agent for PlanAgent {
    type Input = ProjectBrief;
    type Output = WorkPlan;

    const KIND: AgentKind = AgentKind::Plan;
    const OUTPUT_SCHEMA: &'static str = include_str!("../../schemas/plan_output.schema.json");
    const PROMPT: &'static str = include_str!("prompts/plan.md");

    /// Task ids must be unique across milestones and dependencies must name
    /// a task in the same plan.
    fn validate(_input: &ProjectBrief, plan: &WorkPlan) -> Result<()> {
        if plan.tasks().next().is_none() {
            bail!("plan has no tasks");
        }
        let mut ids = HashSet::new();
        for task in plan.tasks() {
            if !ids.insert(task.id.as_str()) {
                bail!("duplicate task id '{}'", task.id);
            }
        }
        for task in plan.tasks() {
            if let Some(dep) = task.dependencies.iter().find(|dep| !ids.contains(dep.as_str())) {
                bail!("task '{}' depends on unknown task '{dep}'", task.id);
            }
            if task.dependencies.iter().any(|dep| dep == &task.id) {
                bail!("task '{}' depends on itself", task.id);
            }
        }
        Ok(())
    }

    fn fallback(brief: &ProjectBrief) -> WorkPlan {
        WorkPlan {
            project_id: brief.project_id.clone(),
            milestones: vec![Milestone {
                id: "m1".to_string(),
                name: "Plan & Discover".to_string(),
                summary: Some("Lean milestone generated without LLM".to_string()),
                tasks: vec![
                    PlanTask {
                        id: "t1".to_string(),
                        title: "Draft detailed requirements".to_string(),
                        description: Some(
                            "Collaborate with stakeholders to refine goals and constraints."
                                .to_string(),
                        ),
                        acceptance: vec![AcceptanceTest {
                            id: "a1".to_string(),
                            description: "Requirements document shared and approved.".to_string(),
                            validation: None,
                        }],
                        dependencies: Vec::new(),
                        risk: None,
                        timeline: None,
                    },
                    PlanTask {
                        id: "t2".to_string(),
                        title: "Outline implementation plan".to_string(),
                        description: Some("Break down solution approach and tooling.".to_string()),
                        acceptance: vec![AcceptanceTest {
                            id: "a2".to_string(),
                            description: "Plan reviewed with delivery team.".to_string(),
                            validation: None,
                        }],
                        dependencies: vec!["t1".to_string()],
                        risk: None,
                        timeline: None,
                    },
                ],
            }],
            risks: vec!["LLM disabled — using heuristic plan".to_string()],
            acceptance: vec![AcceptanceTest {
                id: "pa1".to_string(),
                description: "Stakeholder sign-off on requirements".to_string(),
                validation: Some("Link to doc".to_string()),
            }],
            success_metrics: vec![
                "Plan approved".to_string(),
                "Tasks created in tracker".to_string(),
            ],
        }
    }
}
