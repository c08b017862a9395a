//! Three-point task estimation.

use std::collections::HashSet;

use anyhow::{Result, bail};
use serde_json::{Map, Value};

use super::Agent;
use crate::core::plan::{PlanEstimate, TaskEstimate, WorkPlan};
use crate::core::types::AgentKind;

const FALLBACK_ROLE: &str = "full-stack";

pub struct EstimateAgent;

impl Agent for EstimateAgent {
    type Input = WorkPlan;
    type Output = PlanEstimate;

    const KIND: AgentKind = AgentKind::Estimate;
    const OUTPUT_SCHEMA: &'static str = include_str!("../../schemas/estimate_output.schema.json");
    const PROMPT: &'static str = include_str!("prompts/estimate.md");

    fn prompt_vars(plan: &WorkPlan) -> Map<String, Value> {
        let mut vars = Map::new();
        vars.insert("task_count".to_string(), Value::from(plan.tasks().count()));
        vars
    }

    fn validate(plan: &WorkPlan, output: &PlanEstimate) -> Result<()> {
        let known: HashSet<&str> = plan.tasks().map(|task| task.id.as_str()).collect();
        for estimate in &output.tasks {
            if !known.contains(estimate.task_id.as_str()) {
                bail!("estimate for unknown task '{}'", estimate.task_id);
            }
            if !(estimate.optimistic_hours <= estimate.likely_hours
                && estimate.likely_hours <= estimate.pessimistic_hours)
            {
                bail!(
                    "task '{}' hours not ordered: {} / {} / {}",
                    estimate.task_id,
                    estimate.optimistic_hours,
                    estimate.likely_hours,
                    estimate.pessimistic_hours
                );
            }
            if !(0.0..=1.0).contains(&estimate.confidence) {
                bail!("task '{}' confidence outside 0..=1", estimate.task_id);
            }
        }
        Ok(())
    }

    fn fallback(plan: &WorkPlan) -> PlanEstimate {
        let tasks: Vec<TaskEstimate> = plan
            .tasks()
            .map(|task| TaskEstimate {
                task_id: task.id.clone(),
                role: FALLBACK_ROLE.to_string(),
                optimistic_hours: 4.0,
                likely_hours: 8.0,
                pessimistic_hours: 12.0,
                confidence: 0.5,
            })
            .collect();
        let total = tasks.iter().map(|estimate| estimate.likely_hours).sum();
        PlanEstimate {
            total_likely_hours: Some(total),
            total_cost: None,
            assumptions: vec!["LLM disabled — heuristic estimates only".to_string()],
            tasks,
        }
    }
}
