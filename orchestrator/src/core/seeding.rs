//! Materialize plan tasks into tracker tasks.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Duration, Utc};

use crate::core::plan::{PlanEstimate, TaskEstimate, WorkPlan};
use crate::core::types::TaskStatus;
use crate::model::TaskRecord;

/// Tracker id for a plan task within a project.
pub fn task_key(project_id: &str, plan_task_id: &str) -> String {
    format!("{project_id}/{plan_task_id}")
}

/// Build the tracker rows that are not yet present for a project.
///
/// Rows keep plan order, and their `created_at` values step by one
/// nanosecond from `now` so (created_at, id) ordering matches it too. Tasks
/// whose derived id is already in `existing_ids` are skipped, so seeding the
/// same plan twice inserts nothing the second time. Duplicate plan task ids within one plan collapse to the first.
pub fn seed_tasks(
    project_id: &str,
    plan: &WorkPlan,
    estimates: &PlanEstimate,
    existing_ids: &HashSet<String>,
    now: DateTime<Utc>,
) -> Vec<TaskRecord> {
    let by_task: HashMap<&str, &TaskEstimate> = estimates
        .tasks
        .iter()
        .map(|estimate| (estimate.task_id.as_str(), estimate))
        .collect();

    let mut seen = HashSet::new();
    let mut rows = Vec::new();
    for task in plan.tasks() {
        let id = task_key(project_id, &task.id);
        if existing_ids.contains(&id) || !seen.insert(id.clone()) {
            continue;
        }
        let created_at = now + Duration::nanoseconds(rows.len() as i64);
        rows.push(TaskRecord {
            id,
            project_id: project_id.to_string(),
            plan_task_id: task.id.clone(),
            title: task.title.clone(),
            description: task.description.clone(),
            status: TaskStatus::Backlog,
            assignee: None,
            labels: Vec::new(),
            estimate_hours: by_task.get(task.id.as_str()).map(|e| e.likely_hours),
            depends_on: task
                .dependencies
                .iter()
                .map(|dep| task_key(project_id, dep))
                .collect(),
            acceptance: task.acceptance.clone(),
            created_at,
            updated_at: created_at,
        });
    }
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::plan::{Milestone, PlanTask};

    fn plan_task(id: &str, deps: &[&str]) -> PlanTask {
        PlanTask {
            id: id.to_string(),
            title: format!("Task {id}"),
            description: None,
            acceptance: Vec::new(),
            dependencies: deps.iter().map(|d| d.to_string()).collect(),
            risk: None,
            timeline: None,
        }
    }

    fn plan() -> WorkPlan {
        WorkPlan {
            project_id: None,
            milestones: vec![Milestone {
                id: "m1".to_string(),
                name: "M".to_string(),
                summary: None,
                tasks: vec![plan_task("t1", &[]), plan_task("t2", &["t1"])],
            }],
            risks: Vec::new(),
            acceptance: Vec::new(),
            success_metrics: Vec::new(),
        }
    }

    fn estimates() -> PlanEstimate {
        PlanEstimate {
            total_likely_hours: Some(8.0),
            total_cost: None,
            assumptions: Vec::new(),
            tasks: vec![TaskEstimate {
                task_id: "t1".to_string(),
                role: "full-stack".to_string(),
                optimistic_hours: 4.0,
                likely_hours: 8.0,
                pessimistic_hours: 12.0,
                confidence: 0.5,
            }],
        }
    }

    #[test]
    fn seeds_backlog_rows_with_scoped_ids() {
        let rows = seed_tasks("p", &plan(), &estimates(), &HashSet::new(), Utc::now());
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].id, "p/t1");
        assert_eq!(rows[0].estimate_hours, Some(8.0));
        assert_eq!(rows[1].estimate_hours, None);
        assert_eq!(rows[1].depends_on, vec!["p/t1".to_string()]);
        assert!(rows.iter().all(|row| row.status == TaskStatus::Backlog));
    }

    #[test]
    fn creation_order_follows_plan_order_past_nine_tasks() {
        let mut plan = plan();
        plan.milestones[0].tasks = (1..=12)
            .map(|idx| plan_task(&format!("t{idx}"), &[]))
            .collect();
        let mut rows = seed_tasks("p", &plan, &estimates(), &HashSet::new(), Utc::now());
        crate::core::selector::sort_tasks(&mut rows);
        let ids: Vec<&str> = rows.iter().map(|row| row.plan_task_id.as_str()).collect();
        let expected: Vec<String> = (1..=12).map(|idx| format!("t{idx}")).collect();
        assert_eq!(ids, expected);
    }

    #[test]
    fn skips_rows_already_present() {
        let existing: HashSet<String> = ["p/t1".to_string()].into_iter().collect();
        let rows = seed_tasks("p", &plan(), &estimates(), &existing, Utc::now());
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].plan_task_id, "t2");
    }
}
