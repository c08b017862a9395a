//! Task board and manual status changes.

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use crate::context::Orchestrator;
use crate::core::selector::sort_tasks;
use crate::core::types::{EventKind, Stage, TaskStatus};
use crate::error::{InvalidInput, MissingRecord};
use crate::io::store::ProjectPatch;
use crate::model::{BriefRecord, EventRecord, PlanRecord, ProjectRecord, TaskRecord};

const SNAPSHOT_EVENTS: usize = 50;

/// Review decisions a person can set on a project besides pipeline stages.
pub const REVIEW_STATUSES: [&str; 3] = ["pending", "accepted", "rejected"];

/// Tasks of one project grouped by status.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Board {
    pub backlog: Vec<TaskRecord>,
    pub in_progress: Vec<TaskRecord>,
    pub review: Vec<TaskRecord>,
    pub done: Vec<TaskRecord>,
    pub blocked: Vec<TaskRecord>,
}

impl Board {
    pub fn from_tasks(mut tasks: Vec<TaskRecord>) -> Self {
        sort_tasks(&mut tasks);
        let mut board = Board::default();
        for task in tasks {
            board.column_mut(task.status).push(task);
        }
        board
    }

    pub fn column(&self, status: TaskStatus) -> &[TaskRecord] {
        match status {
            TaskStatus::Backlog => &self.backlog,
            TaskStatus::InProgress => &self.in_progress,
            TaskStatus::Review => &self.review,
            TaskStatus::Done => &self.done,
            TaskStatus::Blocked => &self.blocked,
        }
    }

    fn column_mut(&mut self, status: TaskStatus) -> &mut Vec<TaskRecord> {
        match status {
            TaskStatus::Backlog => &mut self.backlog,
            TaskStatus::InProgress => &mut self.in_progress,
            TaskStatus::Review => &mut self.review,
            TaskStatus::Done => &mut self.done,
            TaskStatus::Blocked => &mut self.blocked,
        }
    }
}

/// Everything known about one project, for display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectSnapshot {
    pub project: ProjectRecord,
    pub brief: Option<BriefRecord>,
    pub plan: Option<PlanRecord>,
    pub board: Board,
    /// Newest first.
    pub events: Vec<EventRecord>,
}

impl Orchestrator {
    pub fn snapshot(&self, project_id: &str) -> Result<ProjectSnapshot> {
        let project = self.load_project(project_id)?;
        Ok(ProjectSnapshot {
            brief: self.store.latest_brief(project_id)?,
            plan: self.store.latest_plan(project_id)?,
            board: self.board(project_id)?,
            events: self.recent_events(Some(project_id), SNAPSHOT_EVENTS)?,
            project,
        })
    }

    pub fn board(&self, project_id: &str) -> Result<Board> {
        let tasks = self
            .store
            .list_tasks(project_id)
            .with_context(|| format!("list tasks for {project_id}"))?;
        Ok(Board::from_tasks(tasks))
    }

    /// Move a task on the board by hand.
    pub fn update_task_status(&self, task_id: &str, status: TaskStatus) -> Result<TaskRecord> {
        let task = self
            .store
            .get_task(task_id)?
            .ok_or_else(|| MissingRecord::new("task", task_id))?;
        self.store
            .update_task_status(task_id, status, Utc::now())
            .with_context(|| format!("move task {task_id} to {status}"))?;
        self.record_event(
            Some(&task.project_id),
            EventKind::TaskUpdate,
            json!({ "taskId": task_id, "from": task.status, "status": status }),
        )?;
        info!(task_id, %status, "task status updated");
        self.store
            .get_task(task_id)?
            .ok_or_else(|| MissingRecord::new("task", task_id).into())
    }

    /// Set a project's status directly, e.g. accept or reject after intake
    /// review. Accepts review statuses and pipeline stages.
    pub fn override_project_status(&self, project_id: &str, status: &str) -> Result<ProjectRecord> {
        if !REVIEW_STATUSES.contains(&status) && Stage::parse(status).is_none() {
            return Err(InvalidInput::new(format!(
                "status must be a stage or one of {}, got '{status}'",
                REVIEW_STATUSES.join(", ")
            ))
            .into());
        }
        let project = self.load_project(project_id)?;
        let patch = ProjectPatch {
            stage: Some(status.to_string()),
            project_type: None,
        };
        self.store
            .update_project(project_id, &patch, Utc::now())
            .with_context(|| format!("override status of {project_id}"))?;
        self.record_event(
            Some(project_id),
            EventKind::StatusOverride,
            json!({ "from": project.stage, "status": status }),
        )?;
        info!(project_id, status, "project status overridden");
        self.load_project(project_id)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::test_support::{memory_orchestrator, project_record, seed_project, task_record};

    #[test]
    fn board_groups_tasks_in_creation_order() {
        let orchestrator = memory_orchestrator();
        let base = Utc::now();
        let mut tasks = Vec::new();
        for (idx, status) in [
            TaskStatus::Done,
            TaskStatus::Backlog,
            TaskStatus::Blocked,
            TaskStatus::Backlog,
        ]
        .into_iter()
        .enumerate()
        {
            let mut task = task_record(&format!("p1/t{idx}"), "p1");
            task.status = status;
            task.created_at = base + Duration::seconds(10 - idx as i64);
            tasks.push(task);
        }
        orchestrator.store().insert_tasks(&tasks).expect("tasks");

        let board = orchestrator.board("p1").expect("board");
        let backlog: Vec<_> = board.backlog.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(backlog, vec!["p1/t3", "p1/t1"]);
        assert_eq!(board.column(TaskStatus::Done).len(), 1);
        assert_eq!(board.column(TaskStatus::Blocked).len(), 1);
        assert!(board.in_progress.is_empty());
    }

    #[test]
    fn snapshot_collects_project_state() {
        let orchestrator = memory_orchestrator();
        seed_project(&orchestrator, "p1", "planning", None);
        orchestrator.step("p1").expect("plan");

        let snapshot = orchestrator.snapshot("p1").expect("snapshot");
        assert_eq!(snapshot.project.stage, "estimated");
        assert!(snapshot.brief.is_some());
        assert_eq!(snapshot.plan.map(|plan| plan.tasks.len()), Some(2));
        assert_eq!(snapshot.events.len(), 1);

        let err = orchestrator.snapshot("ghost").unwrap_err();
        assert!(err.downcast_ref::<MissingRecord>().is_some());
    }

    #[test]
    fn manual_task_move_is_recorded() {
        let orchestrator = memory_orchestrator();
        orchestrator
            .store()
            .insert_tasks(&[task_record("p1/t1", "p1")])
            .expect("tasks");
        let task = orchestrator
            .update_task_status("p1/t1", TaskStatus::Done)
            .expect("update");
        assert_eq!(task.status, TaskStatus::Done);

        let events = orchestrator.recent_events(Some("p1"), 10).expect("events");
        assert_eq!(events[0].kind, EventKind::TaskUpdate);
        assert_eq!(events[0].payload["status"], "done");
        assert_eq!(events[0].payload["from"], "backlog");

        let err = orchestrator
            .update_task_status("p1/none", TaskStatus::Done)
            .unwrap_err();
        assert!(err.downcast_ref::<MissingRecord>().is_some());
    }

    #[test]
    fn override_accepts_review_statuses_only() {
        let orchestrator = memory_orchestrator();
        orchestrator
            .store()
            .insert_project(&project_record("p1", "intake"))
            .expect("insert");

        let project = orchestrator
            .override_project_status("p1", "accepted")
            .expect("override");
        assert_eq!(project.stage, "accepted");
        let events = orchestrator.recent_events(Some("p1"), 10).expect("events");
        assert_eq!(events[0].kind, EventKind::StatusOverride);
        assert_eq!(events[0].payload["from"], "intake");

        let err = orchestrator
            .override_project_status("p1", "archived")
            .unwrap_err();
        assert!(err.downcast_ref::<InvalidInput>().is_some());
        let err = orchestrator
            .override_project_status("ghost", "rejected")
            .unwrap_err();
        assert!(err.downcast_ref::<MissingRecord>().is_some());
    }
}
