//! In-process store backed by vectors behind a single mutex.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};

use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use serde_json::Value;

use super::{NewRun, ProjectPatch, RunPatch, Store};
use crate::core::plan::PlanEstimate;
use crate::core::types::TaskStatus;
use crate::error::MissingRecord;
use crate::model::{BriefRecord, EventRecord, PlanRecord, ProjectRecord, RunRecord, TaskRecord};

/// Store that keeps everything in memory.
///
/// Rows are kept in insertion order, which doubles as the tie-breaker for
/// equal timestamps. Every operation holds the lock for its whole duration,
/// so attempt assignment cannot interleave.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Tables>,
}

#[derive(Debug, Default)]
struct Tables {
    projects: Vec<ProjectRecord>,
    briefs: Vec<BriefRecord>,
    plans: Vec<PlanRecord>,
    tasks: Vec<TaskRecord>,
    runs: Vec<RunRecord>,
    events: Vec<EventRecord>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> Result<MutexGuard<'_, Tables>> {
        self.inner
            .lock()
            .map_err(|_| anyhow!("memory store lock poisoned"))
    }
}

/// Index of the newest row for `project_id`; later rows win ties.
fn latest_index<T>(
    rows: &[T],
    matches: impl Fn(&T) -> bool,
    created_at: impl Fn(&T) -> DateTime<Utc>,
) -> Option<usize> {
    rows.iter()
        .enumerate()
        .filter(|(_, row)| matches(row))
        .max_by_key(|(idx, row)| (created_at(row), *idx))
        .map(|(idx, _)| idx)
}

impl Store for MemoryStore {
    fn insert_project(&self, project: &ProjectRecord) -> Result<()> {
        let mut tables = self.tables()?;
        if tables.projects.iter().any(|p| p.id == project.id) {
            return Err(anyhow!("project already exists: {}", project.id));
        }
        tables.projects.push(project.clone());
        Ok(())
    }

    fn get_project(&self, id: &str) -> Result<Option<ProjectRecord>> {
        Ok(self.tables()?.projects.iter().find(|p| p.id == id).cloned())
    }

    fn update_project(&self, id: &str, patch: &ProjectPatch, now: DateTime<Utc>) -> Result<()> {
        let mut tables = self.tables()?;
        let project = tables
            .projects
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| MissingRecord::new("project", id))?;
        if let Some(stage) = &patch.stage {
            project.stage.clone_from(stage);
        }
        if let Some(project_type) = &patch.project_type {
            project.project_type = Some(project_type.clone());
        }
        project.updated_at = now;
        Ok(())
    }

    fn delete_project(&self, id: &str) -> Result<()> {
        self.tables()?.projects.retain(|p| p.id != id);
        Ok(())
    }

    fn list_projects_by_stage(&self, stages: &[&str], limit: usize) -> Result<Vec<ProjectRecord>> {
        let tables = self.tables()?;
        let mut rows: Vec<_> = tables
            .projects
            .iter()
            .filter(|p| stages.contains(&p.stage.as_str()))
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        rows.truncate(limit);
        Ok(rows)
    }

    fn insert_brief(&self, brief: &BriefRecord) -> Result<()> {
        self.tables()?.briefs.push(brief.clone());
        Ok(())
    }

    fn latest_brief(&self, project_id: &str) -> Result<Option<BriefRecord>> {
        let tables = self.tables()?;
        let idx = latest_index(&tables.briefs, |b| b.project_id == project_id, |b| b.created_at);
        Ok(idx.map(|idx| tables.briefs[idx].clone()))
    }

    fn insert_plan(&self, plan: &PlanRecord) -> Result<()> {
        self.tables()?.plans.push(plan.clone());
        Ok(())
    }

    fn latest_plan(&self, project_id: &str) -> Result<Option<PlanRecord>> {
        let tables = self.tables()?;
        let idx = latest_index(&tables.plans, |p| p.project_id == project_id, |p| p.created_at);
        Ok(idx.map(|idx| tables.plans[idx].clone()))
    }

    fn set_plan_estimates(
        &self,
        plan_id: &str,
        estimates: &PlanEstimate,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut tables = self.tables()?;
        let plan = tables
            .plans
            .iter_mut()
            .find(|p| p.id == plan_id)
            .ok_or_else(|| MissingRecord::new("plan", plan_id))?;
        plan.estimates = Some(estimates.clone());
        plan.updated_at = now;
        Ok(())
    }

    fn insert_tasks(&self, tasks: &[TaskRecord]) -> Result<usize> {
        let mut tables = self.tables()?;
        let mut present: HashSet<String> = tables.tasks.iter().map(|t| t.id.clone()).collect();
        let mut inserted = 0;
        for task in tasks {
            if present.insert(task.id.clone()) {
                tables.tasks.push(task.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    fn get_task(&self, id: &str) -> Result<Option<TaskRecord>> {
        Ok(self.tables()?.tasks.iter().find(|t| t.id == id).cloned())
    }

    fn list_tasks(&self, project_id: &str) -> Result<Vec<TaskRecord>> {
        let tables = self.tables()?;
        let mut rows: Vec<_> = tables
            .tasks
            .iter()
            .filter(|t| t.project_id == project_id)
            .cloned()
            .collect();
        crate::core::selector::sort_tasks(&mut rows);
        Ok(rows)
    }

    fn update_task_status(&self, id: &str, status: TaskStatus, now: DateTime<Utc>) -> Result<()> {
        let mut tables = self.tables()?;
        let task = tables
            .tasks
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| MissingRecord::new("task", id))?;
        task.status = status;
        task.updated_at = now;
        Ok(())
    }

    fn insert_run_next_attempt(&self, run: &NewRun) -> Result<RunRecord> {
        let mut tables = self.tables()?;
        let attempt = tables
            .runs
            .iter()
            .filter(|r| r.task_id == run.task_id)
            .map(|r| r.attempt + 1)
            .max()
            .unwrap_or(0);
        let record = RunRecord {
            id: run.id.clone(),
            task_id: run.task_id.clone(),
            state: run.state,
            attempt,
            branch: run.branch.clone(),
            ci_url: None,
            preview_url: None,
            logs: None,
            result: run.result.clone().filter(|value| !value.is_null()),
            created_at: run.created_at,
            updated_at: run.created_at,
        };
        tables.runs.push(record.clone());
        Ok(record)
    }

    fn get_run(&self, id: &str) -> Result<Option<RunRecord>> {
        Ok(self.tables()?.runs.iter().find(|r| r.id == id).cloned())
    }

    fn update_run(&self, id: &str, patch: &RunPatch, now: DateTime<Utc>) -> Result<()> {
        let mut tables = self.tables()?;
        let run = tables
            .runs
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| MissingRecord::new("run", id))?;
        if let Some(state) = patch.state {
            run.state = state;
        }
        if let Some(result) = &patch.result {
            run.result = match result {
                Value::Null => None,
                value => Some(value.clone()),
            };
        }
        if let Some(branch) = &patch.branch {
            run.branch = Some(branch.clone());
        }
        if let Some(ci_url) = &patch.ci_url {
            run.ci_url = Some(ci_url.clone());
        }
        if let Some(preview_url) = &patch.preview_url {
            run.preview_url = Some(preview_url.clone());
        }
        if let Some(logs) = &patch.logs {
            run.logs = Some(logs.clone());
        }
        run.updated_at = now;
        Ok(())
    }

    fn max_attempt(&self, task_id: &str) -> Result<Option<u32>> {
        Ok(self
            .tables()?
            .runs
            .iter()
            .filter(|r| r.task_id == task_id)
            .map(|r| r.attempt)
            .max())
    }

    fn list_runs(&self, task_id: &str) -> Result<Vec<RunRecord>> {
        let tables = self.tables()?;
        let mut rows: Vec<_> = tables
            .runs
            .iter()
            .filter(|r| r.task_id == task_id)
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.attempt);
        Ok(rows)
    }

    fn append_event(&self, event: &EventRecord) -> Result<()> {
        self.tables()?.events.push(event.clone());
        Ok(())
    }

    fn list_events(&self, project_id: Option<&str>, limit: usize) -> Result<Vec<EventRecord>> {
        let tables = self.tables()?;
        let mut rows: Vec<(usize, &EventRecord)> = tables
            .events
            .iter()
            .enumerate()
            .filter(|(_, e)| project_id.is_none_or(|id| e.project_id.as_deref() == Some(id)))
            .collect();
        rows.sort_by(|(ia, a), (ib, b)| b.created_at.cmp(&a.created_at).then_with(|| ib.cmp(ia)));
        Ok(rows
            .into_iter()
            .take(limit)
            .map(|(_, e)| e.clone())
            .collect())
    }
}
