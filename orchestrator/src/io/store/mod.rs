//! Relational store for projects, briefs, plans, tasks, runs and events.
//!
//! [`Store`] is the only persistence seam. Two implementations ship:
//! [`SqliteStore`] for real deployments and [`MemoryStore`] for tests and for
//! running without a database. Which one is used, and whether the process is
//! running degraded, is decided once by [`open_store`].

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::core::plan::PlanEstimate;
use crate::core::types::{RunState, TaskStatus};
use crate::io::config::{OrchestratorConfig, StoreBackend};
use crate::model::{BriefRecord, EventRecord, PlanRecord, ProjectRecord, RunRecord, TaskRecord};

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Partial project update. `None` leaves a column unchanged.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProjectPatch {
    pub stage: Option<String>,
    pub project_type: Option<String>,
}

/// Partial run update. `None` leaves a column unchanged; `result:
/// Some(Value::Null)` clears the stored result.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunPatch {
    pub state: Option<RunState>,
    pub result: Option<Value>,
    pub branch: Option<String>,
    pub ci_url: Option<String>,
    pub preview_url: Option<String>,
    pub logs: Option<String>,
}

/// Fields of a run to create; the store assigns the attempt number.
#[derive(Debug, Clone, PartialEq)]
pub struct NewRun {
    pub id: String,
    pub task_id: String,
    pub state: RunState,
    pub branch: Option<String>,
    pub result: Option<Value>,
    pub created_at: DateTime<Utc>,
}

/// Persistence operations used by the orchestrator.
///
/// Update methods fail with [`crate::error::MissingRecord`] when the target
/// row does not exist. List methods return rows in a documented, stable
/// order that does not depend on the backend's scan order.
pub trait Store: Send + Sync {
    fn insert_project(&self, project: &ProjectRecord) -> Result<()>;
    fn get_project(&self, id: &str) -> Result<Option<ProjectRecord>>;
    fn update_project(&self, id: &str, patch: &ProjectPatch, now: DateTime<Utc>) -> Result<()>;
    /// Remove a project. Only used to roll back a half-finished intake.
    fn delete_project(&self, id: &str) -> Result<()>;
    /// Projects whose stage is one of `stages`, oldest first, at most `limit`.
    fn list_projects_by_stage(&self, stages: &[&str], limit: usize) -> Result<Vec<ProjectRecord>>;

    fn insert_brief(&self, brief: &BriefRecord) -> Result<()>;
    /// Most recent brief (created_at, then insertion order).
    fn latest_brief(&self, project_id: &str) -> Result<Option<BriefRecord>>;

    fn insert_plan(&self, plan: &PlanRecord) -> Result<()>;
    fn latest_plan(&self, project_id: &str) -> Result<Option<PlanRecord>>;
    fn set_plan_estimates(
        &self,
        plan_id: &str,
        estimates: &PlanEstimate,
        now: DateTime<Utc>,
    ) -> Result<()>;

    /// Insert tasks whose id is not yet present. Returns the number inserted.
    fn insert_tasks(&self, tasks: &[TaskRecord]) -> Result<usize>;
    fn get_task(&self, id: &str) -> Result<Option<TaskRecord>>;
    /// Tasks of a project ordered by (created_at, id).
    fn list_tasks(&self, project_id: &str) -> Result<Vec<TaskRecord>>;
    fn update_task_status(&self, id: &str, status: TaskStatus, now: DateTime<Utc>) -> Result<()>;

    /// Insert a run with `attempt = max(attempt for task) + 1`, or 0 for the
    /// first run. Reading the maximum and inserting happen atomically.
    fn insert_run_next_attempt(&self, run: &NewRun) -> Result<RunRecord>;
    fn get_run(&self, id: &str) -> Result<Option<RunRecord>>;
    fn update_run(&self, id: &str, patch: &RunPatch, now: DateTime<Utc>) -> Result<()>;
    fn max_attempt(&self, task_id: &str) -> Result<Option<u32>>;
    /// Runs of a task ordered by attempt.
    fn list_runs(&self, task_id: &str) -> Result<Vec<RunRecord>>;

    fn append_event(&self, event: &EventRecord) -> Result<()>;
    /// Newest events first; all projects when `project_id` is `None`.
    fn list_events(&self, project_id: Option<&str>, limit: usize) -> Result<Vec<EventRecord>>;
}

/// Whether the configured store is the one in use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StoreHealth {
    Healthy,
    /// Running on the in-memory fallback; nothing persists past the process.
    Degraded { reason: String },
}

impl StoreHealth {
    pub fn is_healthy(&self) -> bool {
        matches!(self, StoreHealth::Healthy)
    }
}

/// Open the configured store.
///
/// A failing SQLite open either propagates or, with
/// `store.fallback_to_memory`, yields a [`MemoryStore`] and a degraded health
/// value the caller keeps alongside the store.
pub fn open_store(config: &OrchestratorConfig, root: &Path) -> Result<(Arc<dyn Store>, StoreHealth)> {
    match config.store.backend {
        StoreBackend::Memory => {
            info!("using in-memory store");
            Ok((Arc::new(MemoryStore::new()), StoreHealth::Healthy))
        }
        StoreBackend::Sqlite => {
            let path = config.store_path(root);
            let busy_timeout = Duration::from_millis(config.store.busy_timeout_ms);
            match SqliteStore::open(&path, busy_timeout) {
                Ok(store) => {
                    info!(path = %path.display(), "opened sqlite store");
                    Ok((Arc::new(store), StoreHealth::Healthy))
                }
                Err(err) if config.store.fallback_to_memory => {
                    let reason = format!("{err:#}");
                    warn!(path = %path.display(), %reason, "sqlite unavailable, falling back to memory store");
                    Ok((Arc::new(MemoryStore::new()), StoreHealth::Degraded { reason }))
                }
                Err(err) => Err(err).with_context(|| format!("open store {}", path.display())),
            }
        }
    }
}
