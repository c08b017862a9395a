//! SQLite-backed store.
//!
//! List-valued and free-form columns are stored as JSON text. Timestamps are
//! RFC 3339 UTC with fixed nanosecond precision, so text order is time order.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior, params};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use super::{NewRun, ProjectPatch, RunPatch, Store};
use crate::core::plan::PlanEstimate;
use crate::core::types::TaskStatus;
use crate::error::MissingRecord;
use crate::model::{BriefRecord, EventRecord, PlanRecord, ProjectRecord, RunRecord, TaskRecord};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS projects (
    id TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    owner TEXT,
    stage TEXT NOT NULL,
    project_type TEXT,
    priority INTEGER NOT NULL,
    due_date TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS projects_stage ON projects(stage, created_at);

CREATE TABLE IF NOT EXISTS briefs (
    id TEXT PRIMARY KEY,
    project_id TEXT NOT NULL,
    summary TEXT NOT NULL,
    scope TEXT NOT NULL,
    constraints TEXT NOT NULL,
    success_criteria TEXT NOT NULL,
    category_guess TEXT,
    clarifying_questions TEXT NOT NULL,
    attachments TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS briefs_project ON briefs(project_id, created_at);

CREATE TABLE IF NOT EXISTS plans (
    id TEXT PRIMARY KEY,
    project_id TEXT NOT NULL,
    milestones TEXT NOT NULL,
    tasks TEXT NOT NULL,
    risks TEXT NOT NULL,
    acceptance TEXT NOT NULL,
    success_metrics TEXT NOT NULL,
    estimates TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS plans_project ON plans(project_id, created_at);

CREATE TABLE IF NOT EXISTS tasks (
    id TEXT PRIMARY KEY,
    project_id TEXT NOT NULL,
    plan_task_id TEXT NOT NULL,
    title TEXT NOT NULL,
    description TEXT,
    status TEXT NOT NULL,
    assignee TEXT,
    labels TEXT NOT NULL,
    estimate_hours REAL,
    depends_on TEXT NOT NULL,
    acceptance TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS tasks_project ON tasks(project_id, created_at, id);

CREATE TABLE IF NOT EXISTS runs (
    id TEXT PRIMARY KEY,
    task_id TEXT NOT NULL,
    state TEXT NOT NULL,
    attempt INTEGER NOT NULL,
    branch TEXT,
    ci_url TEXT,
    preview_url TEXT,
    logs TEXT,
    result TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE(task_id, attempt)
);

CREATE TABLE IF NOT EXISTS events (
    id TEXT PRIMARY KEY,
    project_id TEXT,
    kind TEXT NOT NULL,
    payload TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS events_project ON events(project_id, created_at);
";

const PROJECT_COLUMNS: &str =
    "id, title, owner, stage, project_type, priority, due_date, created_at, updated_at";
const BRIEF_COLUMNS: &str = "id, project_id, summary, scope, constraints, success_criteria, \
     category_guess, clarifying_questions, attachments, created_at";
const PLAN_COLUMNS: &str = "id, project_id, milestones, tasks, risks, acceptance, \
     success_metrics, estimates, created_at, updated_at";
const TASK_COLUMNS: &str = "id, project_id, plan_task_id, title, description, status, assignee, \
     labels, estimate_hours, depends_on, acceptance, created_at, updated_at";
const RUN_COLUMNS: &str = "id, task_id, state, attempt, branch, ci_url, preview_url, logs, \
     result, created_at, updated_at";
const EVENT_COLUMNS: &str = "id, project_id, kind, payload, created_at";

#[derive(Debug)]
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path` and install the schema.
    pub fn open(path: &Path, busy_timeout: Duration) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        let conn =
            Connection::open(path).with_context(|| format!("open sqlite {}", path.display()))?;
        Self::init(conn, busy_timeout)
    }

    /// Private in-memory database; used by tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("open in-memory sqlite")?;
        Self::init(conn, Duration::from_secs(5))
    }

    fn init(conn: Connection, busy_timeout: Duration) -> Result<Self> {
        conn.busy_timeout(busy_timeout)?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")
            .context("enable wal")?;
        conn.execute_batch(SCHEMA).context("install schema")?;
        debug!("sqlite schema ready");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("sqlite connection lock poisoned"))
    }
}

fn ts(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    serde_json::to_string(value).context("serialize column")
}

fn conversion_error(
    idx: usize,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn json_col<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|err| conversion_error(idx, err))
}

fn opt_json_col<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<T>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|raw| serde_json::from_str(&raw).map_err(|err| conversion_error(idx, err)))
        .transpose()
}

fn ts_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|err| conversion_error(idx, err))
}

fn parsed_col<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|err| conversion_error(idx, err))
}

fn read_project(row: &Row<'_>) -> rusqlite::Result<ProjectRecord> {
    Ok(ProjectRecord {
        id: row.get(0)?,
        title: row.get(1)?,
        owner: row.get(2)?,
        stage: row.get(3)?,
        project_type: row.get(4)?,
        priority: row.get(5)?,
        due_date: row.get(6)?,
        created_at: ts_col(row, 7)?,
        updated_at: ts_col(row, 8)?,
    })
}

fn read_brief(row: &Row<'_>) -> rusqlite::Result<BriefRecord> {
    Ok(BriefRecord {
        id: row.get(0)?,
        project_id: row.get(1)?,
        summary: row.get(2)?,
        scope: json_col(row, 3)?,
        constraints: json_col(row, 4)?,
        success_criteria: json_col(row, 5)?,
        category_guess: row.get(6)?,
        clarifying_questions: json_col(row, 7)?,
        attachments: json_col(row, 8)?,
        created_at: ts_col(row, 9)?,
    })
}

fn read_plan(row: &Row<'_>) -> rusqlite::Result<PlanRecord> {
    Ok(PlanRecord {
        id: row.get(0)?,
        project_id: row.get(1)?,
        milestones: json_col(row, 2)?,
        tasks: json_col(row, 3)?,
        risks: json_col(row, 4)?,
        acceptance: json_col(row, 5)?,
        success_metrics: json_col(row, 6)?,
        estimates: opt_json_col(row, 7)?,
        created_at: ts_col(row, 8)?,
        updated_at: ts_col(row, 9)?,
    })
}

fn read_task(row: &Row<'_>) -> rusqlite::Result<TaskRecord> {
    Ok(TaskRecord {
        id: row.get(0)?,
        project_id: row.get(1)?,
        plan_task_id: row.get(2)?,
        title: row.get(3)?,
        description: row.get(4)?,
        status: parsed_col(row, 5)?,
        assignee: row.get(6)?,
        labels: json_col(row, 7)?,
        estimate_hours: row.get(8)?,
        depends_on: json_col(row, 9)?,
        acceptance: json_col(row, 10)?,
        created_at: ts_col(row, 11)?,
        updated_at: ts_col(row, 12)?,
    })
}

fn read_run(row: &Row<'_>) -> rusqlite::Result<RunRecord> {
    Ok(RunRecord {
        id: row.get(0)?,
        task_id: row.get(1)?,
        state: parsed_col(row, 2)?,
        attempt: row.get(3)?,
        branch: row.get(4)?,
        ci_url: row.get(5)?,
        preview_url: row.get(6)?,
        logs: row.get(7)?,
        result: opt_json_col(row, 8)?,
        created_at: ts_col(row, 9)?,
        updated_at: ts_col(row, 10)?,
    })
}

fn read_event(row: &Row<'_>) -> rusqlite::Result<EventRecord> {
    Ok(EventRecord {
        id: row.get(0)?,
        project_id: row.get(1)?,
        kind: parsed_col(row, 2)?,
        payload: json_col(row, 3)?,
        created_at: ts_col(row, 4)?,
    })
}

fn ensure_updated(changed: usize, entity: &'static str, id: &str) -> Result<()> {
    if changed == 0 {
        return Err(MissingRecord::new(entity, id).into());
    }
    Ok(())
}

fn optional_result_json(result: Option<&Value>) -> Result<Option<String>> {
    match result {
        None | Some(Value::Null) => Ok(None),
        Some(value) => to_json(value).map(Some),
    }
}

impl Store for SqliteStore {
    fn insert_project(&self, project: &ProjectRecord) -> Result<()> {
        self.conn()?
            .execute(
                &format!("INSERT INTO projects ({PROJECT_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"),
                params![
                    project.id,
                    project.title,
                    project.owner,
                    project.stage,
                    project.project_type,
                    project.priority,
                    project.due_date,
                    ts(project.created_at),
                    ts(project.updated_at),
                ],
            )
            .with_context(|| format!("insert project {}", project.id))?;
        Ok(())
    }

    fn get_project(&self, id: &str) -> Result<Option<ProjectRecord>> {
        self.conn()?
            .query_row(
                &format!("SELECT {PROJECT_COLUMNS} FROM projects WHERE id = ?1"),
                params![id],
                read_project,
            )
            .optional()
            .with_context(|| format!("load project {id}"))
    }

    fn update_project(&self, id: &str, patch: &ProjectPatch, now: DateTime<Utc>) -> Result<()> {
        let changed = self
            .conn()?
            .execute(
                "UPDATE projects SET stage = COALESCE(?1, stage), \
                 project_type = COALESCE(?2, project_type), updated_at = ?3 WHERE id = ?4",
                params![patch.stage, patch.project_type, ts(now), id],
            )
            .with_context(|| format!("update project {id}"))?;
        ensure_updated(changed, "project", id)
    }

    fn delete_project(&self, id: &str) -> Result<()> {
        self.conn()?
            .execute("DELETE FROM projects WHERE id = ?1", params![id])
            .with_context(|| format!("delete project {id}"))?;
        Ok(())
    }

    fn list_projects_by_stage(&self, stages: &[&str], limit: usize) -> Result<Vec<ProjectRecord>> {
        if stages.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; stages.len()].join(", ");
        let sql = format!(
            "SELECT {PROJECT_COLUMNS} FROM projects WHERE stage IN ({placeholders}) \
             ORDER BY created_at ASC, id ASC LIMIT {limit}"
        );
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(stages.iter()), read_project)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("list projects by stage")?;
        Ok(rows)
    }

    fn insert_brief(&self, brief: &BriefRecord) -> Result<()> {
        self.conn()?
            .execute(
                &format!("INSERT INTO briefs ({BRIEF_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"),
                params![
                    brief.id,
                    brief.project_id,
                    brief.summary,
                    to_json(&brief.scope)?,
                    to_json(&brief.constraints)?,
                    to_json(&brief.success_criteria)?,
                    brief.category_guess,
                    to_json(&brief.clarifying_questions)?,
                    to_json(&brief.attachments)?,
                    ts(brief.created_at),
                ],
            )
            .with_context(|| format!("insert brief for project {}", brief.project_id))?;
        Ok(())
    }

    fn latest_brief(&self, project_id: &str) -> Result<Option<BriefRecord>> {
        self.conn()?
            .query_row(
                &format!(
                    "SELECT {BRIEF_COLUMNS} FROM briefs WHERE project_id = ?1 \
                     ORDER BY created_at DESC, rowid DESC LIMIT 1"
                ),
                params![project_id],
                read_brief,
            )
            .optional()
            .with_context(|| format!("load latest brief for {project_id}"))
    }

    fn insert_plan(&self, plan: &PlanRecord) -> Result<()> {
        let estimates = plan.estimates.as_ref().map(to_json).transpose()?;
        self.conn()?
            .execute(
                &format!("INSERT INTO plans ({PLAN_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"),
                params![
                    plan.id,
                    plan.project_id,
                    to_json(&plan.milestones)?,
                    to_json(&plan.tasks)?,
                    to_json(&plan.risks)?,
                    to_json(&plan.acceptance)?,
                    to_json(&plan.success_metrics)?,
                    estimates,
                    ts(plan.created_at),
                    ts(plan.updated_at),
                ],
            )
            .with_context(|| format!("insert plan for project {}", plan.project_id))?;
        Ok(())
    }

    fn latest_plan(&self, project_id: &str) -> Result<Option<PlanRecord>> {
        self.conn()?
            .query_row(
                &format!(
                    "SELECT {PLAN_COLUMNS} FROM plans WHERE project_id = ?1 \
                     ORDER BY created_at DESC, rowid DESC LIMIT 1"
                ),
                params![project_id],
                read_plan,
            )
            .optional()
            .with_context(|| format!("load latest plan for {project_id}"))
    }

    fn set_plan_estimates(
        &self,
        plan_id: &str,
        estimates: &PlanEstimate,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let changed = self
            .conn()?
            .execute(
                "UPDATE plans SET estimates = ?1, updated_at = ?2 WHERE id = ?3",
                params![to_json(estimates)?, ts(now), plan_id],
            )
            .with_context(|| format!("attach estimates to plan {plan_id}"))?;
        ensure_updated(changed, "plan", plan_id)
    }

    fn insert_tasks(&self, tasks: &[TaskRecord]) -> Result<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare(&format!(
                "INSERT OR IGNORE INTO tasks ({TASK_COLUMNS}) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"
            ))?;
            for task in tasks {
                inserted += stmt
                    .execute(params![
                        task.id,
                        task.project_id,
                        task.plan_task_id,
                        task.title,
                        task.description,
                        task.status.as_str(),
                        task.assignee,
                        to_json(&task.labels)?,
                        task.estimate_hours,
                        to_json(&task.depends_on)?,
                        to_json(&task.acceptance)?,
                        ts(task.created_at),
                        ts(task.updated_at),
                    ])
                    .with_context(|| format!("insert task {}", task.id))?;
            }
        }
        tx.commit().context("commit task insert")?;
        Ok(inserted)
    }

    fn get_task(&self, id: &str) -> Result<Option<TaskRecord>> {
        self.conn()?
            .query_row(
                &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"),
                params![id],
                read_task,
            )
            .optional()
            .with_context(|| format!("load task {id}"))
    }

    fn list_tasks(&self, project_id: &str) -> Result<Vec<TaskRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE project_id = ?1 ORDER BY created_at ASC, id ASC"
        ))?;
        let rows = stmt
            .query_map(params![project_id], read_task)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .with_context(|| format!("list tasks for {project_id}"))?;
        Ok(rows)
    }

    fn update_task_status(&self, id: &str, status: TaskStatus, now: DateTime<Utc>) -> Result<()> {
        let changed = self
            .conn()?
            .execute(
                "UPDATE tasks SET status = ?1, updated_at = ?2 WHERE id = ?3",
                params![status.as_str(), ts(now), id],
            )
            .with_context(|| format!("update task {id}"))?;
        ensure_updated(changed, "task", id)
    }

    fn insert_run_next_attempt(&self, run: &NewRun) -> Result<RunRecord> {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("begin run insert")?;
        let attempt: u32 = tx.query_row(
            "SELECT COALESCE(MAX(attempt) + 1, 0) FROM runs WHERE task_id = ?1",
            params![run.task_id],
            |row| row.get(0),
        )?;
        let result = optional_result_json(run.result.as_ref())?;
        tx.execute(
            &format!(
                "INSERT INTO runs ({RUN_COLUMNS}) \
                 VALUES (?1, ?2, ?3, ?4, ?5, NULL, NULL, NULL, ?6, ?7, ?7)"
            ),
            params![
                run.id,
                run.task_id,
                run.state.as_str(),
                attempt,
                run.branch,
                result,
                ts(run.created_at),
            ],
        )
        .with_context(|| format!("insert run for task {}", run.task_id))?;
        tx.commit().context("commit run insert")?;

        Ok(RunRecord {
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
        })
    }

    fn get_run(&self, id: &str) -> Result<Option<RunRecord>> {
        self.conn()?
            .query_row(
                &format!("SELECT {RUN_COLUMNS} FROM runs WHERE id = ?1"),
                params![id],
                read_run,
            )
            .optional()
            .with_context(|| format!("load run {id}"))
    }

    fn update_run(&self, id: &str, patch: &RunPatch, now: DateTime<Utc>) -> Result<()> {
        let result = optional_result_json(patch.result.as_ref())?;
        let changed = self
            .conn()?
            .execute(
                "UPDATE runs SET \
                 state = COALESCE(?1, state), \
                 result = CASE WHEN ?2 THEN ?3 ELSE result END, \
                 branch = COALESCE(?4, branch), \
                 ci_url = COALESCE(?5, ci_url), \
                 preview_url = COALESCE(?6, preview_url), \
                 logs = COALESCE(?7, logs), \
                 updated_at = ?8 \
                 WHERE id = ?9",
                params![
                    patch.state.map(|state| state.as_str()),
                    patch.result.is_some(),
                    result,
                    patch.branch,
                    patch.ci_url,
                    patch.preview_url,
                    patch.logs,
                    ts(now),
                    id,
                ],
            )
            .with_context(|| format!("update run {id}"))?;
        ensure_updated(changed, "run", id)
    }

    fn max_attempt(&self, task_id: &str) -> Result<Option<u32>> {
        self.conn()?
            .query_row(
                "SELECT MAX(attempt) FROM runs WHERE task_id = ?1",
                params![task_id],
                |row| row.get(0),
            )
            .with_context(|| format!("load max attempt for {task_id}"))
    }

    fn list_runs(&self, task_id: &str) -> Result<Vec<RunRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {RUN_COLUMNS} FROM runs WHERE task_id = ?1 ORDER BY attempt ASC"
        ))?;
        let rows = stmt
            .query_map(params![task_id], read_run)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .with_context(|| format!("list runs for {task_id}"))?;
        Ok(rows)
    }

    fn append_event(&self, event: &EventRecord) -> Result<()> {
        self.conn()?
            .execute(
                &format!("INSERT INTO events ({EVENT_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5)"),
                params![
                    event.id,
                    event.project_id,
                    event.kind.as_str(),
                    to_json(&event.payload)?,
                    ts(event.created_at),
                ],
            )
            .with_context(|| format!("append {} event", event.kind.as_str()))?;
        Ok(())
    }

    fn list_events(&self, project_id: Option<&str>, limit: usize) -> Result<Vec<EventRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {EVENT_COLUMNS} FROM events WHERE (?1 IS NULL OR project_id = ?1) \
             ORDER BY created_at DESC, rowid DESC LIMIT {limit}"
        ))?;
        let rows = stmt
            .query_map(params![project_id], read_event)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("list events")?;
        Ok(rows)
    }
}
