//! Test-only builders, a scripted agent backend and a fault-injecting store.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Result, anyhow, bail};
use chrono::{DateTime, Utc};
use serde_json::{Value, json};

use crate::agents::AgentGateway;
use crate::context::{Orchestrator, Settings};
use crate::core::brief::{IntakeRequest, ProjectBrief};
use crate::core::plan::PlanEstimate;
use crate::core::types::{EventKind, TaskStatus};
use crate::io::backend::{AgentBackend, GenerateRequest};
use crate::io::store::{MemoryStore, NewRun, ProjectPatch, RunPatch, Store};
use crate::model::{
    BriefRecord, DEFAULT_PRIORITY, EventRecord, PlanRecord, ProjectRecord, RunRecord, TaskRecord,
};

/// Create a project row with default fields.
pub fn project_record(id: &str, stage: &str) -> ProjectRecord {
    let now = Utc::now();
    ProjectRecord {
        id: id.to_string(),
        title: format!("{id} title"),
        owner: None,
        stage: stage.to_string(),
        project_type: None,
        priority: DEFAULT_PRIORITY,
        due_date: None,
        created_at: now,
        updated_at: now,
    }
}

pub fn brief_record(id: &str, project_id: &str, summary: &str) -> BriefRecord {
    BriefRecord {
        id: id.to_string(),
        project_id: project_id.to_string(),
        summary: summary.to_string(),
        scope: vec!["First deliverable".to_string()],
        constraints: Vec::new(),
        success_criteria: Vec::new(),
        category_guess: None,
        clarifying_questions: Vec::new(),
        attachments: Vec::new(),
        created_at: Utc::now(),
    }
}

/// Create a backlog task row.
pub fn task_record(id: &str, project_id: &str) -> TaskRecord {
    let now = Utc::now();
    let plan_task_id = id.rsplit('/').next().unwrap_or(id);
    TaskRecord {
        id: id.to_string(),
        project_id: project_id.to_string(),
        plan_task_id: plan_task_id.to_string(),
        title: format!("{plan_task_id} title"),
        description: None,
        status: TaskStatus::Backlog,
        assignee: None,
        labels: Vec::new(),
        estimate_hours: None,
        depends_on: Vec::new(),
        acceptance: Vec::new(),
        created_at: now,
        updated_at: now,
    }
}

pub fn event_record(project_id: Option<&str>, kind: EventKind) -> EventRecord {
    EventRecord {
        id: crate::model::new_id(),
        project_id: project_id.map(str::to_string),
        kind,
        payload: json!({ "kind": kind.as_str() }),
        created_at: Utc::now(),
    }
}

pub fn sample_brief(category_guess: Option<&str>) -> ProjectBrief {
    ProjectBrief {
        project_id: Some("p1".to_string()),
        title: "Customer portal".to_string(),
        summary: "Build a self-service portal for existing customers.".to_string(),
        scope: vec!["Login".to_string(), "Invoices".to_string()],
        constraints: Vec::new(),
        success_criteria: Vec::new(),
        category_guess: category_guess.map(str::to_string),
        clarifying_questions: Vec::new(),
        attachments: Vec::new(),
    }
}

pub fn intake_request(title: &str, category_hint: Option<&str>) -> IntakeRequest {
    IntakeRequest {
        title: title.to_string(),
        description: "Build a self-service portal.\nCustomers can download invoices.".to_string(),
        category_hint: category_hint.map(str::to_string),
        due_date: None,
        owner: None,
        attachments: Vec::new(),
    }
}

/// Orchestrator over a fresh memory store with no agent backend.
pub fn memory_orchestrator() -> Orchestrator {
    memory_orchestrator_with(Settings::default())
}

pub fn memory_orchestrator_with(settings: Settings) -> Orchestrator {
    orchestrator_with_gateway(AgentGateway::fallback_only(), settings)
}

pub fn orchestrator_with_gateway(gateway: AgentGateway, settings: Settings) -> Orchestrator {
    Orchestrator::new(Arc::new(MemoryStore::new()), gateway, settings)
}

/// Insert a project in `stage` together with a brief carrying
/// `category_guess`.
pub fn seed_project(
    orchestrator: &Orchestrator,
    id: &str,
    stage: &str,
    category_guess: Option<&str>,
) -> ProjectRecord {
    let project = project_record(id, stage);
    orchestrator
        .store()
        .insert_project(&project)
        .expect("insert project");
    let mut brief = brief_record(&format!("{id}-brief"), id, "Seeded project summary text");
    brief.category_guess = category_guess.map(str::to_string);
    orchestrator.store().insert_brief(&brief).expect("insert brief");
    project
}

/// Agent backend that replays scripted responses in order and records every
/// request. Runs out into an error.
pub struct ScriptedBackend {
    responses: Mutex<VecDeque<Result<Value, String>>>,
    calls: Arc<Mutex<Vec<GenerateRequest>>>,
}

impl ScriptedBackend {
    pub fn new(responses: Vec<Result<Value, String>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn calls(&self) -> Arc<Mutex<Vec<GenerateRequest>>> {
        Arc::clone(&self.calls)
    }
}

impl AgentBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    fn generate(&self, request: &GenerateRequest) -> Result<Value> {
        self.calls
            .lock()
            .map_err(|_| anyhow!("calls lock poisoned"))?
            .push(request.clone());
        let next = self
            .responses
            .lock()
            .map_err(|_| anyhow!("responses lock poisoned"))?
            .pop_front();
        match next {
            Some(Ok(value)) => Ok(value),
            Some(Err(message)) => bail!(message),
            None => bail!("scripted backend exhausted"),
        }
    }
}

/// Store wrapper that can be told to fail selected writes.
pub struct FaultInjectingStore {
    inner: Arc<dyn Store>,
    fail_briefs: AtomicBool,
}

impl FaultInjectingStore {
    pub fn new(inner: Arc<dyn Store>) -> Self {
        Self {
            inner,
            fail_briefs: AtomicBool::new(false),
        }
    }

    pub fn fail_brief_inserts(&self) {
        self.fail_briefs.store(true, Ordering::SeqCst);
    }
}

impl Store for FaultInjectingStore {
    fn insert_project(&self, project: &ProjectRecord) -> Result<()> {
        self.inner.insert_project(project)
    }

    fn get_project(&self, id: &str) -> Result<Option<ProjectRecord>> {
        self.inner.get_project(id)
    }

    fn update_project(&self, id: &str, patch: &ProjectPatch, now: DateTime<Utc>) -> Result<()> {
        self.inner.update_project(id, patch, now)
    }

    fn delete_project(&self, id: &str) -> Result<()> {
        self.inner.delete_project(id)
    }

    fn list_projects_by_stage(&self, stages: &[&str], limit: usize) -> Result<Vec<ProjectRecord>> {
        self.inner.list_projects_by_stage(stages, limit)
    }

    fn insert_brief(&self, brief: &BriefRecord) -> Result<()> {
        if self.fail_briefs.load(Ordering::SeqCst) {
            bail!("injected brief write failure");
        }
        self.inner.insert_brief(brief)
    }

    fn latest_brief(&self, project_id: &str) -> Result<Option<BriefRecord>> {
        self.inner.latest_brief(project_id)
    }

    fn insert_plan(&self, plan: &PlanRecord) -> Result<()> {
        self.inner.insert_plan(plan)
    }

    fn latest_plan(&self, project_id: &str) -> Result<Option<PlanRecord>> {
        self.inner.latest_plan(project_id)
    }

    fn set_plan_estimates(
        &self,
        plan_id: &str,
        estimates: &PlanEstimate,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.inner.set_plan_estimates(plan_id, estimates, now)
    }

    fn insert_tasks(&self, tasks: &[TaskRecord]) -> Result<usize> {
        self.inner.insert_tasks(tasks)
    }

    fn get_task(&self, id: &str) -> Result<Option<TaskRecord>> {
        self.inner.get_task(id)
    }

    fn list_tasks(&self, project_id: &str) -> Result<Vec<TaskRecord>> {
        self.inner.list_tasks(project_id)
    }

    fn update_task_status(&self, id: &str, status: TaskStatus, now: DateTime<Utc>) -> Result<()> {
        self.inner.update_task_status(id, status, now)
    }

    fn insert_run_next_attempt(&self, run: &NewRun) -> Result<RunRecord> {
        self.inner.insert_run_next_attempt(run)
    }

    fn get_run(&self, id: &str) -> Result<Option<RunRecord>> {
        self.inner.get_run(id)
    }

    fn update_run(&self, id: &str, patch: &RunPatch, now: DateTime<Utc>) -> Result<()> {
        self.inner.update_run(id, patch, now)
    }

    fn max_attempt(&self, task_id: &str) -> Result<Option<u32>> {
        self.inner.max_attempt(task_id)
    }

    fn list_runs(&self, task_id: &str) -> Result<Vec<RunRecord>> {
        self.inner.list_runs(task_id)
    }

    fn append_event(&self, event: &EventRecord) -> Result<()> {
        self.inner.append_event(event)
    }

    fn list_events(&self, project_id: Option<&str>, limit: usize) -> Result<Vec<EventRecord>> {
        self.inner.list_events(project_id, limit)
    }
}
