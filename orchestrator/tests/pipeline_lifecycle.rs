//! End-to-end pipeline tests through the public library API.
//!
//! Drives a project from intake to review with no agent backend configured,
//! so every agent answers with its deterministic fallback, then feeds CI
//! webhook deliveries back in.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use orchestrator::core::brief::IntakeRequest;
use orchestrator::core::types::{EventKind, RunState, StepAction, TaskStatus};
use orchestrator::io::config::{OrchestratorConfig, StoreBackend};
use orchestrator::io::store::{SqliteStore, Store};
use orchestrator::agents::AgentGateway;
use orchestrator::test_support::memory_orchestrator;
use orchestrator::webhooks::{CiStatus, CiWebhook};
use orchestrator::{Orchestrator, Settings};

fn request(hint: &str) -> IntakeRequest {
    IntakeRequest {
        title: "Partner onboarding portal".to_string(),
        description: "Let partners sign up.\nCollect tax documents.\nShow payout history."
            .to_string(),
        category_hint: Some(hint.to_string()),
        due_date: Some("2026-12-15".to_string()),
        owner: Some("ops@example.com".to_string()),
        attachments: Vec::new(),
    }
}

fn ci(run_id: &str, status: CiStatus) -> CiWebhook {
    CiWebhook {
        run_id: run_id.to_string(),
        status,
        ci_url: Some(format!("https://ci.example/{run_id}")),
        logs: None,
        preview_url: None,
    }
}

/// Intake (which steps once) plus four more steps, fallbacks only:
///
/// 1. intake → classification (inside intake) → planning
/// 2. planning → estimated
/// 3. estimated → executing, two tasks seeded at 8h
/// 4. executing → run started for the first task
/// 5. executing → run started for the second task
#[test]
fn intake_then_four_steps_reaches_executing_with_seeded_tasks() {
    let orchestrator = memory_orchestrator();
    let outcome = orchestrator.intake(&request("development")).expect("intake");
    let project_id = outcome.project_id.clone();
    assert_eq!(outcome.next.stage, "planning");

    let project = orchestrator
        .store()
        .get_project(&project_id)
        .expect("get")
        .expect("project");
    assert_eq!(project.project_type.as_deref(), Some("development"));

    let planning = orchestrator.step(&project_id).expect("plan");
    assert_eq!(planning.action, Some(StepAction::Planning));
    let estimation = orchestrator.step(&project_id).expect("estimate");
    assert_eq!(estimation.stage, "executing");
    let first = orchestrator.step(&project_id).expect("first run");
    assert_eq!(first.action, Some(StepAction::RunStarted));
    let second = orchestrator.step(&project_id).expect("second run");
    assert_eq!(second.action, Some(StepAction::RunStarted));

    let project = orchestrator
        .store()
        .get_project(&project_id)
        .expect("get")
        .expect("project");
    assert_eq!(project.stage, "executing");

    let plan = orchestrator
        .store()
        .latest_plan(&project_id)
        .expect("plan")
        .expect("present");
    assert_eq!(plan.milestones.len(), 1);
    assert!(plan.estimates.is_some());

    let tasks = orchestrator.store().list_tasks(&project_id).expect("tasks");
    assert_eq!(tasks.len(), 2);
    for task in &tasks {
        assert_eq!(task.estimate_hours, Some(8.0));
        assert_eq!(task.status, TaskStatus::InProgress);
        let attempts: Vec<u32> = orchestrator
            .store()
            .list_runs(&task.id)
            .expect("runs")
            .iter()
            .map(|run| run.attempt)
            .collect();
        assert_eq!(attempts, vec![0]);
    }

    let mut kinds: Vec<EventKind> = orchestrator
        .recent_events(Some(&project_id), 100)
        .expect("events")
        .into_iter()
        .map(|event| event.kind)
        .collect();
    kinds.reverse();
    assert_eq!(
        kinds,
        vec![
            EventKind::Intake,
            EventKind::Classification,
            EventKind::Planning,
            EventKind::TaskUpdate,
            EventKind::Estimate,
            EventKind::RunUpdate,
            EventKind::RunUpdate,
        ]
    );
}

#[test]
fn ci_results_drive_project_to_review() {
    let orchestrator = memory_orchestrator();
    let project_id = orchestrator
        .intake(&request("design"))
        .expect("intake")
        .project_id;
    for _ in 0..4 {
        orchestrator.step(&project_id).expect("step");
    }

    let tasks = orchestrator.store().list_tasks(&project_id).expect("tasks");
    let runs: Vec<String> = tasks
        .iter()
        .map(|task| orchestrator.store().list_runs(&task.id).expect("runs")[0].id.clone())
        .collect();

    let waiting = orchestrator.step(&project_id).expect("step");
    assert_eq!(waiting.notes.as_deref(), Some("Waiting for CI"));

    orchestrator.ingest_ci(&ci(&runs[0], CiStatus::Passed)).expect("ci");
    let still_waiting = orchestrator.step(&project_id).expect("step");
    assert_eq!(still_waiting.stage, "executing");

    orchestrator.ingest_ci(&ci(&runs[1], CiStatus::Passed)).expect("ci");
    let done = orchestrator.step(&project_id).expect("step");
    assert_eq!(done.stage, "review");
    assert_eq!(done.action, Some(StepAction::CompletedTasks));

    let idle = orchestrator.step(&project_id).expect("step");
    assert_eq!(idle.stage, "review");
    assert_eq!(idle.action, None);
}

#[test]
fn failed_task_is_retried_until_exhausted() {
    let orchestrator = Orchestrator::new(
        Arc::new(orchestrator::io::store::MemoryStore::new()),
        AgentGateway::fallback_only(),
        Settings {
            max_attempts: 2,
            ..Settings::default()
        },
    );
    let project_id = orchestrator
        .intake(&request("research"))
        .expect("intake")
        .project_id;
    orchestrator.step(&project_id).expect("plan");
    orchestrator.step(&project_id).expect("estimate");

    let tasks = orchestrator.store().list_tasks(&project_id).expect("tasks");
    for task in &tasks {
        orchestrator
            .update_task_status(&task.id, TaskStatus::Done)
            .expect("done");
    }
    let blocked = &tasks[0];
    orchestrator
        .update_task_status(&blocked.id, TaskStatus::Blocked)
        .expect("block");

    for _ in 0..3 {
        let run = orchestrator.start_task_run(&blocked.id, None).expect("run");
        orchestrator
            .triage_failure(&run.id, "FAIL signup.spec.ts", None)
            .expect("triage");
    }
    assert!(orchestrator.attempts_exhausted(&blocked.id).expect("exhausted"));
    let runs = orchestrator.store().list_runs(&blocked.id).expect("runs");
    assert!(runs.iter().all(|run| run.state == RunState::Failed));

    let result = orchestrator.step(&project_id).expect("step");
    assert!(result.is_exhausted());
    assert_eq!(result.stage, "executing");
}

#[test]
fn sqlite_store_survives_reopen_between_steps() {
    let temp = tempfile::tempdir().expect("tempdir");
    let mut config = OrchestratorConfig::default();
    config.store.backend = StoreBackend::Sqlite;
    config.store.fallback_to_memory = false;

    let project_id = {
        let (orchestrator, health) =
            Orchestrator::from_config(temp.path(), &config).expect("open");
        assert!(health.is_healthy());
        orchestrator
            .intake(&request("content"))
            .expect("intake")
            .project_id
    };

    let (orchestrator, _) = Orchestrator::from_config(temp.path(), &config).expect("reopen");
    orchestrator.step(&project_id).expect("plan");
    orchestrator.step(&project_id).expect("estimate");

    let store = SqliteStore::open(&config.store_path(temp.path()), Duration::from_secs(1))
        .expect("direct open");
    let ids: HashSet<String> = store
        .list_tasks(&project_id)
        .expect("tasks")
        .into_iter()
        .map(|task| task.id)
        .collect();
    assert_eq!(
        ids,
        HashSet::from([format!("{project_id}/t1"), format!("{project_id}/t2")])
    );
}
