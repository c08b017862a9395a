//! Run ledger: execution attempts per task.
//!
//! Attempt numbers are assigned by the store inside one atomic
//! read-max-and-insert, so they stay gapless per task even when two callers
//! start a run for the same task at once.

use anyhow::{Context, Result};
use chrono::Utc;
use serde_json::Value;
use tracing::{info, instrument};

use crate::context::Orchestrator;
use crate::core::types::RunState;
use crate::error::MissingRecord;
use crate::io::store::{NewRun, RunPatch};
use crate::model::{RunRecord, TaskRecord, new_id};

/// Caller-supplied fields for a new run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunMetadata {
    pub branch: Option<String>,
    /// Stored as the run's initial result.
    pub result: Option<Value>,
}

/// A run with its owning task and project, as far as they resolve.
#[derive(Debug, Clone, PartialEq)]
pub struct RunChain {
    pub run: RunRecord,
    pub task: Option<TaskRecord>,
}

impl RunChain {
    pub fn project_id(&self) -> Option<&str> {
        self.task.as_ref().map(|task| task.project_id.as_str())
    }
}

impl Orchestrator {
    /// Queue the next attempt for `task_id`.
    #[instrument(skip(self, metadata))]
    pub fn start_run(&self, task_id: &str, metadata: RunMetadata) -> Result<RunRecord> {
        let run = self
            .store
            .insert_run_next_attempt(&NewRun {
                id: new_id(),
                task_id: task_id.to_string(),
                state: RunState::Queued,
                branch: metadata.branch,
                result: metadata.result,
                created_at: Utc::now(),
            })
            .with_context(|| format!("start run for task {task_id}"))?;
        info!(run_id = %run.id, attempt = run.attempt, "run queued");
        Ok(run)
    }

    /// Set a run's state and replace its result payload.
    pub fn mark_run_state(&self, run_id: &str, state: RunState, result: Option<Value>) -> Result<()> {
        let patch = RunPatch {
            state: Some(state),
            result: Some(result.unwrap_or(Value::Null)),
            ..RunPatch::default()
        };
        self.store
            .update_run(run_id, &patch, Utc::now())
            .with_context(|| format!("mark run {run_id} {state}"))
    }

    /// True once the highest recorded attempt reaches the configured ceiling.
    pub fn attempts_exhausted(&self, task_id: &str) -> Result<bool> {
        let max = self.store.max_attempt(task_id)?;
        Ok(max.is_some_and(|attempt| attempt >= self.settings.max_attempts))
    }

    /// Load a run and its task. A missing run is an error; a missing task is
    /// tolerated so webhook deliveries for orphaned runs are still recorded.
    pub fn resolve_run_chain(&self, run_id: &str) -> Result<RunChain> {
        let run = self
            .store
            .get_run(run_id)?
            .ok_or_else(|| MissingRecord::new("run", run_id))?;
        let task = self.store.get_task(&run.task_id)?;
        Ok(RunChain { run, task })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use serde_json::json;

    use super::*;
    use crate::context::Settings;
    use crate::test_support::{memory_orchestrator, memory_orchestrator_with, task_record};

    #[test]
    fn attempts_start_at_zero_and_increase() {
        let orchestrator = memory_orchestrator();
        let attempts: Vec<u32> = (0..4)
            .map(|_| {
                orchestrator
                    .start_run("p/t1", RunMetadata::default())
                    .expect("start")
                    .attempt
            })
            .collect();
        assert_eq!(attempts, vec![0, 1, 2, 3]);

        let other = orchestrator
            .start_run("p/t2", RunMetadata::default())
            .expect("start");
        assert_eq!(other.attempt, 0);
        assert_eq!(other.state, RunState::Queued);
    }

    #[test]
    fn exhaustion_follows_configured_ceiling() {
        let orchestrator = memory_orchestrator_with(Settings {
            max_attempts: 3,
            ..Settings::default()
        });
        assert!(!orchestrator.attempts_exhausted("p/t1").expect("exhausted"));
        for _ in 0..3 {
            orchestrator
                .start_run("p/t1", RunMetadata::default())
                .expect("start");
        }
        // attempts 0, 1, 2
        assert!(!orchestrator.attempts_exhausted("p/t1").expect("exhausted"));
        orchestrator
            .start_run("p/t1", RunMetadata::default())
            .expect("start");
        assert!(orchestrator.attempts_exhausted("p/t1").expect("exhausted"));
    }

    #[test]
    fn default_ceiling_is_six() {
        let orchestrator = memory_orchestrator();
        for _ in 0..6 {
            orchestrator
                .start_run("p/t1", RunMetadata::default())
                .expect("start");
        }
        assert!(!orchestrator.attempts_exhausted("p/t1").expect("exhausted"));
        orchestrator
            .start_run("p/t1", RunMetadata::default())
            .expect("start");
        assert!(orchestrator.attempts_exhausted("p/t1").expect("exhausted"));
    }

    #[test]
    fn mark_run_state_replaces_result() {
        let orchestrator = memory_orchestrator();
        let run = orchestrator
            .start_run(
                "p/t1",
                RunMetadata {
                    branch: Some("feat/login".to_string()),
                    result: Some(json!({"source": "api"})),
                },
            )
            .expect("start");
        orchestrator
            .mark_run_state(&run.id, RunState::Passed, Some(json!({"ok": true})))
            .expect("mark");
        let chain = orchestrator.resolve_run_chain(&run.id).expect("chain");
        assert_eq!(chain.run.state, RunState::Passed);
        assert_eq!(chain.run.result, Some(json!({"ok": true})));
        assert_eq!(chain.run.branch.as_deref(), Some("feat/login"));
        assert!(chain.run.updated_at >= run.updated_at);
    }

    #[test]
    fn unknown_run_is_missing_record() {
        let orchestrator = memory_orchestrator();
        let err = orchestrator.resolve_run_chain("nope").unwrap_err();
        assert!(err.downcast_ref::<MissingRecord>().is_some());
        let err = orchestrator
            .mark_run_state("nope", RunState::Failed, None)
            .unwrap_err();
        assert!(err.downcast_ref::<MissingRecord>().is_some());
    }

    #[test]
    fn chain_resolves_project_through_task() {
        let orchestrator = memory_orchestrator();
        orchestrator
            .store()
            .insert_tasks(&[task_record("p1/t1", "p1")])
            .expect("tasks");
        let run = orchestrator
            .start_run("p1/t1", RunMetadata::default())
            .expect("start");
        let chain = orchestrator.resolve_run_chain(&run.id).expect("chain");
        assert_eq!(chain.project_id(), Some("p1"));
    }

    #[test]
    fn concurrent_starts_never_share_an_attempt() {
        let orchestrator = Arc::new(memory_orchestrator());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let orchestrator = Arc::clone(&orchestrator);
                thread::spawn(move || {
                    orchestrator
                        .start_run("p/t1", RunMetadata::default())
                        .expect("start")
                        .attempt
                })
            })
            .collect();
        let mut attempts: Vec<u32> = handles
            .into_iter()
            .map(|handle| handle.join().expect("join"))
            .collect();
        attempts.sort_unstable();
        assert_eq!(attempts, (0..8).collect::<Vec<_>>());
    }
}
