//! Direct run control: starting runs, triaging failures, proposing repairs.

use std::sync::LazyLock;

use anyhow::{Context, Result};
use chrono::Utc;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{info, instrument, warn};

use crate::agents::repair::{RepairAgent, RepairInput, RepairProposal};
use crate::agents::triage::{Triage, TriageAgent, TriageInput};
use crate::context::Orchestrator;
use crate::core::guardrail::GuardrailDecision;
use crate::core::types::{EventKind, RunState, TaskStatus};
use crate::error::MissingRecord;
use crate::io::store::RunPatch;
use crate::ledger::{RunChain, RunMetadata};
use crate::model::RunRecord;

static FAILING_TEST_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*(?:FAIL|✗)\s+(\S.*?)\s*$").expect("valid failing test pattern")
});

/// Test names reported on `FAIL <name>` or `✗ <name>` lines, first
/// occurrence order, without duplicates.
pub fn extract_failing_tests(ci_log: &str) -> Vec<String> {
    let mut tests: Vec<String> = Vec::new();
    for captures in FAILING_TEST_RE.captures_iter(ci_log) {
        let name = captures[1].to_string();
        if !tests.contains(&name) {
            tests.push(name);
        }
    }
    tests
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriageOutcome {
    pub run_id: String,
    pub failing_tests: Vec<String>,
    pub triage: Triage,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairOutcome {
    pub proposal: RepairProposal,
    /// `None` when the proposal stopped before any patch was checked.
    pub guardrail: Option<GuardrailDecision>,
}

impl Orchestrator {
    /// Queue a run for an existing task outside the step machine.
    #[instrument(skip(self, metadata))]
    pub fn start_task_run(&self, task_id: &str, metadata: Option<Value>) -> Result<RunRecord> {
        let task = self
            .store
            .get_task(task_id)?
            .ok_or_else(|| MissingRecord::new("task", task_id))?;
        let run = self.start_run(
            &task.id,
            RunMetadata {
                branch: None,
                result: Some(metadata.unwrap_or_else(|| json!({}))),
            },
        )?;
        self.record_event(
            Some(&task.project_id),
            EventKind::RunUpdate,
            json!({ "runId": run.id, "taskId": task.id, "state": run.state }),
        )?;
        Ok(run)
    }

    /// Triage a failed CI run: the run fails, its task is blocked.
    ///
    /// Without explicit `failing_tests` the names are taken from the log.
    #[instrument(skip(self, ci_log, failing_tests))]
    pub fn triage_failure(
        &self,
        run_id: &str,
        ci_log: &str,
        failing_tests: Option<Vec<String>>,
    ) -> Result<TriageOutcome> {
        let chain = self.resolve_run_chain(run_id)?;
        let failing_tests = failing_tests.unwrap_or_else(|| extract_failing_tests(ci_log));
        let triage = self.gateway.invoke::<TriageAgent>(&TriageInput {
            ci_log: ci_log.to_string(),
            failing_tests: failing_tests.clone(),
        });

        let now = Utc::now();
        let patch = RunPatch {
            state: Some(RunState::Failed),
            logs: Some(ci_log.to_string()),
            result: Some(json!({ "triage": triage, "failingTests": failing_tests })),
            ..RunPatch::default()
        };
        self.store
            .update_run(run_id, &patch, now)
            .with_context(|| format!("record triage on run {run_id}"))?;
        self.block_task(&chain)?;

        self.record_event(
            chain.project_id(),
            EventKind::Triage,
            json!({ "runId": run_id, "triage": triage }),
        )?;
        info!(root_cause = %triage.root_cause, "run triaged");
        Ok(TriageOutcome {
            run_id: run_id.to_string(),
            failing_tests,
            triage,
        })
    }

    /// Ask for a repair and gate it through the guardrail.
    ///
    /// Stopping proposals and guardrail rejections leave the run in
    /// `needs_review`; accepted proposals move it back to `running`.
    #[instrument(skip(self, triage))]
    pub fn propose_repair(&self, run_id: &str, triage: Value) -> Result<RepairOutcome> {
        let chain = self.resolve_run_chain(run_id)?;
        let proposal = self.gateway.invoke::<RepairAgent>(&RepairInput {
            run_id: run_id.to_string(),
            task_id: chain.run.task_id.clone(),
            triage: triage.clone(),
            policy: self.settings.guardrail.clone(),
        });

        let (state, guardrail) = if proposal.stop {
            (RunState::NeedsReview, None)
        } else {
            let decision = self.settings.guardrail.validate(&proposal.files);
            self.record_event(
                chain.project_id(),
                EventKind::Guardrail,
                json!({ "runId": run_id, "decision": decision }),
            )?;
            if decision.ok {
                (RunState::Running, Some(decision))
            } else {
                warn!(reason = decision.reason.as_deref().unwrap_or(""), "repair rejected by guardrail");
                (RunState::NeedsReview, Some(decision))
            }
        };

        let mut result = json!({ "triage": triage, "proposal": proposal });
        if let Some(decision) = &guardrail {
            result["guardrail"] = serde_json::to_value(decision)?;
        }
        self.mark_run_state(run_id, state, Some(result))?;
        self.record_event(
            chain.project_id(),
            EventKind::Repair,
            json!({ "runId": run_id, "proposal": proposal }),
        )?;

        Ok(RepairOutcome {
            proposal,
            guardrail,
        })
    }

    fn block_task(&self, chain: &RunChain) -> Result<()> {
        match &chain.task {
            Some(task) => self
                .store
                .update_task_status(&task.id, TaskStatus::Blocked, Utc::now())
                .with_context(|| format!("block task {}", task.id)),
            None => {
                warn!(task_id = %chain.run.task_id, "run has no task; status left alone");
                Ok(())
            }
        }
    }
}
