//! Shared deterministic types for orchestrator core logic.
//!
//! These enums are the stable vocabulary between the store, the step machine
//! and the HTTP surface. Their string forms are persisted, so renaming a
//! variant is a data migration.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::InvalidInput;

/// Position of a project in the delivery pipeline.
///
/// `intake -> planning -> estimated -> executing -> review`, with `done` and
/// `blocked` as terminal/paused stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Intake,
    Planning,
    Estimated,
    Executing,
    Review,
    Done,
    Blocked,
}

impl Stage {
    /// Stages the heartbeat advances.
    pub const ACTIVE: [Stage; 4] = [
        Stage::Intake,
        Stage::Planning,
        Stage::Estimated,
        Stage::Executing,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Intake => "intake",
            Stage::Planning => "planning",
            Stage::Estimated => "estimated",
            Stage::Executing => "executing",
            Stage::Review => "review",
            Stage::Done => "done",
            Stage::Blocked => "blocked",
        }
    }

    /// Parse a persisted stage. Unknown values (e.g. manual review statuses)
    /// yield `None`; they are valid data, just not part of the machine.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "intake" => Some(Stage::Intake),
            "planning" => Some(Stage::Planning),
            "estimated" => Some(Stage::Estimated),
            "executing" => Some(Stage::Executing),
            "review" => Some(Stage::Review),
            "done" => Some(Stage::Done),
            "blocked" => Some(Stage::Blocked),
            _ => None,
        }
    }

    pub fn is_active(self) -> bool {
        Self::ACTIVE.contains(&self)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tracker status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Backlog,
    InProgress,
    Review,
    Done,
    Blocked,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 5] = [
        TaskStatus::Backlog,
        TaskStatus::InProgress,
        TaskStatus::Review,
        TaskStatus::Done,
        TaskStatus::Blocked,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Backlog => "backlog",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Review => "review",
            TaskStatus::Done => "done",
            TaskStatus::Blocked => "blocked",
        }
    }

    /// Done or awaiting review; counts toward moving the project to review.
    pub fn is_finished(self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Review)
    }
}

impl FromStr for TaskStatus {
    type Err = InvalidInput;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        TaskStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == raw)
            .ok_or_else(|| InvalidInput::new(format!("unknown task status '{raw}'")))
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of one execution attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Queued,
    Running,
    Passed,
    Failed,
    NeedsReview,
    Stopped,
}

impl RunState {
    pub const ALL: [RunState; 6] = [
        RunState::Queued,
        RunState::Running,
        RunState::Passed,
        RunState::Failed,
        RunState::NeedsReview,
        RunState::Stopped,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Queued => "queued",
            RunState::Running => "running",
            RunState::Passed => "passed",
            RunState::Failed => "failed",
            RunState::NeedsReview => "needs_review",
            RunState::Stopped => "stopped",
        }
    }
}

impl FromStr for RunState {
    type Err = InvalidInput;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        RunState::ALL
            .into_iter()
            .find(|state| state.as_str() == raw)
            .ok_or_else(|| InvalidInput::new(format!("unknown run state '{raw}'")))
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind tag of an audit event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Intake,
    Classification,
    Planning,
    Estimate,
    TaskUpdate,
    RunUpdate,
    Repair,
    Triage,
    Tracker,
    Guardrail,
    StatusOverride,
}

impl EventKind {
    pub const ALL: [EventKind; 11] = [
        EventKind::Intake,
        EventKind::Classification,
        EventKind::Planning,
        EventKind::Estimate,
        EventKind::TaskUpdate,
        EventKind::RunUpdate,
        EventKind::Repair,
        EventKind::Triage,
        EventKind::Tracker,
        EventKind::Guardrail,
        EventKind::StatusOverride,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Intake => "intake",
            EventKind::Classification => "classification",
            EventKind::Planning => "planning",
            EventKind::Estimate => "estimate",
            EventKind::TaskUpdate => "task_update",
            EventKind::RunUpdate => "run_update",
            EventKind::Repair => "repair",
            EventKind::Triage => "triage",
            EventKind::Tracker => "tracker",
            EventKind::Guardrail => "guardrail",
            EventKind::StatusOverride => "status_override",
        }
    }
}

impl FromStr for EventKind {
    type Err = InvalidInput;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        EventKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == raw)
            .ok_or_else(|| InvalidInput::new(format!("unknown event kind '{raw}'")))
    }
}

/// Generation agents reachable through the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    Brief,
    Classify,
    Plan,
    Estimate,
    Triage,
    Repair,
}

impl AgentKind {
    pub const ALL: [AgentKind; 6] = [
        AgentKind::Brief,
        AgentKind::Classify,
        AgentKind::Plan,
        AgentKind::Estimate,
        AgentKind::Triage,
        AgentKind::Repair,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentKind::Brief => "brief",
            AgentKind::Classify => "classify",
            AgentKind::Plan => "plan",
            AgentKind::Estimate => "estimate",
            AgentKind::Triage => "triage",
            AgentKind::Repair => "repair",
        }
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Action performed by a state-changing step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepAction {
    Classification,
    Planning,
    Estimation,
    RunStarted,
    CompletedTasks,
}
