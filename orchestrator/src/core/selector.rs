//! Deterministic decision logic for the executing stage.

use anyhow::Result;

use crate::core::types::TaskStatus;
use crate::model::TaskRecord;

/// What the executing stage should do next.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutingDecision<'a> {
    NoTasks,
    StartRun(&'a TaskRecord),
    RepairExhausted(&'a TaskRecord),
    AllComplete,
    WaitingForCi,
}

/// Sort tasks into the stable order used for selection (created_at, then id).
pub fn sort_tasks(tasks: &mut [TaskRecord]) {
    tasks.sort_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| a.id.cmp(&b.id))
    });
}

/// Decide the executing-stage action.
///
/// Priority is fixed: no tasks, first backlog task, first blocked task whose
/// attempts are exhausted, all finished, otherwise wait. `tasks` must already
/// be in [`sort_tasks`] order. `exhausted` is consulted only for blocked tasks
/// and only when no backlog task exists.
pub fn decide_executing<'a, F>(tasks: &'a [TaskRecord], mut exhausted: F) -> Result<ExecutingDecision<'a>>
where
    F: FnMut(&TaskRecord) -> Result<bool>,
{
    if tasks.is_empty() {
        return Ok(ExecutingDecision::NoTasks);
    }

    if let Some(task) = tasks.iter().find(|task| task.status == TaskStatus::Backlog) {
        return Ok(ExecutingDecision::StartRun(task));
    }

    for task in tasks.iter().filter(|task| task.status == TaskStatus::Blocked) {
        if exhausted(task)? {
            return Ok(ExecutingDecision::RepairExhausted(task));
        }
    }

    if tasks.iter().all(|task| task.status.is_finished()) {
        return Ok(ExecutingDecision::AllComplete);
    }

    Ok(ExecutingDecision::WaitingForCi)
}
