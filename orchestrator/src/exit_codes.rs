//! Stable exit codes for orchestrator CLI commands.

/// Command succeeded or a step performed an action.
pub const OK: i32 = 0;
/// Command failed due to invalid config/input, a missing record or other errors.
pub const INVALID: i32 = 1;
/// `orchestrator step` took no action (idle stage, no tasks, waiting for CI).
pub const NO_ACTION: i32 = 2;
/// `orchestrator step` found a blocked task whose repair attempts are exhausted.
pub const EXHAUSTED: i32 = 3;
