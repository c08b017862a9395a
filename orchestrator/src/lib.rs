//! Project orchestrator: advances projects through
//! `intake -> planning -> estimated -> executing -> review`.
//!
//! The crate keeps a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (stage vocabulary, guardrail checks,
//!   executing-stage decisions, task seeding). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (config files, the relational store,
//!   agent backends, child processes).
//! - **[`agents`]**: Typed generation agents with deterministic fallbacks, run
//!   through the [`agents::AgentGateway`].
//!
//! Orchestration modules ([`step`], [`intake`], [`devops`], [`webhooks`],
//! [`tracker`], [`heartbeat`]) add operations to [`Orchestrator`] and coordinate
//! core logic with I/O. Every state change is recorded in the event log
//! ([`events`]).

pub mod agents;
pub mod context;
pub mod core;
pub mod devops;
pub mod error;
pub mod events;
pub mod exit_codes;
pub mod heartbeat;
pub mod intake;
pub mod io;
pub mod ledger;
pub mod logging;
pub mod model;
pub mod step;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod tracker;
pub mod webhooks;

pub use context::{Orchestrator, Settings};
pub use step::StepResult;
