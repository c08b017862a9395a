//! Deterministic, pure logic shared by the orchestrator.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod brief;
pub mod guardrail;
pub mod plan;
pub mod seeding;
pub mod selector;
pub mod types;
