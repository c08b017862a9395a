//! Marker errors callers downcast from `anyhow::Error`.
//!
//! Everything else travels as plain `anyhow` context chains. These two exist
//! so the HTTP layer and the CLI can tell a missing record or a rejected input
//! apart from an internal failure.

use std::fmt;

/// A record required by an operation does not exist.
///
/// Raised for missing projects, briefs, plans, tasks and runs. It signals an
/// out-of-order or corrupted invocation and is never swallowed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingRecord {
    pub entity: &'static str,
    pub id: String,
}

impl MissingRecord {
    pub fn new(entity: &'static str, id: impl Into<String>) -> Self {
        Self {
            entity,
            id: id.into(),
        }
    }
}

impl fmt::Display for MissingRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} not found: {}", self.entity, self.id)
    }
}

impl std::error::Error for MissingRecord {}

/// Caller-supplied input failed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidInput {
    pub message: String,
}

impl InvalidInput {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for InvalidInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid input: {}", self.message)
    }
}

impl std::error::Error for InvalidInput {}
