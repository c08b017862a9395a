//! Static safety checks for automated repair patches.
//!
//! A patch set is accepted only when it is small and touches allowed paths.
//! Checks run in a fixed order (file count, changed lines, paths) and the
//! first failure wins, so a rejection reason is stable for a given input.

use serde::{Deserialize, Serialize};

/// Limits applied to a proposed patch set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardrailPolicy {
    pub max_changed_files: usize,
    pub max_changed_lines: usize,
    pub allowed_path_prefixes: Vec<String>,
}

impl Default for GuardrailPolicy {
    fn default() -> Self {
        Self {
            max_changed_files: 20,
            max_changed_lines: 400,
            allowed_path_prefixes: ["app/", "components/", "lib/", "tests/"]
                .into_iter()
                .map(str::to_string)
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchAction {
    Create,
    #[default]
    Update,
    Delete,
}

/// One file of a proposed patch, as a unified diff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchFile {
    pub path: String,
    #[serde(default)]
    pub action: PatchAction,
    pub patch: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardrailDecision {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl GuardrailDecision {
    pub fn accept() -> Self {
        Self {
            ok: true,
            reason: None,
        }
    }

    pub fn reject(reason: impl Into<String>) -> Self {
        Self {
            ok: false,
            reason: Some(reason.into()),
        }
    }
}

impl GuardrailPolicy {
    pub fn is_path_allowed(&self, path: &str) -> bool {
        self.allowed_path_prefixes
            .iter()
            .any(|prefix| path.starts_with(prefix.as_str()))
    }

    /// Validate a patch set against this policy.
    pub fn validate(&self, files: &[PatchFile]) -> GuardrailDecision {
        if files.len() > self.max_changed_files {
            return GuardrailDecision::reject(format!(
                "Too many files: {} > {}",
                files.len(),
                self.max_changed_files
            ));
        }

        let total_lines: usize = files.iter().map(|file| changed_lines(&file.patch)).sum();
        if total_lines > self.max_changed_lines {
            return GuardrailDecision::reject(format!(
                "Patch too large: {total_lines} lines > {}",
                self.max_changed_lines
            ));
        }

        if let Some(file) = files.iter().find(|file| !self.is_path_allowed(&file.path)) {
            return GuardrailDecision::reject(format!("Path not allowed: {}", file.path));
        }

        GuardrailDecision::accept()
    }
}

/// Count diff lines that add or remove content.
///
/// File headers (`+++`/`---`) are counted too; a header-only diff still costs
/// two lines against the budget.
pub fn changed_lines(patch: &str) -> usize {
    patch
        .split('\n')
        .filter(|line| line.starts_with('+') || line.starts_with('-'))
        .count()
}
