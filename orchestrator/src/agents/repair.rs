//! Guardrailed repair proposals.
//!
//! The agent proposes patches; it never applies them. Whether a proposal may
//! proceed is decided afterwards by [`GuardrailPolicy::validate`].

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::Agent;
use crate::core::guardrail::{GuardrailPolicy, PatchFile};
use crate::core::types::AgentKind;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepairInput {
    pub run_id: String,
    pub task_id: String,
    pub triage: Value,
    pub policy: GuardrailPolicy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairProposal {
    pub summary: String,
    #[serde(default)]
    pub files: Vec<PatchFile>,
    #[serde(default)]
    pub tests: Vec<String>,
    pub stop: bool,
}

pub struct RepairAgent;

impl Agent for RepairAgent {
    type Input = RepairInput;
    type Output = RepairProposal;

    const KIND: AgentKind = AgentKind::Repair;
    const OUTPUT_SCHEMA: &'static str = include_str!("../../schemas/repair_output.schema.json");
    const PROMPT: &'static str = include_str!("prompts/repair.md");

    fn prompt_vars(input: &RepairInput) -> Map<String, Value> {
        let mut vars = Map::new();
        vars.insert(
            "max_changed_files".to_string(),
            Value::from(input.policy.max_changed_files),
        );
        vars.insert(
            "max_changed_lines".to_string(),
            Value::from(input.policy.max_changed_lines),
        );
        vars.insert(
            "allowed_path_prefixes".to_string(),
            Value::from(input.policy.allowed_path_prefixes.clone()),
        );
        vars
    }

    /// Guardrail limits are checked by the caller; here only the shape of a
    /// non-stopping proposal matters.
    fn validate(_input: &RepairInput, output: &RepairProposal) -> Result<()> {
        if !output.stop && output.files.is_empty() {
            bail!("proposal neither stops nor changes any file");
        }
        Ok(())
    }

    fn fallback(_input: &RepairInput) -> RepairProposal {
        RepairProposal {
            summary: "manual intervention required".to_string(),
            files: Vec::new(),
            tests: Vec::new(),
            stop: true,
        }
    }
}
