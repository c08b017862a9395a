//! CI failure triage.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::Agent;
use crate::core::types::AgentKind;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriageInput {
    pub ci_log: String,
    #[serde(default)]
    pub failing_tests: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Triage {
    pub root_cause: String,
    #[serde(default)]
    pub impacted_files: Vec<String>,
    pub proposed_fix: String,
    pub risk_level: RiskLevel,
    #[serde(default)]
    pub qa_focus: Vec<String>,
}

pub struct TriageAgent;

impl Agent for TriageAgent {
    type Input = TriageInput;
    type Output = Triage;

    const KIND: AgentKind = AgentKind::Triage;
    const OUTPUT_SCHEMA: &'static str = include_str!("../../schemas/triage_output.schema.json");
    const PROMPT: &'static str = include_str!("prompts/triage.md");

    fn validate(_input: &TriageInput, _output: &Triage) -> Result<()> {
        Ok(())
    }

    fn fallback(input: &TriageInput) -> Triage {
        let root_cause = match input.failing_tests.first() {
            Some(test) => format!("Failure in test {test}"),
            None => "Refer to CI logs".to_string(),
        };
        Triage {
            root_cause,
            impacted_files: Vec::new(),
            proposed_fix: "Review CI logs manually. Auto triage unavailable without LLM."
                .to_string(),
            risk_level: RiskLevel::Medium,
            qa_focus: input.failing_tests.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_names_first_failing_test() {
        let input = TriageInput {
            ci_log: "FAIL auth.spec.ts".to_string(),
            failing_tests: vec!["auth.spec.ts".to_string(), "cart.spec.ts".to_string()],
        };
        let triage = TriageAgent::fallback(&input);
        assert_eq!(triage.root_cause, "Failure in test auth.spec.ts");
        assert_eq!(triage.risk_level, RiskLevel::Medium);
        assert_eq!(triage.qa_focus, input.failing_tests);
        assert!(triage.impacted_files.is_empty());
    }

    #[test]
    fn fallback_without_tests_points_at_logs() {
        let input = TriageInput {
            ci_log: String::new(),
            failing_tests: Vec::new(),
        };
        assert_eq!(TriageAgent::fallback(&input).root_cause, "Refer to CI logs");
    }

    #[test]
    fn output_uses_camel_case_keys() {
        let value = serde_json::to_value(TriageAgent::fallback(&TriageInput {
            ci_log: String::new(),
            failing_tests: vec!["x".to_string()],
        }))
        .expect("serialize");
        assert_eq!(value["riskLevel"], "medium");
        assert_eq!(value["qaFocus"][0], "x");
    }
}
