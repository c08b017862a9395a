//! Project classification.

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

use super::{Agent, CATEGORIES};
use crate::core::brief::ProjectBrief;
use crate::core::types::AgentKind;

const DEFAULT_CATEGORY: &str = "development";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub primary: String,
    #[serde(default)]
    pub secondary: Vec<String>,
    pub confidence: f64,
    pub rationale: String,
}

pub struct ClassifyAgent;

impl Agent for ClassifyAgent {
    type Input = ProjectBrief;
    type Output = Classification;

    const KIND: AgentKind = AgentKind::Classify;
    const OUTPUT_SCHEMA: &'static str = include_str!("../../schemas/classify_output.schema.json");
    const PROMPT: &'static str = include_str!("prompts/classify.md");

    fn validate(_input: &ProjectBrief, output: &Classification) -> Result<()> {
        if !CATEGORIES.contains(&output.primary.as_str()) {
            bail!("unknown primary category '{}'", output.primary);
        }
        if let Some(unknown) = output
            .secondary
            .iter()
            .find(|category| !CATEGORIES.contains(&category.as_str()))
        {
            bail!("unknown secondary category '{unknown}'");
        }
        if !(0.0..=1.0).contains(&output.confidence) {
            bail!("confidence {} outside 0..=1", output.confidence);
        }
        Ok(())
    }

    /// Trust the category hint when it names a known category.
    fn fallback(brief: &ProjectBrief) -> Classification {
        let hint = brief
            .category_guess
            .as_deref()
            .map(|guess| guess.trim().to_lowercase())
            .unwrap_or_default();
        let primary = if CATEGORIES.contains(&hint.as_str()) {
            hint
        } else {
            DEFAULT_CATEGORY.to_string()
        };
        let secondary = if primary == DEFAULT_CATEGORY {
            vec!["content".to_string()]
        } else {
            Vec::new()
        };
        Classification {
            primary,
            secondary,
            confidence: 0.4,
            rationale: "Heuristic classification based on category hint.".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::sample_brief;

    #[test]
    fn known_hint_becomes_primary_without_secondary() {
        let output = ClassifyAgent::fallback(&sample_brief(Some("design")));
        assert_eq!(output.primary, "design");
        assert!(output.secondary.is_empty());
        assert_eq!(output.confidence, 0.4);
    }

    #[test]
    fn unknown_hint_defaults_to_development_with_content() {
        let output = ClassifyAgent::fallback(&sample_brief(Some("marketing")));
        assert_eq!(output.primary, "development");
        assert_eq!(output.secondary, vec!["content".to_string()]);
        assert_eq!(output.confidence, 0.4);
    }

    #[test]
    fn hint_is_normalized() {
        let output = ClassifyAgent::fallback(&sample_brief(Some("  Data-ML ")));
        assert_eq!(output.primary, "data-ml");
    }

    #[test]
    fn missing_hint_defaults_to_development() {
        let output = ClassifyAgent::fallback(&sample_brief(None));
        assert_eq!(output.primary, "development");
    }
}
