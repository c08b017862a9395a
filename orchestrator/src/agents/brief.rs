//! Intake brief writer.

use anyhow::{Result, bail};

use super::Agent;
use crate::core::brief::{IntakeRequest, ProjectBrief};
use crate::core::types::AgentKind;

const MAX_SCOPE_ITEMS: usize = 6;
const MIN_SUMMARY_CHARS: usize = 10;

pub struct BriefAgent;

impl Agent for BriefAgent {
    type Input = IntakeRequest;
    type Output = ProjectBrief;

    const KIND: AgentKind = AgentKind::Brief;
    const OUTPUT_SCHEMA: &'static str = include_str!("../../schemas/brief_output.schema.json");
    const PROMPT: &'static str = include_str!("prompts/brief.md");

    fn validate(_input: &IntakeRequest, output: &ProjectBrief) -> Result<()> {
        if output.title.trim().is_empty() {
            bail!("brief title is empty");
        }
        if output.summary.trim().chars().count() < MIN_SUMMARY_CHARS {
            bail!("brief summary shorter than {MIN_SUMMARY_CHARS} characters");
        }
        if output.scope.len() > MAX_SCOPE_ITEMS {
            bail!("brief scope has {} items (max {MAX_SCOPE_ITEMS})", output.scope.len());
        }
        Ok(())
    }

    /// Derive the brief from the submission text: one scope item per
    /// non-empty description line.
    fn fallback(request: &IntakeRequest) -> ProjectBrief {
        let scope = request
            .description
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .take(MAX_SCOPE_ITEMS)
            .map(str::to_string)
            .collect();
        ProjectBrief {
            project_id: None,
            title: request.title.trim().to_string(),
            summary: request.description.trim().to_string(),
            scope,
            constraints: Vec::new(),
            success_criteria: Vec::new(),
            category_guess: request.category_hint.clone(),
            clarifying_questions: vec![
                "What does success look like for this project?".to_string(),
                "Are there hard deadlines or budget limits we should plan around?".to_string(),
                "Who signs off on the final deliverable?".to_string(),
            ],
            attachments: request.attachments.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::brief::Attachment;
    use crate::test_support::intake_request;

    #[test]
    fn fallback_uses_description_lines_as_scope() {
        let mut request = intake_request("Website refresh", Some("design"));
        request.description = "  Refresh the landing page\n\n- new hero\n- pricing table\n".to_string();
        request.attachments = vec![Attachment {
            url: "https://example.com/mock.png".to_string(),
            name: "mock".to_string(),
        }];

        let brief = BriefAgent::fallback(&request);
        assert_eq!(brief.summary, "Refresh the landing page\n\n- new hero\n- pricing table");
        assert_eq!(
            brief.scope,
            vec!["Refresh the landing page", "- new hero", "- pricing table"]
        );
        assert_eq!(brief.category_guess.as_deref(), Some("design"));
        assert_eq!(brief.clarifying_questions.len(), 3);
        assert_eq!(brief.attachments, request.attachments);
    }

    #[test]
    fn fallback_caps_scope() {
        let mut request = intake_request("Many lines", None);
        request.description = (0..10).map(|i| format!("line {i}\n")).collect();
        assert_eq!(BriefAgent::fallback(&request).scope.len(), MAX_SCOPE_ITEMS);
    }

    #[test]
    fn short_generated_summary_is_rejected() {
        let request = intake_request("Title", None);
        let mut brief = BriefAgent::fallback(&request);
        brief.summary = "too short".to_string();
        assert!(BriefAgent::validate(&request, &brief).is_err());
    }
}
