//! Analysis stage: extracts key points and themes from the research findings.

use std::sync::Arc;

use briefline_core::text::clean_stage_text;
use briefline_core::{ChatModel, StageKind};
use tracing::info;

use crate::agent::AssistantAgent;
use crate::stage::{StageOutput, run_stage};

pub const ANALYSIS_SYSTEM_MESSAGE: &str = "You are the Analysis Agent. Given research results (JSON text), extract key points, themes, and patterns.";

/// Output used when the analysis call fails.
pub const ANALYSIS_FALLBACK: &str = "{}";

pub fn build_analysis_agent(model: Arc<dyn ChatModel>) -> AssistantAgent {
    AssistantAgent::new(
        StageKind::Analysis.agent_name(),
        ANALYSIS_SYSTEM_MESSAGE,
        model,
    )
}

pub fn analysis_prompt(research_text: &str) -> String {
    format!(
        "Analyze the following research data (JSON format). \
         Return a JSON with 'key_points', 'themes', and 'summary'. \
         RESEARCH_DATA:\n{research_text}"
    )
}

pub async fn run_analysis(agent: &AssistantAgent, research_text: &str) -> StageOutput {
    info!("analyzing research data");
    run_stage(
        StageKind::Analysis,
        agent,
        &analysis_prompt(research_text),
        clean_stage_text,
        || ANALYSIS_FALLBACK.to_string(),
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedModel;
    use briefline_core::{BriefError, ChatMessage, ChatResponse};
    use serde_json::json;

    #[tokio::test]
    async fn analysis_reads_mapping_usage() {
        let usage = briefline_core::Usage::from_value(json!({"usage": {"total_tokens": 17}}))
            .expect("object usage");
        let model = ScriptedModel::new(vec![Ok(
            ChatResponse::text("{\"key_points\": [], \"themes\": [], \"summary\": \"ok\"}")
                .with_usage(usage),
        )]);
        let agent = build_analysis_agent(model.clone());

        let output = run_analysis(&agent, "[]").await;
        assert_eq!(output.tokens, 17);
        assert!(output.text.contains("\"summary\": \"ok\""));

        let requests = model.requests();
        assert!(requests[0].tools.is_empty());
        let ChatMessage::User(prompt) = &requests[0].messages[1] else {
            panic!("expected user prompt");
        };
        assert!(prompt.ends_with("RESEARCH_DATA:\n[]"));
    }

    #[tokio::test]
    async fn failure_returns_empty_object_with_zero_tokens() {
        let model = ScriptedModel::new(vec![Err(BriefError::MalformedResponse("nope".into()))]);
        let agent = build_analysis_agent(model);

        let output = run_analysis(&agent, "[]").await;
        assert_eq!(output.text, ANALYSIS_FALLBACK);
        assert_eq!(output.tokens, 0);
        assert!(output.fell_back);
    }
}
