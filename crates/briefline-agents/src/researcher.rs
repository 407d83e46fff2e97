//! Research stage: gathers raw findings on a topic with the search tools.

use std::sync::Arc;

use briefline_core::text::clean_stage_text;
use briefline_core::{ChatModel, StageKind, ToolSet};
use tracing::info;

use crate::agent::AssistantAgent;
use crate::stage::{StageOutput, run_stage};

pub const RESEARCH_SYSTEM_MESSAGE: &str = "You are the Research Agent. Use the web_search tool to find up-to-date information about the topic and return concise JSON-formatted findings.";

/// Output used when the research call fails.
pub const RESEARCH_FALLBACK: &str = "[]";

pub fn build_research_agent(
    model: Arc<dyn ChatModel>,
    tools: &ToolSet,
    max_tool_rounds: usize,
) -> AssistantAgent {
    AssistantAgent::new(
        StageKind::Research.agent_name(),
        RESEARCH_SYSTEM_MESSAGE,
        model,
    )
    .with_tools(tools.tools().to_vec())
    .with_max_tool_rounds(max_tool_rounds)
}

pub fn research_prompt(topic: &str) -> String {
    format!(
        "Research the topic: {topic}. Use available tools. \
         Return a JSON array of objects with title, link, and snippet."
    )
}

pub async fn run_research(agent: &AssistantAgent, topic: &str) -> StageOutput {
    info!(%topic, "researching topic");
    run_stage(
        StageKind::Research,
        agent,
        &research_prompt(topic),
        clean_stage_text,
        || RESEARCH_FALLBACK.to_string(),
    )
    .await
}
