//! Summary stage: turns the analysis into the final Markdown report.

use std::sync::Arc;

use briefline_core::text::{GENERATED_AT_MARKER, local_timestamp, normalize_summary_text};
use briefline_core::{ChatModel, StageKind};
use tracing::info;

use crate::agent::AssistantAgent;
use crate::stage::{StageOutput, run_stage};

pub const SUMMARY_SYSTEM_MESSAGE: &str = "You are the Summary Agent. Given analyzed data, produce a clear, \
professional Markdown summary using the structure below:\n\n\
Topic: <topic>\n\
=== RESEARCH SUMMARY ===\n\
Key Developments:\n\
1. ...\n\
2. ...\n\
Main Themes:\n\
- ...\n\
Sources:\n\
- [Source 1]: https://...\n\
Generated at: <timestamp>\n\n\
Ensure your output matches this format exactly, with no extra commentary.";

pub fn build_summary_agent(model: Arc<dyn ChatModel>) -> AssistantAgent {
    AssistantAgent::new(StageKind::Summary.agent_name(), SUMMARY_SYSTEM_MESSAGE, model)
}

pub fn summary_prompt(topic: &str, analysis_text: &str, generated_at: &str) -> String {
    format!(
        "Topic: {topic}\n\n\
         You are given analyzed research data in JSON or text format below.\n\
         Generate a Markdown summary strictly following this format:\n\n\
         === RESEARCH SUMMARY ===\n\
         Key Developments:\n\
         1. ...\n\
         Main Themes:\n\
         - ...\n\
         Sources:\n\
         - [Source 1]: https://...\n\n\
         Add '{GENERATED_AT_MARKER} {generated_at}' at the end.\n\n\
         ANALYSIS_DATA:\n{analysis_text}"
    )
}

/// Report printed when the summary call itself fails.
pub fn failure_report(topic: &str, generated_at: &str) -> String {
    format!(
        "Topic: {topic}\n\n\
         === RESEARCH SUMMARY ===\n\
         Summary generation failed due to an internal error.\n\
         {GENERATED_AT_MARKER} {generated_at}"
    )
}

pub async fn run_summary(agent: &AssistantAgent, analysis_text: &str, topic: &str) -> StageOutput {
    let generated_at = local_timestamp();
    let output = run_stage(
        StageKind::Summary,
        agent,
        &summary_prompt(topic, analysis_text, &generated_at),
        |text| normalize_summary_text(text, &generated_at),
        || failure_report(topic, &local_timestamp()),
    )
    .await;
    if !output.fell_back {
        info!("summary generation complete");
    }
    output
}
