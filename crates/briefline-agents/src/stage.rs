use std::time::Instant;

use briefline_core::metrics::record_stage_metrics;
use briefline_core::{StageKind, TraceEvent, extract_token_usage};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::agent::AssistantAgent;

/// Display text and token count produced by one stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageOutput {
    pub stage: StageKind,
    pub text: String,
    pub tokens: u64,
    /// The agent call failed and `text` is the stage's fixed fallback.
    pub fell_back: bool,
}

impl StageOutput {
    pub fn trace_event(&self) -> TraceEvent {
        let message = if self.fell_back {
            "agent call failed; fallback output used".to_string()
        } else {
            format!(
                "produced {} chars ({} tokens)",
                self.text.chars().count(),
                self.tokens
            )
        };
        TraceEvent::new(self.stage, message)
    }
}

/// Per-stage bookkeeping kept on the pipeline report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageReport {
    pub stage: StageKind,
    pub tokens: u64,
    pub fell_back: bool,
    pub duration_ms: u64,
}

impl StageReport {
    pub fn new(output: &StageOutput, duration_ms: u64) -> Self {
        Self {
            stage: output.stage,
            tokens: output.tokens,
            fell_back: output.fell_back,
            duration_ms,
        }
    }
}

/// Invoke `agent` with `prompt`, clean the answer with `finish`, and count tokens.
/// Any agent failure is logged and replaced by `fallback()` with zero tokens.
pub(crate) async fn run_stage(
    stage: StageKind,
    agent: &AssistantAgent,
    prompt: &str,
    finish: impl FnOnce(&str) -> String,
    fallback: impl FnOnce() -> String,
) -> StageOutput {
    let started = Instant::now();

    let output = match agent.run(prompt).await {
        Ok(result) => {
            let raw = result
                .text()
                .map(str::to_string)
                .unwrap_or_else(|| result.to_string());
            let tokens = extract_token_usage(&result, agent.name());
            StageOutput {
                stage,
                text: finish(&raw),
                tokens,
                fell_back: false,
            }
        }
        Err(err) => {
            warn!(agent = %agent.name(), %stage, error = %err, "stage failed; using fallback");
            StageOutput {
                stage,
                text: fallback(),
                tokens: 0,
                fell_back: true,
            }
        }
    };

    let duration_ms = started.elapsed().as_millis() as u64;
    record_stage_metrics(stage, output.fell_back, output.tokens, duration_ms);
    info!(
        %stage,
        tokens = output.tokens,
        fell_back = output.fell_back,
        duration_ms,
        "stage complete"
    );
    output
}
