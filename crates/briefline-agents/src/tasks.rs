use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use briefline_core::TraceEvent;
use graph_flow::{Context, NextAction, Task, TaskResult};
use tracing::{debug, instrument};

use crate::agent::AssistantAgent;
use crate::analyst::run_analysis;
use crate::researcher::run_research;
use crate::stage::{StageOutput, StageReport};
use crate::summarizer::run_summary;

pub const TOPIC_KEY: &str = "topic";
pub const RESEARCH_TEXT_KEY: &str = "research.text";
pub const ANALYSIS_TEXT_KEY: &str = "analysis.text";
pub const SUMMARY_TEXT_KEY: &str = "summary.text";
pub const TOTAL_TOKENS_KEY: &str = "usage.total_tokens";
pub const STAGES_KEY: &str = "stages";
pub const TRACE_KEY: &str = "trace.events";

/// Store a finished stage: its text, its share of the token total, its report and
/// a trace event.
async fn record_stage(context: &Context, text_key: &str, output: &StageOutput, started: Instant) {
    context.set(text_key, output.text.clone()).await;

    let total: u64 = context.get(TOTAL_TOKENS_KEY).await.unwrap_or(0);
    context
        .set(TOTAL_TOKENS_KEY, total.saturating_add(output.tokens))
        .await;

    let mut stages: Vec<StageReport> = context.get(STAGES_KEY).await.unwrap_or_default();
    stages.push(StageReport::new(
        output,
        started.elapsed().as_millis() as u64,
    ));
    context.set(STAGES_KEY, &stages).await;

    let mut events: Vec<TraceEvent> = context.get(TRACE_KEY).await.unwrap_or_default();
    events.push(output.trace_event());
    context.set(TRACE_KEY, &events).await;

    debug!(
        stage = %output.stage,
        tokens = output.tokens,
        running_total = total.saturating_add(output.tokens),
        "stage recorded in session context"
    );
}

fn stage_response(output: &StageOutput) -> Option<String> {
    Some(if output.fell_back {
        format!("{} fell back", output.stage)
    } else {
        format!("{} completed ({} tokens)", output.stage, output.tokens)
    })
}

pub struct ResearchTask {
    agent: Arc<AssistantAgent>,
}

impl ResearchTask {
    pub fn new(agent: Arc<AssistantAgent>) -> Self {
        Self { agent }
    }
}

#[async_trait]
impl Task for ResearchTask {
    fn id(&self) -> &str {
        "research"
    }

    #[instrument(name = "task.research", skip(self, context))]
    async fn run(&self, context: Context) -> graph_flow::Result<TaskResult> {
        let started = Instant::now();
        let topic: String = context.get(TOPIC_KEY).await.unwrap_or_default();

        let output = run_research(&self.agent, &topic).await;
        record_stage(&context, RESEARCH_TEXT_KEY, &output, started).await;

        Ok(TaskResult::new(
            stage_response(&output),
            NextAction::ContinueAndExecute,
        ))
    }
}

pub struct AnalysisTask {
    agent: Arc<AssistantAgent>,
}

impl AnalysisTask {
    pub fn new(agent: Arc<AssistantAgent>) -> Self {
        Self { agent }
    }
}

#[async_trait]
impl Task for AnalysisTask {
    fn id(&self) -> &str {
        "analysis"
    }

    #[instrument(name = "task.analysis", skip(self, context))]
    async fn run(&self, context: Context) -> graph_flow::Result<TaskResult> {
        let started = Instant::now();
        let research: String = context.get(RESEARCH_TEXT_KEY).await.unwrap_or_default();

        let output = run_analysis(&self.agent, &research).await;
        record_stage(&context, ANALYSIS_TEXT_KEY, &output, started).await;

        Ok(TaskResult::new(
            stage_response(&output),
            NextAction::ContinueAndExecute,
        ))
    }
}

pub struct SummaryTask {
    agent: Arc<AssistantAgent>,
}

impl SummaryTask {
    pub fn new(agent: Arc<AssistantAgent>) -> Self {
        Self { agent }
    }
}

#[async_trait]
impl Task for SummaryTask {
    fn id(&self) -> &str {
        "summary"
    }

    #[instrument(name = "task.summary", skip(self, context))]
    async fn run(&self, context: Context) -> graph_flow::Result<TaskResult> {
        let started = Instant::now();
        let topic: String = context.get(TOPIC_KEY).await.unwrap_or_default();
        let analysis: String = context.get(ANALYSIS_TEXT_KEY).await.unwrap_or_default();

        let output = run_summary(&self.agent, &analysis, &topic).await;
        record_stage(&context, SUMMARY_TEXT_KEY, &output, started).await;

        Ok(TaskResult::new(stage_response(&output), NextAction::End))
    }
}
