use std::sync::Arc;

use anyhow::{Result, anyhow};
use briefline_core::{
    BriefError, ChatModel, OpenAiChatClient, Settings, TraceEvent, ToolSet, provision_tools,
};
use graph_flow::{
    ExecutionStatus, FlowRunner, Graph, GraphBuilder, InMemorySessionStorage, Session,
    SessionStorage, Task,
};
use serde::Serialize;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::analyst::build_analysis_agent;
use crate::researcher::build_research_agent;
use crate::stage::StageReport;
use crate::summarizer::build_summary_agent;
use crate::tasks::{
    ANALYSIS_TEXT_KEY, AnalysisTask, RESEARCH_TEXT_KEY, ResearchTask, STAGES_KEY,
    SUMMARY_TEXT_KEY, SummaryTask, TOPIC_KEY, TOTAL_TOKENS_KEY, TRACE_KEY,
};

/// Everything one pipeline run produced.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub run_id: String,
    pub topic: String,
    pub research: String,
    pub analysis: String,
    pub summary: String,
    pub total_tokens: u64,
    pub stages: Vec<StageReport>,
    pub trace_events: Vec<TraceEvent>,
}

impl PipelineReport {
    /// Names of the stages that returned their fallback output.
    pub fn fallback_stages(&self) -> Vec<String> {
        self.stages
            .iter()
            .filter(|stage| stage.fell_back)
            .map(|stage| stage.stage.to_string())
            .collect()
    }
}

/// The research -> analysis -> summary graph plus the tools it was built with.
pub struct Pipeline {
    graph: Arc<Graph>,
    start_task: String,
    tools: ToolSet,
}

impl Pipeline {
    pub fn new(model: Arc<dyn ChatModel>, tools: ToolSet, max_tool_rounds: usize) -> Self {
        let research = Arc::new(ResearchTask::new(Arc::new(build_research_agent(
            model.clone(),
            &tools,
            max_tool_rounds,
        ))));
        let analysis = Arc::new(AnalysisTask::new(Arc::new(build_analysis_agent(
            model.clone(),
        ))));
        let summary = Arc::new(SummaryTask::new(Arc::new(build_summary_agent(model))));

        let graph = GraphBuilder::new("briefline_pipeline")
            .add_task(research.clone())
            .add_task(analysis.clone())
            .add_task(summary.clone())
            .add_edge(research.id(), analysis.id())
            .add_edge(analysis.id(), summary.id())
            .set_start_task(research.id())
            .build();

        Self {
            graph: Arc::new(graph),
            start_task: research.id().to_string(),
            tools,
        }
    }

    /// Build the model client and provision tools from resolved settings.
    pub async fn from_settings(settings: &Settings) -> Result<Self, BriefError> {
        let model: Arc<dyn ChatModel> = Arc::new(OpenAiChatClient::new(&settings.llm)?);
        info!(model = %model.model_name(), "model client ready");
        let tools = provision_tools(settings).await?;
        info!(
            remote = tools.is_remote(),
            tools = ?tools.names(),
            "research tools provisioned"
        );
        Ok(Self::new(model, tools, settings.llm.max_tool_rounds))
    }

    pub fn tools(&self) -> &ToolSet {
        &self.tools
    }

    /// Run all three stages for `topic`. Stage failures are absorbed by their
    /// fallbacks; only graph execution errors surface here.
    #[instrument(name = "pipeline.run", skip(self))]
    pub async fn run(&self, topic: &str) -> Result<PipelineReport> {
        let storage = Arc::new(InMemorySessionStorage::new());
        let runner = FlowRunner::new(self.graph.clone(), storage.clone());

        let run_id = Uuid::new_v4().to_string();
        let session = Session::new_from_task(run_id.clone(), &self.start_task);
        session.context.set(TOPIC_KEY, topic.to_string()).await;
        session.context.set(TOTAL_TOKENS_KEY, 0u64).await;

        storage
            .save(session)
            .await
            .map_err(|err| anyhow!("failed to persist session: {err}"))?;

        loop {
            let result = runner
                .run(&run_id)
                .await
                .map_err(|err| anyhow!("graph execution failure: {err}"))?;

            match result.status {
                ExecutionStatus::Completed => break,
                ExecutionStatus::WaitingForInput => continue,
                ExecutionStatus::Error(message) => return Err(anyhow!(message)),
            }
        }

        let session = storage
            .get(&run_id)
            .await
            .map_err(|err| anyhow!("failed to reload session: {err}"))?
            .ok_or_else(|| anyhow!("session missing after execution"))?;
        let context = &session.context;

        let report = PipelineReport {
            run_id,
            topic: topic.to_string(),
            research: context.get(RESEARCH_TEXT_KEY).await.unwrap_or_default(),
            analysis: context.get(ANALYSIS_TEXT_KEY).await.unwrap_or_default(),
            summary: context.get(SUMMARY_TEXT_KEY).await.unwrap_or_default(),
            total_tokens: context.get(TOTAL_TOKENS_KEY).await.unwrap_or(0),
            stages: context.get(STAGES_KEY).await.unwrap_or_default(),
            trace_events: context.get(TRACE_KEY).await.unwrap_or_default(),
        };

        info!(
            run_id = %report.run_id,
            total_tokens = report.total_tokens,
            fallbacks = ?report.fallback_stages(),
            "pipeline finished"
        );
        Ok(report)
    }

    /// Release remote tool sessions.
    pub async fn shutdown(&self) {
        self.tools.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedModel;
    use briefline_core::usage::RequestUsage;
    use briefline_core::{BriefError, ChatResponse, StageKind};

    #[tokio::test]
    async fn stages_run_in_order_and_tokens_accumulate() {
        let model = ScriptedModel::new(vec![
            Ok(ChatResponse::text("[{\"title\": \"A\"}]").with_usage(RequestUsage::new(10, 5))),
            Ok(ChatResponse::text("{\"summary\": \"B\"}").with_usage(RequestUsage::new(7, 3))),
            Ok(ChatResponse::text("Topic: rust\\n=== RESEARCH SUMMARY ===")
                .with_usage(RequestUsage::new(20, 10))),
        ]);
        let pipeline = Pipeline::new(model.clone(), ToolSet::default(), 2);

        let report = pipeline.run("rust").await.unwrap();

        assert_eq!(report.research, "[{\"title\": \"A\"}]");
        assert_eq!(report.analysis, "{\"summary\": \"B\"}");
        assert!(report.summary.starts_with("Topic: rust\n=== RESEARCH SUMMARY ==="));
        assert_eq!(report.total_tokens, 55);
        assert!(report.fallback_stages().is_empty());

        let order: Vec<StageKind> = report.stages.iter().map(|s| s.stage).collect();
        assert_eq!(order, StageKind::ALL.to_vec());
        assert_eq!(report.trace_events.len(), 3);

        let requests = model.requests();
        assert_eq!(requests.len(), 3);
        let analysis_prompt = format!("{:?}", requests[1].messages[1]);
        assert!(analysis_prompt.contains("[{\\\"title\\\": \\\"A\\\"}]"));
    }

    #[tokio::test]
    async fn failed_stage_feeds_its_fallback_forward() {
        let model = ScriptedModel::new(vec![
            Ok(ChatResponse::text("findings").with_usage(RequestUsage::new(1, 1))),
            Err(BriefError::MalformedResponse("analysis broke".into())),
            Ok(ChatResponse::text("final").with_usage(RequestUsage::new(2, 2))),
        ]);
        let pipeline = Pipeline::new(model.clone(), ToolSet::default(), 2);

        let report = pipeline.run("rust").await.unwrap();
        assert_eq!(report.analysis, "{}");
        assert_eq!(report.fallback_stages(), vec!["analysis".to_string()]);
        assert_eq!(report.total_tokens, 6);

        let summary_request = format!("{:?}", model.requests()[2].messages[1]);
        assert!(summary_request.contains("ANALYSIS_DATA:\\n{}"));
    }

    #[tokio::test]
    async fn each_run_gets_its_own_session() {
        let script = (0..6)
            .map(|_| Ok(ChatResponse::text("ok")))
            .collect::<Vec<_>>();
        let pipeline = Pipeline::new(ScriptedModel::new(script), ToolSet::default(), 1);

        let first = pipeline.run("one").await.unwrap();
        let second = pipeline.run("two").await.unwrap();
        assert_ne!(first.run_id, second.run_id);
        assert_eq!(second.topic, "two");
        assert_eq!(second.stages.len(), 3);
        assert_eq!(second.total_tokens, 0);
    }
}
