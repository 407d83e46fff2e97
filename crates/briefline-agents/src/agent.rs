//! Tool-calling assistant shared by all three stages.

use std::sync::Arc;

use briefline_core::{
    BriefError, ChatMessage, ChatModel, ChatRequest, DynTool, MessageRecord, StageResult, ToolCall,
};
use serde_json::Value;
use tracing::{debug, warn};

const DEFAULT_MAX_TOOL_ROUNDS: usize = 5;

/// A named model persona with an optional tool belt.
pub struct AssistantAgent {
    name: String,
    system_message: String,
    model: Arc<dyn ChatModel>,
    tools: Vec<DynTool>,
    max_tool_rounds: usize,
}

impl AssistantAgent {
    pub fn new(
        name: impl Into<String>,
        system_message: impl Into<String>,
        model: Arc<dyn ChatModel>,
    ) -> Self {
        Self {
            name: name.into(),
            system_message: system_message.into(),
            model,
            tools: Vec::new(),
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
        }
    }

    pub fn with_tools(mut self, tools: Vec<DynTool>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_max_tool_rounds(mut self, rounds: usize) -> Self {
        self.max_tool_rounds = rounds;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tool_names(&self) -> Vec<&str> {
        self.tools.iter().map(|tool| tool.name()).collect()
    }

    /// Run one task to completion.
    ///
    /// A single answer without tool calls comes back as [`StageResult::DirectText`].
    /// Once the model has used tools the whole exchange is returned as a
    /// [`StageResult::MessageList`] whose last message is the final answer.
    pub async fn run(&self, task: &str) -> Result<StageResult, BriefError> {
        let mut request = ChatRequest {
            messages: vec![
                ChatMessage::System(self.system_message.clone()),
                ChatMessage::User(task.to_string()),
            ],
            tools: self.tools.iter().map(|tool| tool.spec()).collect(),
        };
        let mut transcript = vec![MessageRecord::new("user", task)];
        let mut rounds = 0;

        loop {
            let response = self.model.complete(&request).await?;

            if response.tool_calls.is_empty() || rounds >= self.max_tool_rounds {
                if !response.tool_calls.is_empty() {
                    warn!(
                        agent = %self.name,
                        rounds,
                        "tool round budget exhausted; using last answer"
                    );
                }
                let content = response.content.unwrap_or_default();
                if rounds == 0 {
                    return Ok(StageResult::DirectText {
                        content,
                        usage: response.usage,
                    });
                }
                transcript.push(MessageRecord {
                    source: self.name.clone(),
                    content,
                    usage: response.usage,
                });
                return Ok(StageResult::messages(transcript));
            }

            rounds += 1;
            request.messages.push(response.to_message());
            transcript.push(MessageRecord {
                source: self.name.clone(),
                content: response.content.clone().unwrap_or_default(),
                usage: response.usage.clone(),
            });

            for call in &response.tool_calls {
                let output = self.invoke(call).await;
                transcript.push(MessageRecord::new(format!("tool:{}", call.name), output.clone()));
                request.messages.push(ChatMessage::Tool {
                    call_id: call.id.clone(),
                    content: output,
                });
            }
        }
    }

    async fn invoke(&self, call: &ToolCall) -> String {
        let Some(tool) = self.tools.iter().find(|tool| tool.name() == call.name) else {
            warn!(agent = %self.name, tool = %call.name, "model requested an unknown tool");
            return format!("error: unknown tool `{}`", call.name);
        };

        let arguments = if call.arguments.trim().is_empty() {
            Value::Object(Default::default())
        } else {
            match serde_json::from_str(&call.arguments) {
                Ok(arguments) => arguments,
                Err(err) => {
                    warn!(agent = %self.name, tool = %call.name, error = %err, "invalid tool arguments");
                    return format!("error: invalid arguments for `{}`: {err}", call.name);
                }
            }
        };

        debug!(agent = %self.name, tool = %call.name, "calling tool");
        match tool.call(arguments).await {
            Ok(output) => output,
            Err(err) => {
                warn!(agent = %self.name, tool = %call.name, error = %err, "tool call failed");
                format!("error: {err}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{EchoTool, ScriptedModel, tool_call};
    use briefline_core::usage::RequestUsage;
    use briefline_core::{ChatResponse, extract_token_usage};

    #[tokio::test]
    async fn single_answer_is_direct_text() {
        let model = ScriptedModel::new(vec![Ok(
            ChatResponse::text("plain answer").with_usage(RequestUsage::new(10, 5)),
        )]);
        let agent = AssistantAgent::new("analysis_agent", "Analyse.", model.clone());

        let result = agent.run("analyse this").await.unwrap();
        assert_eq!(result.text(), Some("plain answer"));
        assert!(matches!(result, StageResult::DirectText { .. }));
        assert_eq!(extract_token_usage(&result, agent.name()), 15);

        let requests = model.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].messages[0], ChatMessage::System("Analyse.".into()));
        assert!(requests[0].tools.is_empty());
    }

    #[tokio::test]
    async fn tool_calls_produce_a_transcript() {
        let model = ScriptedModel::new(vec![
            Ok(ChatResponse::default()
                .with_tool_call(tool_call("call_1", "echo", r#"{"text":"hello"}"#))
                .with_usage(RequestUsage::new(3, 0))),
            Ok(ChatResponse::text("final findings").with_usage(RequestUsage::new(4, 1))),
        ]);
        let agent = AssistantAgent::new("research_agent", "Research.", model.clone())
            .with_tools(vec![Arc::new(EchoTool)]);

        let result = agent.run("research rust").await.unwrap();
        let StageResult::MessageList { messages, usage } = &result else {
            panic!("expected a transcript, got {result}");
        };
        assert!(usage.is_none());
        let sources: Vec<&str> = messages.iter().map(|m| m.source.as_str()).collect();
        assert_eq!(
            sources,
            vec!["user", "research_agent", "tool:echo", "research_agent"]
        );
        assert_eq!(messages[2].content, "echo: hello");
        assert_eq!(result.text(), Some("final findings"));
        assert_eq!(extract_token_usage(&result, agent.name()), 8);

        let requests = model.requests();
        assert_eq!(requests[0].tools[0].name, "echo");
        assert_eq!(
            requests[1].messages.last(),
            Some(&ChatMessage::Tool {
                call_id: "call_1".into(),
                content: "echo: hello".into()
            })
        );
    }

    #[tokio::test]
    async fn unknown_and_failing_tools_are_reported_to_the_model() {
        let model = ScriptedModel::new(vec![
            Ok(ChatResponse::default()
                .with_tool_call(tool_call("a", "missing", "{}"))
                .with_tool_call(tool_call("b", "echo", "{}"))
                .with_tool_call(tool_call("c", "echo", "not json"))),
            Ok(ChatResponse::text("done")),
        ]);
        let agent = AssistantAgent::new("research_agent", "Research.", model.clone())
            .with_tools(vec![Arc::new(EchoTool)]);

        let result = agent.run("go").await.unwrap();
        let StageResult::MessageList { messages, .. } = result else {
            panic!("expected a transcript");
        };
        assert_eq!(messages[2].content, "error: unknown tool `missing`");
        assert!(messages[3].content.starts_with("error: tool `echo` failed"));
        assert!(messages[4].content.starts_with("error: invalid arguments for `echo`"));
    }

    #[tokio::test]
    async fn round_budget_stops_the_loop() {
        let model = ScriptedModel::new(vec![
            Ok(ChatResponse::default().with_tool_call(tool_call("1", "echo", r#"{"text":"a"}"#))),
            Ok(ChatResponse::text("partial").with_tool_call(tool_call("2", "echo", r#"{"text":"b"}"#))),
        ]);
        let agent = AssistantAgent::new("research_agent", "Research.", model.clone())
            .with_tools(vec![Arc::new(EchoTool)])
            .with_max_tool_rounds(1);

        let result = agent.run("go").await.unwrap();
        assert_eq!(result.text(), Some("partial"));
        assert_eq!(model.requests().len(), 2);
    }

    #[tokio::test]
    async fn model_errors_propagate() {
        let model = ScriptedModel::new(vec![Err(BriefError::Backend {
            status: 500,
            detail: "boom".into(),
        })]);
        let agent = AssistantAgent::new("summary_agent", "Summarise.", model);

        let err = agent.run("go").await.unwrap_err();
        assert!(matches!(err, BriefError::Backend { status: 500, .. }));
    }
}
