//! Scripted collaborators for unit tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use briefline_core::{BriefError, ChatModel, ChatRequest, ChatResponse, Tool, ToolCall};
use serde_json::{Value, json};

/// Replays canned responses in order and records every request.
pub struct ScriptedModel {
    script: Mutex<VecDeque<Result<ChatResponse, BriefError>>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedModel {
    pub fn new(script: Vec<Result<ChatResponse, BriefError>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse, BriefError> {
        self.requests.lock().unwrap().push(request.clone());
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(BriefError::MalformedResponse("script exhausted".into())))
    }
}

/// Returns `echo: <text>`; fails when `text` is missing.
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echo the text argument"
    }

    fn parameters(&self) -> Value {
        json!({"type": "object", "properties": {"text": {"type": "string"}}})
    }

    async fn call(&self, arguments: Value) -> Result<String, BriefError> {
        let text = arguments
            .get("text")
            .and_then(Value::as_str)
            .ok_or_else(|| BriefError::tool("echo", "missing `text`"))?;
        Ok(format!("echo: {text}"))
    }
}

pub fn tool_call(id: &str, name: &str, arguments: &str) -> ToolCall {
    ToolCall {
        id: id.into(),
        name: name.into(),
        arguments: arguments.into(),
    }
}
