//! Briefline core building blocks.
//!
//! This crate holds everything the research, analysis and summary agents share:
//! configuration and secrets, the chat-model client, the tools the research agent
//! may call, token usage extraction, output cleanup and run bookkeeping.

mod config;
mod error;
pub mod llm;
mod logging;
pub mod metrics;
mod security;
mod stage;
pub mod telemetry;
pub mod text;
pub mod tools;
mod trace;
pub mod usage;

pub use config::{
    Config, ConfigLoader, LlmConfig, LlmSettings, LoggingConfig, McpConfig, McpSettings,
    SearchConfig, SearchSettings, Settings,
};
pub use error::BriefError;
pub use llm::{ChatMessage, ChatModel, ChatRequest, ChatResponse, OpenAiChatClient, ToolCall, ToolSpec};
pub use logging::{RunLogInput, log_run_completion};
pub use security::{SecretValue, optional_env, require_env};
pub use stage::StageKind;
pub use tools::{DynTool, Tool, ToolSet, provision_tools};
pub use trace::{TraceEvent, TraceStep, TraceSummary, persist_trace};
pub use usage::{MessageRecord, RequestUsage, StageResult, Usage, extract_token_usage};
