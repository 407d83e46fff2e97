//! Tools the research agent may call, and their provisioning.

mod mcp;
mod web_search;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, warn};

use crate::BriefError;
use crate::config::Settings;
use crate::llm::ToolSpec;

pub use mcp::{McpClient, McpToolAdapter, load_mcp_adapters};
pub use web_search::{
    DEFAULT_MAX_RESULTS, SearchHit, TavilyClient, WEB_SEARCH_TOOL, WebSearchTool,
};

/// A callable capability exposed to the model.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON schema of the accepted arguments.
    fn parameters(&self) -> Value;

    async fn call(&self, arguments: Value) -> Result<String, BriefError>;

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters(),
        }
    }
}

pub type DynTool = Arc<dyn Tool>;

/// Tools handed to the research agent, plus the remote session backing them (if any).
#[derive(Clone, Default)]
pub struct ToolSet {
    tools: Vec<DynTool>,
    remote: Option<Arc<McpClient>>,
}

impl ToolSet {
    pub fn new(tools: Vec<DynTool>) -> Self {
        Self {
            tools,
            remote: None,
        }
    }

    pub fn tools(&self) -> &[DynTool] {
        &self.tools
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|tool| tool.name()).collect()
    }

    pub fn is_remote(&self) -> bool {
        self.remote.is_some()
    }

    /// Close the remote tool session, if one was opened.
    pub async fn shutdown(&self) {
        if let Some(remote) = &self.remote {
            remote.terminate().await;
        }
    }
}

/// Remote adapters when an MCP endpoint is configured and reachable, otherwise
/// the local `web_search` tool.
pub async fn provision_tools(settings: &Settings) -> Result<ToolSet, BriefError> {
    let (adapters, remote) = load_mcp_adapters(settings.mcp.as_ref()).await;

    let set = if adapters.is_empty() {
        if let Some(remote) = &remote {
            warn!("MCP server advertised no tools; using local web search");
            remote.terminate().await;
        }
        info!("using local web_search tool");
        let client = TavilyClient::new(&settings.search)?;
        ToolSet::new(vec![Arc::new(WebSearchTool::new(client))])
    } else {
        info!(count = adapters.len(), "using MCP tools");
        ToolSet {
            tools: adapters,
            remote,
        }
    };

    for name in set.names() {
        info!(tool = %name, "tool loaded");
    }
    Ok(set)
}
