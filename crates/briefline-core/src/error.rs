use std::path::PathBuf;

use thiserror::Error;

/// Core error type for Briefline.
#[derive(Debug, Error)]
pub enum BriefError {
    #[error("configuration error: {0}")]
    InvalidConfiguration(String),
    #[error("missing environment variable: {0}")]
    MissingSecret(String),
    #[error("I/O error while reading {path}: {source}")]
    ConfigIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("HTTP transport failure: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("backend returned HTTP {status}: {detail}")]
    Backend { status: u16, detail: String },
    #[error("malformed model response: {0}")]
    MalformedResponse(String),
    #[error("tool `{name}` failed: {reason}")]
    Tool { name: String, reason: String },
    #[error("MCP protocol error: {0}")]
    Mcp(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl BriefError {
    pub fn config_io(path: PathBuf, source: std::io::Error) -> Self {
        Self::ConfigIo { path, source }
    }

    pub fn tool(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Tool {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Build a [`BriefError::Backend`] from a non-success response, keeping at most
    /// 800 characters of the body.
    pub async fn from_response(response: reqwest::Response) -> Self {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        let detail: String = body.chars().take(800).collect();
        Self::Backend { status, detail }
    }
}
