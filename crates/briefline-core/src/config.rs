use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;

use crate::{BriefError, SecretValue, optional_env, require_env};

const DEFAULT_CONFIG_PATH: &str = "briefline.toml";
const CONFIG_PATH_ENV: &str = "BRIEFLINE_CONFIG";
const LOG_DIR_ENV: &str = "BRIEFLINE_LOG_DIR";

/// Top-level configuration structure.
///
/// The file only ever names environment variables for credentials; the values are
/// read once by [`Config::into_settings`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub llm: LlmConfig,
    pub search: SearchConfig,
    pub mcp: McpConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Resolve environment-sourced values into explicit [`Settings`].
    pub fn into_settings(self) -> Result<Settings, BriefError> {
        let api_key = require_env(&self.llm.api_key_env)?;
        let model = match self.llm.model.as_deref().map(str::trim) {
            Some(model) if !model.is_empty() => model.to_string(),
            _ => optional_env(&self.llm.model_env)
                .map(|value| value.expose().trim().to_string())
                .ok_or_else(|| {
                    BriefError::InvalidConfiguration(format!(
                        "no model configured: set llm.model or {}",
                        self.llm.model_env
                    ))
                })?,
        };

        let search_key = optional_env(&self.search.api_key_env);
        let mcp_url = self
            .mcp
            .url
            .clone()
            .filter(|url| !url.trim().is_empty())
            .or_else(|| optional_env(&self.mcp.url_env).map(|url| url.expose().to_string()));

        let run_log_dir = self
            .logging
            .run_log_dir
            .clone()
            .or_else(|| env::var(LOG_DIR_ENV).ok().map(PathBuf::from));

        Ok(Settings {
            llm: LlmSettings {
                model,
                api_key,
                base_url: self.llm.base_url.trim_end_matches('/').to_string(),
                timeout: Duration::from_secs(self.llm.timeout_secs),
                max_tool_rounds: self.llm.max_tool_rounds,
            },
            search: SearchSettings {
                api_key: search_key,
                endpoint: self.search.endpoint,
                timeout: Duration::from_secs(self.search.timeout_secs),
                snippet_chars: self.search.snippet_chars,
            },
            mcp: mcp_url.map(|url| McpSettings {
                url,
                timeout: Duration::from_secs(self.mcp.timeout_secs),
                sse_read_timeout: Duration::from_secs(self.mcp.sse_read_timeout_secs),
            }),
            log_level: self.logging.level,
            run_log_dir,
        })
    }
}

/// Helper to load configuration with guard rails.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from a provided path or discoverable defaults.
    ///
    /// Resolution order:
    /// 1. Explicit `path` argument (must exist).
    /// 2. `BRIEFLINE_CONFIG` environment variable (must exist).
    /// 3. `briefline.toml` in the current working directory, when present.
    /// 4. Built-in defaults.
    pub fn load(path: Option<PathBuf>) -> Result<Config, BriefError> {
        let config = match resolve_path(path) {
            Some(candidate) => Self::from_file(&candidate)?,
            None => Config::default(),
        };

        Self::validate(&config)?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Config, BriefError> {
        let raw = fs::read_to_string(path)
            .map_err(|err| BriefError::config_io(path.to_path_buf(), err))?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> Result<Config, BriefError> {
        toml::from_str(raw).map_err(|err| BriefError::InvalidConfiguration(err.to_string()))
    }

    fn validate(config: &Config) -> Result<(), BriefError> {
        if config.llm.api_key_env.trim().is_empty() {
            return Err(BriefError::InvalidConfiguration(
                "llm.api_key_env must reference an environment variable".into(),
            ));
        }
        if config.llm.timeout_secs == 0 || config.search.timeout_secs == 0 {
            return Err(BriefError::InvalidConfiguration(
                "timeouts must be at least one second".into(),
            ));
        }
        if config.search.snippet_chars == 0 {
            return Err(BriefError::InvalidConfiguration(
                "search.snippet_chars must be positive".into(),
            ));
        }
        Ok(())
    }
}

fn resolve_path(path: Option<PathBuf>) -> Option<PathBuf> {
    if let Some(path) = path {
        return Some(path);
    }

    if let Ok(from_env) = env::var(CONFIG_PATH_ENV) {
        if !from_env.trim().is_empty() {
            return Some(PathBuf::from(from_env));
        }
    }

    let default = Path::new(DEFAULT_CONFIG_PATH);
    default.exists().then(|| default.to_path_buf())
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub model: Option<String>,
    pub model_env: String,
    pub api_key_env: String,
    pub base_url: String,
    pub timeout_secs: u64,
    pub max_tool_rounds: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: None,
            model_env: "MODEL_NAME".into(),
            api_key_env: "API_KEY".into(),
            base_url: "https://api.openai.com/v1".into(),
            timeout_secs: 120,
            max_tool_rounds: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub api_key_env: String,
    pub endpoint: String,
    pub timeout_secs: u64,
    pub snippet_chars: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            api_key_env: "TAVILY_API_KEY".into(),
            endpoint: "https://api.tavily.com/search".into(),
            timeout_secs: 20,
            snippet_chars: 400,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct McpConfig {
    pub url: Option<String>,
    pub url_env: String,
    pub timeout_secs: u64,
    pub sse_read_timeout_secs: u64,
}

impl Default for McpConfig {
    fn default() -> Self {
        Self {
            url: None,
            url_env: "MCP_URL".into(),
            timeout_secs: 30,
            sse_read_timeout_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub run_log_dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            run_log_dir: None,
        }
    }
}

/// Fully resolved runtime settings, constructed once at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    pub llm: LlmSettings,
    pub search: SearchSettings,
    pub mcp: Option<McpSettings>,
    pub log_level: String,
    pub run_log_dir: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct LlmSettings {
    pub model: String,
    pub api_key: SecretValue,
    pub base_url: String,
    pub timeout: Duration,
    pub max_tool_rounds: usize,
}

#[derive(Debug, Clone)]
pub struct SearchSettings {
    pub api_key: Option<SecretValue>,
    pub endpoint: String,
    pub timeout: Duration,
    pub snippet_chars: usize,
}

impl SearchSettings {
    /// Settings pointing at `endpoint` with the default timeout and snippet size.
    pub fn new(endpoint: impl Into<String>, api_key: Option<SecretValue>) -> Self {
        let defaults = SearchConfig::default();
        Self {
            api_key,
            endpoint: endpoint.into(),
            timeout: Duration::from_secs(defaults.timeout_secs),
            snippet_chars: defaults.snippet_chars,
        }
    }
}

#[derive(Debug, Clone)]
pub struct McpSettings {
    pub url: String,
    pub timeout: Duration,
    pub sse_read_timeout: Duration,
}

impl McpSettings {
    pub fn new(url: impl Into<String>) -> Self {
        let defaults = McpConfig::default();
        Self {
            url: url.into(),
            timeout: Duration::from_secs(defaults.timeout_secs),
            sse_read_timeout: Duration::from_secs(defaults.sse_read_timeout_secs),
        }
    }
}
