//! Token usage bookkeeping over model responses.
//!
//! Backends report usage in more than one shape: a typed record with
//! prompt/completion/total counts, or a loose JSON mapping whose total may sit at
//! the top level or nested under `usage`. Usage can also live on the response as a
//! whole or be spread over the individual messages of a tool-calling exchange.
//! The shape is classified once, when the response enters the crate, and
//! [`extract_token_usage`] folds every shape into a single count.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{info, warn};

/// Typed usage record with optional counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RequestUsage {
    #[serde(default)]
    pub prompt_tokens: Option<u64>,
    #[serde(default)]
    pub completion_tokens: Option<u64>,
    #[serde(default)]
    pub total_tokens: Option<u64>,
}

impl RequestUsage {
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens: Some(prompt_tokens),
            completion_tokens: Some(completion_tokens),
            total_tokens: None,
        }
    }

    /// Reported total, or prompt + completion when the total is absent.
    pub fn total(&self) -> Result<u64, UsageError> {
        if let Some(total) = self.total_tokens {
            return Ok(total);
        }
        self.prompt_tokens
            .unwrap_or(0)
            .checked_add(self.completion_tokens.unwrap_or(0))
            .ok_or(UsageError::Overflow)
    }

    fn is_empty(&self) -> bool {
        self.prompt_tokens.is_none() && self.completion_tokens.is_none() && self.total_tokens.is_none()
    }
}

/// Usage metadata attached to a response or message.
#[derive(Debug, Clone, PartialEq)]
pub enum Usage {
    /// Loosely typed mapping, as returned by backends with non-standard usage blocks.
    Mapping(Map<String, Value>),
    /// Typed prompt/completion/total counts.
    Counts(RequestUsage),
}

impl Usage {
    /// Classify a raw usage value. Objects made only of the standard count fields
    /// become [`Usage::Counts`]; any other object is kept as a mapping.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => {
                match serde_json::from_value::<RequestUsage>(Value::Object(map.clone())) {
                    Ok(counts) if !counts.is_empty() => Some(Self::Counts(counts)),
                    _ => Some(Self::Mapping(map)),
                }
            }
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Usage::Mapping(map) => map.is_empty(),
            Usage::Counts(counts) => counts.is_empty(),
        }
    }

    /// Total token count carried by this record.
    pub fn total_tokens(&self) -> Result<u64, UsageError> {
        match self {
            Usage::Mapping(map) => mapping_total(map),
            Usage::Counts(counts) => counts.total(),
        }
    }
}

impl From<RequestUsage> for Usage {
    fn from(value: RequestUsage) -> Self {
        Usage::Counts(value)
    }
}

/// Failure while reading usage metadata.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum UsageError {
    #[error("`{field}` is not a non-negative integer: {value}")]
    InvalidCount { field: &'static str, value: String },
    #[error("`{field}` has unexpected shape: {value}")]
    UnexpectedShape { field: &'static str, value: String },
    #[error("token count overflow")]
    Overflow,
}

/// `total_tokens`, then `usage.total_tokens`, then zero. Zero and null entries
/// fall through to the next candidate.
fn mapping_total(map: &Map<String, Value>) -> Result<u64, UsageError> {
    if let Some(total) = positive_count("total_tokens", map.get("total_tokens"))? {
        return Ok(total);
    }

    match map.get("usage") {
        None | Some(Value::Null) => Ok(0),
        Some(Value::Object(nested)) => {
            Ok(positive_count("usage.total_tokens", nested.get("total_tokens"))?.unwrap_or(0))
        }
        Some(other) => Err(UsageError::UnexpectedShape {
            field: "usage",
            value: other.to_string(),
        }),
    }
}

fn positive_count(field: &'static str, value: Option<&Value>) -> Result<Option<u64>, UsageError> {
    let number = match value {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::Number(number)) => number,
        Some(other) => {
            return Err(UsageError::InvalidCount {
                field,
                value: other.to_string(),
            });
        }
    };

    let count = match number.as_u64() {
        Some(count) => count,
        None => match number.as_f64() {
            Some(float) if float >= 0.0 && float.fract() == 0.0 && float <= u64::MAX as f64 => {
                float as u64
            }
            _ => {
                return Err(UsageError::InvalidCount {
                    field,
                    value: number.to_string(),
                });
            }
        },
    };

    Ok((count > 0).then_some(count))
}

/// One entry of a multi-message exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageRecord {
    /// Who produced the message (`user`, the agent name, or `tool:<name>`).
    pub source: String,
    pub content: String,
    pub usage: Option<Usage>,
}

impl MessageRecord {
    pub fn new(source: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            content: content.into(),
            usage: None,
        }
    }

    pub fn with_usage(mut self, usage: impl Into<Usage>) -> Self {
        self.usage = Some(usage.into());
        self
    }
}

/// Result of one agent invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum StageResult {
    /// The model answered directly; the text is carried on the result itself.
    DirectText {
        content: String,
        usage: Option<Usage>,
    },
    /// A multi-message exchange whose last message carries the answer.
    MessageList {
        messages: Vec<MessageRecord>,
        usage: Option<Usage>,
    },
}

impl StageResult {
    pub fn direct(content: impl Into<String>) -> Self {
        StageResult::DirectText {
            content: content.into(),
            usage: None,
        }
    }

    pub fn messages(messages: Vec<MessageRecord>) -> Self {
        StageResult::MessageList {
            messages,
            usage: None,
        }
    }

    pub fn with_usage(self, usage: impl Into<Usage>) -> Self {
        let usage = Some(usage.into());
        match self {
            StageResult::DirectText { content, .. } => StageResult::DirectText { content, usage },
            StageResult::MessageList { messages, .. } => {
                StageResult::MessageList { messages, usage }
            }
        }
    }

    /// Usage attached to the result as a whole.
    pub fn usage(&self) -> Option<&Usage> {
        match self {
            StageResult::DirectText { usage, .. } | StageResult::MessageList { usage, .. } => {
                usage.as_ref()
            }
        }
    }

    /// Terminal text of the result, when non-empty.
    pub fn text(&self) -> Option<&str> {
        let text = match self {
            StageResult::DirectText { content, .. } => content.as_str(),
            StageResult::MessageList { messages, .. } => messages.last()?.content.as_str(),
        };
        (!text.is_empty()).then_some(text)
    }
}

impl fmt::Display for StageResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageResult::DirectText { content, .. } => write!(f, "DirectText({content:?})"),
            StageResult::MessageList { messages, .. } => {
                write!(f, "MessageList[")?;
                for (idx, message) in messages.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {:?}", message.source, message.content)?;
                }
                write!(f, "]")
            }
        }
    }
}

/// Strict extraction: top-level usage first, otherwise the sum over messages.
pub fn try_extract_token_usage(result: &StageResult) -> Result<u64, UsageError> {
    if let Some(usage) = result.usage().filter(|usage| !usage.is_empty()) {
        return usage.total_tokens();
    }

    let StageResult::MessageList { messages, .. } = result else {
        return Ok(0);
    };

    messages
        .iter()
        .filter_map(|message| message.usage.as_ref())
        .filter(|usage| !usage.is_empty())
        .try_fold(0u64, |total, usage| {
            total
                .checked_add(usage.total_tokens()?)
                .ok_or(UsageError::Overflow)
        })
}

/// Best-effort total token count for `result`. Never fails: malformed usage is
/// logged and counted as zero.
pub fn extract_token_usage(result: &StageResult, agent_name: &str) -> u64 {
    match try_extract_token_usage(result) {
        Ok(tokens) => {
            info!(agent = %agent_name, tokens, "tokens used");
            tokens
        }
        Err(err) => {
            warn!(agent = %agent_name, error = %err, "token tracking failed");
            0
        }
    }
}
