use crate::error::Result;
use crate::parsing::truncate;
use crate::PipelineError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Key/value record handed from one stage to the next.
///
/// The only field the engine relies on is `text`; everything else travels
/// through untouched. Serializes as a plain JSON object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StageData {
    fields: Map<String, Value>,
}

impl StageData {
    /// Name of the field every stage reads and writes.
    pub const TEXT: &'static str = "text";

    pub fn new() -> Self {
        Self::default()
    }

    /// `{"text": text}`.
    pub fn from_text(text: impl Into<String>) -> Self {
        let mut data = Self::new();
        data.set_text(text);
        data
    }

    /// Wrap an existing JSON value. Returns `None` unless it is an object.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(fields) => Some(Self { fields }),
            _ => None,
        }
    }

    /// The `text` field, or `""` when it is absent or not a string.
    pub fn text(&self) -> &str {
        self.fields
            .get(Self::TEXT)
            .and_then(Value::as_str)
            .unwrap_or("")
    }

    /// Whether a string `text` field is present.
    pub fn has_text(&self) -> bool {
        matches!(self.fields.get(Self::TEXT), Some(Value::String(_)))
    }

    pub fn set_text(&mut self, text: impl Into<String>) {
        self.fields
            .insert(Self::TEXT.to_string(), Value::String(text.into()));
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// A field rendered for prompt substitution: strings verbatim, other
    /// values as compact JSON, missing fields as `""`.
    pub fn field_text(&self, key: &str) -> String {
        match self.fields.get(key) {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => String::new(),
        }
    }

    pub fn insert(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.fields)
    }

    /// Deserialize the record into a typed `T` at the edge of a workflow.
    pub fn parse_as<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(Value::Object(self.fields.clone())).map_err(|e| {
            let snippet = Value::Object(self.fields.clone()).to_string();
            PipelineError::Other(format!(
                "Failed to parse stage data into target type: {}. Value (truncated): {}",
                e,
                truncate(&snippet, 200)
            ))
        })
    }
}

impl From<Map<String, Value>> for StageData {
    fn from(fields: Map<String, Value>) -> Self {
        Self { fields }
    }
}

/// Token accounting reported by a backend.
///
/// Vendors differ: some report the full breakdown, chat-completions style
/// clients only surface a total.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TokenUsage {
    Detailed {
        prompt_tokens: u64,
        completion_tokens: u64,
        total_tokens: u64,
    },
    Total(u64),
}

impl TokenUsage {
    /// All-zero breakdown.
    pub fn zero_detailed() -> Self {
        TokenUsage::Detailed {
            prompt_tokens: 0,
            completion_tokens: 0,
            total_tokens: 0,
        }
    }

    /// Same shape as `self`, every count zero.
    pub fn zeroed(&self) -> Self {
        match self {
            TokenUsage::Detailed { .. } => Self::zero_detailed(),
            TokenUsage::Total(_) => TokenUsage::Total(0),
        }
    }

    pub fn total(&self) -> u64 {
        match self {
            TokenUsage::Detailed { total_tokens, .. } => *total_tokens,
            TokenUsage::Total(total) => *total,
        }
    }

    pub fn is_zero(&self) -> bool {
        match self {
            TokenUsage::Detailed {
                prompt_tokens,
                completion_tokens,
                total_tokens,
            } => *prompt_tokens == 0 && *completion_tokens == 0 && *total_tokens == 0,
            TokenUsage::Total(total) => *total == 0,
        }
    }
}

impl Default for TokenUsage {
    fn default() -> Self {
        TokenUsage::Total(0)
    }
}

/// Normalized reply every [`LlmClient`](crate::client::LlmClient) produces.
///
/// `content` is always populated. On failure it holds a human-readable
/// diagnostic, token counts are zero and `error` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyEnvelope {
    pub content: String,
    pub tokens: TokenUsage,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ReplyEnvelope {
    pub fn success(content: impl Into<String>, tokens: TokenUsage, model: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            tokens,
            model: model.into(),
            error: None,
        }
    }

    /// A failure envelope. `usage_shape` only selects the token layout; the
    /// counts are always zero.
    pub fn failure(error: impl std::fmt::Display, usage_shape: TokenUsage, model: impl Into<String>) -> Self {
        let error = error.to_string();
        Self {
            content: format!("API call failed: {}", error),
            tokens: usage_shape.zeroed(),
            model: model.into(),
            error: Some(error),
        }
    }

    pub fn is_failure(&self) -> bool {
        self.error.is_some()
    }
}
