use super::{Component, JSON_REPLY_INSTRUCTION};
use crate::config::{params_object, take_optional_str};
use crate::error::Result;
use crate::store::ExecutionStateStore;
use crate::types::StageData;
use serde_json::Value;

const DEFAULT_TARGET_LANGUAGE: &str = "Chinese";

/// Pass-through stage asking the backend to translate the text.
#[derive(Debug, Clone, PartialEq)]
pub struct TranslateComponent {
    target_language: String,
}

impl TranslateComponent {
    pub fn new(target_language: impl Into<String>) -> Self {
        Self {
            target_language: target_language.into(),
        }
    }

    /// `target_language` defaults to Chinese.
    pub fn from_params(params: &Value) -> Result<Self> {
        let mut params = params_object(params, "translate component")?;
        let target = take_optional_str(&mut params, "target_language", "translate component")?
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_TARGET_LANGUAGE.to_string());
        Ok(Self::new(target))
    }
}

impl Default for TranslateComponent {
    fn default() -> Self {
        Self::new(DEFAULT_TARGET_LANGUAGE)
    }
}

impl Component for TranslateComponent {
    fn kind(&self) -> &str {
        "translate"
    }

    fn if_store_variable(&self) -> bool {
        false
    }

    fn if_post_process(&self) -> bool {
        false
    }

    fn generate_prompt(&self, input: &StageData, _state: &ExecutionStateStore) -> String {
        format!(
            "{}, translate this passage into {}.\n{}",
            input.text(),
            self.target_language,
            JSON_REPLY_INSTRUCTION
        )
    }
}
