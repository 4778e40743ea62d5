use super::{Component, JSON_REPLY_INSTRUCTION};
use crate::config::{params_object, take_bool, take_required_str};
use crate::error::Result;
use crate::prompt;
use crate::store::ExecutionStateStore;
use crate::types::StageData;
use serde_json::Value;

/// Stage whose prompt is a user-supplied template.
///
/// See [`prompt::render`] for the placeholder syntax. Options:
/// - `store`: value published under the stage id (enables storing)
/// - `trim`: strip surrounding whitespace from the reply text (enables post-processing)
///
/// The rendered template is always followed by the `{"text": ...}` reply
/// instruction.
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateComponent {
    template: String,
    store: Option<Value>,
    trim: bool,
}

impl TemplateComponent {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
            store: None,
            trim: false,
        }
    }

    pub fn with_store(mut self, value: Value) -> Self {
        self.store = Some(value);
        self
    }

    pub fn with_trim(mut self, trim: bool) -> Self {
        self.trim = trim;
        self
    }

    pub fn from_params(params: &Value) -> Result<Self> {
        let what = "template component";
        let mut params = params_object(params, what)?;
        let mut component = Self::new(take_required_str(&mut params, "template", what)?);
        if let Some(value) = params.remove("store").filter(|v| !v.is_null()) {
            component = component.with_store(value);
        }
        if let Some(trim) = take_bool(&mut params, "trim", what)? {
            component = component.with_trim(trim);
        }
        Ok(component)
    }
}

impl Component for TemplateComponent {
    fn kind(&self) -> &str {
        "template"
    }

    fn if_store_variable(&self) -> bool {
        self.store.is_some()
    }

    fn if_post_process(&self) -> bool {
        self.trim
    }

    fn generate_prompt(&self, input: &StageData, state: &ExecutionStateStore) -> String {
        format!(
            "{}\n{}",
            prompt::render(&self.template, input, state),
            JSON_REPLY_INSTRUCTION
        )
    }

    fn post_process(&self, mut reply: StageData) -> StageData {
        if self.trim && reply.has_text() {
            let trimmed = reply.text().trim().to_string();
            reply.set_text(trimmed);
        }
        reply
    }

    fn store_variable_in_pipeline(&self) -> Option<Value> {
        self.store.clone()
    }
}
