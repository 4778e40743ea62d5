use super::{Component, JSON_REPLY_INSTRUCTION};
use crate::config::{params_object, take_optional_str, take_required_str};
use crate::error::Result;
use crate::store::ExecutionStateStore;
use crate::types::StageData;
use serde_json::Value;

/// Role-play stage: prefixes the user text with a system persona.
///
/// Stores its persona under the stage id so later stages can refer to it as
/// `{state.<stage_id>}`. With a `reply_prefix` configured it also prefixes
/// the reply text.
#[derive(Debug, Clone, PartialEq)]
pub struct PersonaComponent {
    system: String,
    reply_prefix: Option<String>,
}

impl PersonaComponent {
    pub fn new(system: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            reply_prefix: None,
        }
    }

    pub fn with_reply_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.reply_prefix = Some(prefix.into()).filter(|p: &String| !p.is_empty());
        self
    }

    /// `system` is required; `reply_prefix` is optional.
    pub fn from_params(params: &Value) -> Result<Self> {
        let what = "persona component";
        let mut params = params_object(params, what)?;
        let system = take_required_str(&mut params, "system", what)?;
        let mut component = Self::new(system);
        if let Some(prefix) = take_optional_str(&mut params, "reply_prefix", what)? {
            component = component.with_reply_prefix(prefix);
        }
        Ok(component)
    }
}

impl Component for PersonaComponent {
    fn kind(&self) -> &str {
        "persona"
    }

    fn if_store_variable(&self) -> bool {
        true
    }

    fn if_post_process(&self) -> bool {
        self.reply_prefix.is_some()
    }

    fn generate_prompt(&self, input: &StageData, _state: &ExecutionStateStore) -> String {
        format!(
            "system: {}\nuser: {}\n{}",
            self.system,
            input.text(),
            JSON_REPLY_INSTRUCTION
        )
    }

    fn post_process(&self, mut reply: StageData) -> StageData {
        let Some(prefix) = self.reply_prefix.as_deref() else {
            return reply;
        };
        if reply.has_text() && !reply.text().starts_with(prefix) {
            let prefixed = format!("{}{}", prefix, reply.text());
            reply.set_text(prefixed);
        }
        reply
    }

    fn store_variable_in_pipeline(&self) -> Option<Value> {
        Some(Value::String(self.system.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_prompt_layout() {
        let persona = PersonaComponent::new("You are a chef");
        let prompt = persona.generate_prompt(
            &StageData::from_text("what is your favorite food"),
            &ExecutionStateStore::new(),
        );
        assert_eq!(
            prompt,
            "system: You are a chef\nuser: what is your favorite food\nplease return result as json, example: {\"text\": output}"
        );
    }

    #[test]
    fn test_missing_text_renders_empty() {
        let persona = PersonaComponent::new("s");
        let prompt = persona.generate_prompt(&StageData::new(), &ExecutionStateStore::new());
        assert!(prompt.contains("user: \n"));
    }

    #[test]
    fn test_post_process_idempotent() {
        let persona = PersonaComponent::new("s").with_reply_prefix("Hahahahaha!");
        let once = persona.post_process(StageData::from_text("pizza"));
        let twice = persona.post_process(once.clone());
        assert_eq!(once.text(), "Hahahahaha!pizza");
        assert_eq!(once, twice);
    }

    #[test]
    fn test_post_process_without_text_is_noop() {
        let persona = PersonaComponent::new("s").with_reply_prefix("X:");
        let reply = StageData::new().insert("other", 1);
        assert_eq!(persona.post_process(reply.clone()), reply);
    }

    #[test]
    fn test_flags_and_store_value() {
        let plain = PersonaComponent::new("a chef");
        assert!(plain.if_store_variable());
        assert!(!plain.if_post_process());
        assert_eq!(plain.store_variable_in_pipeline(), Some(json!("a chef")));
        assert!(PersonaComponent::new("s").with_reply_prefix("").reply_prefix.is_none());
    }

    #[test]
    fn test_from_params() {
        let persona =
            PersonaComponent::from_params(&json!({"system": "a chef", "reply_prefix": "> "})).unwrap();
        assert!(persona.if_post_process());
        assert!(PersonaComponent::from_params(&json!({})).is_err());
        assert!(PersonaComponent::from_params(&json!({"system": 5})).is_err());
    }
}
