//! Stage components: prompt builders with optional post-processing.
//!
//! A [`Component`] turns the stage input into a prompt, optionally reshapes
//! the parsed reply and optionally publishes one value into the run's
//! [`ExecutionStateStore`]. Both capabilities are fixed when the component
//! is constructed; a stage configuration may override them.
//!
//! Built-in kinds: [`PersonaComponent`] (`persona`), [`TranslateComponent`]
//! (`translate`) and [`TemplateComponent`] (`template`).

pub mod persona;
pub mod template;
pub mod translate;

pub use persona::PersonaComponent;
pub use template::TemplateComponent;
pub use translate::TranslateComponent;

use crate::store::ExecutionStateStore;
use crate::types::StageData;
use serde_json::Value;

/// Trailer asking the backend to reply as a `{"text": ...}` envelope.
pub const JSON_REPLY_INSTRUCTION: &str = "please return result as json, example: {\"text\": output}";

/// One stage's prompt logic.
///
/// `generate_prompt` and `post_process` must be deterministic. `post_process`
/// must be idempotent and leave records without a string `text` unchanged.
pub trait Component: Send + Sync {
    /// Registered kind name, for logs and reports.
    fn kind(&self) -> &str;

    /// Whether the orchestrator should call [`store_variable_in_pipeline`](Component::store_variable_in_pipeline).
    fn if_store_variable(&self) -> bool;

    /// Whether the orchestrator should call [`post_process`](Component::post_process).
    fn if_post_process(&self) -> bool;

    /// Build the prompt. `state` holds exactly what earlier stages stored.
    fn generate_prompt(&self, input: &StageData, state: &ExecutionStateStore) -> String;

    fn post_process(&self, reply: StageData) -> StageData {
        reply
    }

    /// The value to store under this stage's id, if any.
    fn store_variable_in_pipeline(&self) -> Option<Value> {
        None
    }
}

impl std::fmt::Debug for dyn Component {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Component")
            .field("kind", &self.kind())
            .field("if_store_variable", &self.if_store_variable())
            .field("if_post_process", &self.if_post_process())
            .finish()
    }
}
