use crate::store::ExecutionStateStore;
use crate::types::StageData;
use serde_json::Value;

/// Sentinel that should never appear in real templates.
const ESCAPE_SENTINEL: &str = "\x00LBRACE\x00";
/// Sentinel for escaped closing brace.
const ESCAPE_SENTINEL_CLOSE: &str = "\x00RBRACE\x00";

/// Build a prompt string from a template, the stage input and the state store.
///
/// Placeholders:
/// - `{text}` (or `{input}`): the input's `text` field
/// - `{input.<key>}`: any input field (non-strings rendered as JSON)
/// - `{state.<stage_id>}`: a value stored by an earlier stage
///
/// Missing values render as the empty string. Unknown placeholders are left
/// untouched. Use `{{` and `}}` for literal braces.
///
/// # Example
///
/// ```
/// use prompt_pipeline::prompt::render;
/// use prompt_pipeline::{ExecutionStateStore, StageData};
///
/// let input = StageData::from_text("dumplings");
/// let store = ExecutionStateStore::new();
/// let result = render("Rate {text}, reply as {{\"text\": ...}}", &input, &store);
/// assert_eq!(result, r#"Rate dumplings, reply as {"text": ...}"#);
/// ```
pub fn render(template: &str, input: &StageData, state: &ExecutionStateStore) -> String {
    // Pass 1: protect escaped braces
    let protected = template
        .replace("{{", ESCAPE_SENTINEL)
        .replace("}}", ESCAPE_SENTINEL_CLOSE);

    // Pass 2: substitute placeholders
    let mut rendered = String::with_capacity(protected.len());
    let mut rest = protected.as_str();
    while let Some(open) = rest.find('{') {
        rendered.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let resolved = after
            .find('}')
            .and_then(|close| resolve(&after[..close], input, state).map(|v| (close, v)));
        match resolved {
            Some((close, value)) => {
                rendered.push_str(&value);
                rest = &after[close + 1..];
            }
            None => {
                rendered.push('{');
                rest = after;
            }
        }
    }
    rendered.push_str(rest);

    // Pass 3: restore escaped braces
    rendered
        .replace(ESCAPE_SENTINEL, "{")
        .replace(ESCAPE_SENTINEL_CLOSE, "}")
}

fn resolve(name: &str, input: &StageData, state: &ExecutionStateStore) -> Option<String> {
    if name == "text" || name == "input" {
        return Some(input.text().to_string());
    }
    if let Some(key) = name.strip_prefix("input.") {
        return Some(input.field_text(key));
    }
    if let Some(stage_id) = name.strip_prefix("state.") {
        return Some(match state.get(stage_id) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        });
    }
    None
}
