//! Parsing utilities for LLM replies.
//!
//! Defensive extraction of the `{"text": ...}` reply envelope from
//! potentially messy LLM text: fenced code blocks, prose around the object,
//! and `<think>` preambles are all tolerated. Anything that still does not
//! yield an envelope is wrapped as `{"text": raw}` and flagged.

use crate::error::Result;
use crate::types::StageData;
use crate::PipelineError;
use serde_json::Value;

/// Outcome of parsing one reply.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedReply {
    /// The record handed to post-processing and the next stage.
    pub data: StageData,
    /// `Some(reason)` when the wrap-as-text fallback was used.
    pub fallback: Option<String>,
}

impl ParsedReply {
    pub fn is_lenient(&self) -> bool {
        self.fallback.is_some()
    }
}

/// Parse reply content into the declared `{"text": ...}` envelope.
///
/// Never fails. A JSON object carrying a string `text` field is accepted
/// as-is (extra fields included). Everything else, including valid JSON of
/// another shape, becomes `{"text": content}` with `fallback` set.
pub fn parse_reply(content: &str) -> ParsedReply {
    let (_, cleaned) = extract_thinking(content);

    match parse_value_defensively(&cleaned) {
        Ok(value) => match StageData::from_value(value) {
            Some(data) if data.has_text() => ParsedReply {
                data,
                fallback: None,
            },
            _ => wrap_as_text(content, "reply JSON has no string \"text\" field"),
        },
        Err(_) => wrap_as_text(content, "reply is not a JSON envelope"),
    }
}

fn wrap_as_text(content: &str, reason: &str) -> ParsedReply {
    ParsedReply {
        data: StageData::from_text(content),
        fallback: Some(format!("{}; wrapped raw content as text", reason)),
    }
}

/// Extract `<think>...</think>` blocks from a response (DeepSeek R1 style).
///
/// Returns `(thinking_content, cleaned_text)` where `cleaned_text` has the
/// thinking block removed and is trimmed.
pub fn extract_thinking(text: &str) -> (Option<String>, String) {
    let think_start = "<think>";
    let think_end = "</think>";

    if let Some(start_idx) = text.find(think_start) {
        if let Some(end_idx) = text.find(think_end) {
            if end_idx > start_idx {
                let thinking = text[start_idx + think_start.len()..end_idx]
                    .trim()
                    .to_string();
                let mut cleaned = String::new();
                cleaned.push_str(&text[..start_idx]);
                cleaned.push_str(&text[end_idx + think_end.len()..]);
                let thinking = if thinking.is_empty() {
                    None
                } else {
                    Some(thinking)
                };
                return (thinking, cleaned.trim().to_string());
            }
        }
    }

    (None, text.to_string())
}

/// Extract JSON content from markdown fenced code blocks.
///
/// Recognizes `` ```json ``, `` ```JSON ``, and plain `` ``` `` fences.
pub fn extract_json_block(text: &str) -> Option<String> {
    let markers = ["```json", "```JSON", "```"];
    for marker in markers {
        if let Some(start) = text.find(marker) {
            let content_start = start + marker.len();
            if let Some(end) = text[content_start..].find("```") {
                return Some(text[content_start..content_start + end].trim().to_string());
            }
        }
    }
    None
}

/// Try to locate and extract a JSON object or array from text that may
/// contain surrounding prose.
///
/// Tries, in order:
/// 1. Markdown code block extraction
/// 2. First `{` or `[` with matching closer
pub fn extract_json_candidate(text: &str) -> Option<String> {
    let trimmed = text.trim();

    if let Some(block) = extract_json_block(trimmed) {
        return Some(block);
    }

    if let Some(idx) = trimmed.find('{').or_else(|| trimmed.find('[')) {
        let candidate = &trimmed[idx..];
        if serde_json::from_str::<Value>(candidate).is_ok() {
            return Some(candidate.to_string());
        }
        let close = if candidate.starts_with('{') { '}' } else { ']' };
        if let Some(end) = candidate.rfind(close) {
            let substr = &candidate[..=end];
            if serde_json::from_str::<Value>(substr).is_ok() {
                return Some(substr.to_string());
            }
        }
    }

    None
}

/// Parse text into a `serde_json::Value`, requiring valid JSON.
///
/// Tries defensive extraction but returns an error if no valid JSON is found.
pub fn parse_value_defensively(text: &str) -> Result<Value> {
    let trimmed = text.trim();

    if let Ok(val) = serde_json::from_str::<Value>(trimmed) {
        return Ok(val);
    }

    if let Some(candidate) = extract_json_candidate(trimmed) {
        if let Ok(val) = serde_json::from_str::<Value>(&candidate) {
            return Ok(val);
        }
    }

    Err(PipelineError::Other(format!(
        "No valid JSON found in LLM output. Raw text (truncated): {}",
        truncate(trimmed, 200)
    )))
}

/// First `max_chars` characters of `text`, on a char boundary.
pub(crate) fn truncate(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_reply_plain_envelope() {
        let parsed = parse_reply(r#"{"text": "hello"}"#);
        assert!(!parsed.is_lenient());
        assert_eq!(parsed.data, StageData::from_text("hello"));
    }

    #[test]
    fn test_parse_reply_keeps_extra_fields() {
        let parsed = parse_reply(r#"{"text": "hi", "mood": "calm"}"#);
        assert!(!parsed.is_lenient());
        assert_eq!(parsed.data.get("mood"), Some(&json!("calm")));
    }

    #[test]
    fn test_parse_reply_fenced_block() {
        let parsed = parse_reply("Sure:\n```json\n{\"text\": \"fenced\"}\n```");
        assert!(!parsed.is_lenient());
        assert_eq!(parsed.data.text(), "fenced");
    }

    #[test]
    fn test_parse_reply_embedded_in_prose() {
        let parsed = parse_reply("Here you go {\"text\": \"inner\"} enjoy");
        assert_eq!(parsed.data.text(), "inner");
        assert!(!parsed.is_lenient());
    }

    #[test]
    fn test_parse_reply_after_thinking() {
        let parsed = parse_reply("<think>{\"text\": \"draft\"}</think>{\"text\": \"final\"}");
        assert_eq!(parsed.data.text(), "final");
    }

    #[test]
    fn test_parse_reply_not_json_wraps() {
        let parsed = parse_reply("not json");
        assert!(parsed.is_lenient());
        assert_eq!(parsed.data, StageData::from_text("not json"));
    }

    #[test]
    fn test_parse_reply_wrong_shape_wraps_raw() {
        let parsed = parse_reply(r#"{"answer": 42}"#);
        assert!(parsed.is_lenient());
        assert_eq!(parsed.data.text(), r#"{"answer": 42}"#);
    }

    #[test]
    fn test_extract_thinking_present() {
        let (thinking, cleaned) = extract_thinking("Before <think>my reasoning</think> after");
        assert_eq!(thinking, Some("my reasoning".to_string()));
        assert_eq!(cleaned, "Before  after");
    }

    #[test]
    fn test_extract_thinking_absent() {
        let (thinking, cleaned) = extract_thinking("no tags");
        assert!(thinking.is_none());
        assert_eq!(cleaned, "no tags");
    }

    #[test]
    fn test_extract_json_block() {
        let text = "text\n```json\n{\"a\":1}\n```\nmore";
        assert_eq!(extract_json_block(text), Some("{\"a\":1}".to_string()));
        assert_eq!(extract_json_block("no code block"), None);
    }

    #[test]
    fn test_parse_value_defensively_err() {
        assert!(parse_value_defensively("not json").is_err());
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("你好世界", 2), "你好");
        assert_eq!(truncate("abc", 10), "abc");
    }
}
