//! Display text for message parts
//!
//! Parts come in several shapes; each type has a primary field and a fallback.
//! Extraction never fails: anything unexpected is rendered through the
//! unknown-type path.

use serde_json::Value;

use crate::model::PartType;

/// Extracted values longer than this are clipped.
pub const MAX_TEXT_CHARS: usize = 10_000;

/// Field names that carry a human-readable request inside a tool's input.
const PROMPT_LIKE_INPUT_FIELDS: &[&str] = &["prompt", "description", "command", "query", "pattern"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extracted {
    pub part_type: PartType,
    pub text: String,
    pub tool_name: Option<String>,
    pub tool_status: Option<String>,
}

fn non_empty_str<'a>(value: Option<&'a Value>) -> Option<&'a str> {
    value
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
}

/// Clip to `MAX_TEXT_CHARS` characters, appending the original length.
pub fn truncate(text: &str) -> String {
    let total = text.chars().count();
    if total <= MAX_TEXT_CHARS {
        return text.to_string();
    }
    let clipped: String = text.chars().take(MAX_TEXT_CHARS).collect();
    format!("{}\n…truncated, {} chars total", clipped, total)
}

/// Extract display text from a raw part document.
pub fn extract(fragment: &Value) -> Extracted {
    let raw_type = fragment
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or("unknown");

    let extracted = match PartType::parse(raw_type) {
        PartType::Text => extract_text(fragment),
        PartType::Subtask => extract_subtask(fragment),
        PartType::Tool => extract_tool(fragment),
        PartType::Unknown => None,
    };

    extracted.unwrap_or_else(|| extract_unknown(fragment, raw_type))
}

fn extract_text(fragment: &Value) -> Option<Extracted> {
    let text = fragment.get("text")?.as_str()?;
    Some(Extracted {
        part_type: PartType::Text,
        text: truncate(text),
        tool_name: None,
        tool_status: None,
    })
}

fn extract_subtask(fragment: &Value) -> Option<Extracted> {
    let text = non_empty_str(fragment.get("prompt"))
        .or_else(|| non_empty_str(fragment.get("description")))?;
    Some(Extracted {
        part_type: PartType::Subtask,
        text: truncate(text),
        tool_name: None,
        tool_status: None,
    })
}

fn extract_tool(fragment: &Value) -> Option<Extracted> {
    let tool_name = fragment
        .get("tool")
        .and_then(Value::as_str)
        .map(str::to_string);
    let state = fragment.get("state");
    if state.is_some_and(|s| !s.is_object()) {
        return None;
    }
    let tool_status = state
        .and_then(|s| s.get("status"))
        .and_then(Value::as_str)
        .map(str::to_string);

    let output = non_empty_str(state.and_then(|s| s.get("output")));
    let input_prompt = state
        .and_then(|s| s.get("input"))
        .and_then(|input| {
            PROMPT_LIKE_INPUT_FIELDS
                .iter()
                .find_map(|key| non_empty_str(input.get(key)))
        });

    let text = match output.or(input_prompt) {
        Some(text) => truncate(text),
        None => format!("[tool:{}]", tool_name.as_deref().unwrap_or("unknown")),
    };

    Some(Extracted {
        part_type: PartType::Tool,
        text,
        tool_name,
        tool_status,
    })
}

fn extract_unknown(fragment: &Value, raw_type: &str) -> Extracted {
    let text = serde_json::to_string_pretty(fragment)
        .ok()
        .filter(|s| !s.is_empty() && s != "null")
        .map(|s| truncate(&s))
        .unwrap_or_else(|| format!("[{} part]", raw_type));
    Extracted {
        part_type: PartType::Unknown,
        text,
        tool_name: None,
        tool_status: None,
    }
}
