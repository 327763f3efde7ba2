//! Turns raw model text into a validated [`Action`].
//!
//! Models routinely wrap JSON in markdown fences or surround it with prose, so the
//! parser strips a fence, isolates the first balanced object and decodes that. When
//! nothing decodes, a small table of free-form phrasings is consulted before giving up.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::types::{Action, ActionKind};

/// Model output that could not be turned into an action. The raw text is kept for re-prompting.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason}")]
pub struct ParseFailure {
    pub reason: String,
    pub raw_text: String,
}

impl ParseFailure {
    fn new(reason: impl Into<String>, raw_text: &str) -> Self {
        Self {
            reason: reason.into(),
            raw_text: raw_text.to_string(),
        }
    }
}

static FENCED_BLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)```[A-Za-z]*[ \t]*\r?\n?(.*?)```").expect("fence pattern is valid")
});

/// One free-form phrasing that maps to an action when JSON decoding fails.
pub struct FreeformPattern {
    pub name: &'static str,
    pub regex: Regex,
    pub build: fn(&Captures<'_>, &str) -> Action,
}

/// Checked in order; the first match wins.
pub static FREEFORM_PATTERNS: Lazy<Vec<FreeformPattern>> = Lazy::new(|| {
    vec![
        FreeformPattern {
            name: "completion",
            regex: Regex::new(r"(?i)task complete|task is complete|i'm done|i’m done")
                .expect("completion pattern is valid"),
            build: |_, raw| {
                Action::new(ActionKind::Done)
                    .with_param("result", raw)
                    .with_reasoning(raw)
            },
        },
        FreeformPattern {
            name: "navigation",
            regex: Regex::new(
                r#"(?i)(?:navigate|go|open|visit)\s+(?:to\s+)?(?:the\s+)?(?:url\s+)?[`"']?(https?://[^\s`"']+)"#,
            )
            .expect("navigation pattern is valid"),
            build: |caps, raw| {
                Action::new(ActionKind::Navigate)
                    .with_param("url", &caps[1])
                    .with_reasoning(raw)
            },
        },
    ]
});

pub fn parse(raw_text: &str) -> Result<Action, ParseFailure> {
    if raw_text.trim().is_empty() {
        return Err(ParseFailure::new("empty response from model", raw_text));
    }

    let candidate = strip_fence(raw_text);
    let json_text = first_balanced_object(candidate).unwrap_or(candidate);

    match serde_json::from_str::<Value>(json_text) {
        Ok(value) => decode_action(value, raw_text),
        Err(_) => parse_freeform(raw_text),
    }
}

/// Matches `raw_text` against [`FREEFORM_PATTERNS`].
pub fn parse_freeform(raw_text: &str) -> Result<Action, ParseFailure> {
    FREEFORM_PATTERNS
        .iter()
        .find_map(|pattern| {
            pattern
                .regex
                .captures(raw_text)
                .map(|caps| (pattern.build)(&caps, raw_text))
        })
        .ok_or_else(|| ParseFailure::new("could not parse model response as an action", raw_text))
}

fn strip_fence(text: &str) -> &str {
    FENCED_BLOCK
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim())
        .unwrap_or_else(|| text.trim())
}

/// Returns the first `{...}` span whose braces balance, ignoring braces inside strings.
fn first_balanced_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

fn decode_action(value: Value, raw_text: &str) -> Result<Action, ParseFailure> {
    let Value::Object(mut object) = value else {
        return Err(ParseFailure::new("response is not a JSON object", raw_text));
    };

    let name = match object.get("action") {
        Some(Value::String(name)) if !name.trim().is_empty() => name.clone(),
        Some(_) => return Err(ParseFailure::new("'action' must be a string", raw_text)),
        None => return Err(ParseFailure::new("response missing 'action' field", raw_text)),
    };

    let Some(kind) = ActionKind::from_name(&name) else {
        return Err(ParseFailure::new(
            format!("unknown action: {}", name.to_lowercase()),
            raw_text,
        ));
    };

    let params = match object.remove("params") {
        Some(Value::Object(params)) => params,
        _ => Map::new(),
    };
    let reasoning = ["reasoning", "thought"]
        .iter()
        .find_map(|key| object.get(*key).and_then(Value::as_str))
        .unwrap_or_default()
        .to_string();

    let action = Action {
        kind,
        params,
        reasoning,
    };
    validate(&action).map_err(|reason| ParseFailure::new(reason, raw_text))?;
    Ok(action)
}

fn validate(action: &Action) -> Result<(), String> {
    let has = |key: &str| action.params.get(key).is_some_and(is_truthy);
    let present = |key: &str| action.params.get(key).is_some_and(|v| !v.is_null());
    let kind = action.kind;

    let missing = match kind {
        ActionKind::Click | ActionKind::Hover if !has("id") => "'id'",
        ActionKind::Type if !has("id") => "'id'",
        ActionKind::Type if !present("text") => "'text'",
        ActionKind::Select if !has("id") => "'id'",
        ActionKind::Select if !has("value") => "'value'",
        ActionKind::Navigate if !has("url") => "'url'",
        ActionKind::Keypress if !has("key") => "'key'",
        ActionKind::Copy if !has("text") && !has("id") => "'text' or 'id'",
        ActionKind::TabSwitch if !present("index") && !has("tabId") => "'index' or 'tabId'",
        _ => return Ok(()),
    };
    Err(format!("{kind} action requires {missing} param"))
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}
