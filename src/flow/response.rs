// SPDX-License-Identifier: MIT

//! Turning raw model text into a node's output map
//!
//! Each [`RespFormat`] maps to a pure parser function. JSON output goes through
//! a single targeted repair pass before parsing; a parse failure yields an
//! empty map and the caller decides what that means.

use super::pool::VariablePool;
use crate::adk::error::PoolError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::borrow::Cow;

/// Output key that receives the model's reasoning trace
pub const REASONING_CONTENT: &str = "REASONING_CONTENT";

static FENCED_JSON: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(json|JSON)?(.*?)```").expect("valid fence regex"));

static ACTION_INPUT_START: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""action_input"\s*:\s*""#).expect("valid action_input regex"));

static NEXT_KEY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^\s*,\s*"[^"\n]*"\s*:"#).expect("valid key regex"));

/// Declared response format of an LLM node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "RespFormatRepr")]
pub enum RespFormat {
    #[default]
    Text,
    Markdown,
    Json,
}

/// Node definitions use either the numeric code or the name
#[derive(Deserialize)]
#[serde(untagged)]
enum RespFormatRepr {
    Code(u8),
    Name(String),
}

impl TryFrom<RespFormatRepr> for RespFormat {
    type Error = String;

    fn try_from(repr: RespFormatRepr) -> Result<Self, Self::Error> {
        match repr {
            RespFormatRepr::Code(0) => Ok(Self::Text),
            RespFormatRepr::Code(1) => Ok(Self::Markdown),
            RespFormatRepr::Code(2) => Ok(Self::Json),
            RespFormatRepr::Code(other) => Err(format!("unknown respFormat code {}", other)),
            RespFormatRepr::Name(name) => match name.to_ascii_lowercase().as_str() {
                "text" => Ok(Self::Text),
                "markdown" => Ok(Self::Markdown),
                "json" => Ok(Self::Json),
                _ => Err(format!("unknown respFormat '{}'", name)),
            },
        }
    }
}

/// Arguments shared by every format parser
#[derive(Debug, Clone, Copy)]
pub struct ParseInput<'a> {
    pub raw: &'a str,
    pub reasoning: &'a str,
    pub output_keys: &'a [String],
}

type FormatParser = fn(&ParseInput<'_>) -> Map<String, Value>;

impl RespFormat {
    fn parser(self) -> FormatParser {
        match self {
            Self::Text => parse_text,
            Self::Markdown => parse_markdown,
            Self::Json => parse_json_output,
        }
    }
}

/// Parse `raw` according to `format`
pub fn parse(
    format: RespFormat,
    raw: &str,
    reasoning: &str,
    output_keys: &[String],
) -> Map<String, Value> {
    let input = ParseInput {
        raw,
        reasoning,
        output_keys,
    };
    (format.parser())(&input)
}

fn primary_only(input: &ParseInput<'_>) -> Map<String, Value> {
    let mut out = Map::new();
    if let Some(first) = input.output_keys.first() {
        out.insert(first.clone(), Value::String(input.raw.to_string()));
    }
    out
}

fn parse_text(input: &ParseInput<'_>) -> Map<String, Value> {
    if input.reasoning.is_empty() {
        return primary_only(input);
    }
    input
        .output_keys
        .iter()
        .map(|key| {
            let text = if key == REASONING_CONTENT {
                input.reasoning
            } else {
                input.raw
            };
            (key.clone(), Value::String(text.to_string()))
        })
        .collect()
}

fn parse_markdown(input: &ParseInput<'_>) -> Map<String, Value> {
    primary_only(input)
}

fn parse_json_output(input: &ParseInput<'_>) -> Map<String, Value> {
    match parse_json(input.raw) {
        Some(Value::Object(map)) => map,
        Some(_) => parse_text(input),
        None => Map::new(),
    }
}

/// Extract, repair and parse a JSON payload; `None` when it cannot be parsed
pub fn parse_json(raw: &str) -> Option<Value> {
    let candidate = FENCED_JSON
        .captures(raw)
        .and_then(|caps| caps.get(2))
        .map_or(raw, |m| m.as_str())
        .trim();

    if let Ok(value) = serde_json::from_str(candidate) {
        return Some(value);
    }
    let repaired = repair_action_input(candidate);
    match serde_json::from_str(&repaired) {
        Ok(value) => Some(value),
        Err(e) => {
            log::warn!("Model output is not valid JSON ({}), using empty output", e);
            None
        }
    }
}

/// Escape literal control characters and bare quotes inside the
/// `"action_input"` string value, leaving the rest of the text untouched.
pub fn repair_action_input(text: &str) -> Cow<'_, str> {
    let Some(start) = ACTION_INPUT_START.find(text).map(|m| m.end()) else {
        return Cow::Borrowed(text);
    };
    let Some(end) = value_end(text, start) else {
        return Cow::Borrowed(text);
    };

    let value = &text[start..end];
    let escaped = escape_string_body(value);
    if escaped == value {
        return Cow::Borrowed(text);
    }

    let mut out = String::with_capacity(text.len() + escaped.len() - value.len());
    out.push_str(&text[..start]);
    out.push_str(&escaped);
    out.push_str(&text[end..]);
    Cow::Owned(out)
}

/// Index of the quote that closes the string value opened at `start`.
///
/// Preference: the first unescaped quote followed by `, "key":`; otherwise the
/// last one followed by `}`; otherwise the last quote in the text.
fn value_end(text: &str, start: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    let candidates: Vec<usize> = (start..bytes.len())
        .filter(|&i| bytes[i] == b'"' && !is_escaped(bytes, i))
        .collect();

    if let Some(&i) = candidates
        .iter()
        .find(|&&i| NEXT_KEY.is_match(&text[i + 1..]))
    {
        return Some(i);
    }

    candidates
        .iter()
        .rev()
        .find(|&&i| text[i + 1..].trim_start().starts_with('}'))
        .or_else(|| candidates.last())
        .copied()
}

/// A byte is escaped when an odd run of backslashes precedes it
fn is_escaped(bytes: &[u8], i: usize) -> bool {
    bytes[..i].iter().rev().take_while(|&&b| b == b'\\').count() % 2 == 1
}

fn escape_string_body(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut backslashes = 0usize;
    for c in value.chars() {
        match c {
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '"' if backslashes % 2 == 0 => out.push_str("\\\""),
            other => out.push(other),
        }
        backslashes = if c == '\\' { backslashes + 1 } else { 0 };
    }
    out
}

/// Build the ordered output map of a node.
///
/// Parsed values win; a declared key that is absent or null in the parsed map
/// is read from the pool under the node's own id. When the pool has nothing
/// either, JSON output fails with the pool's `KeyNotFound`. Text and markdown
/// output only ever fill the primary key, so the remaining keys are emitted
/// empty: `""` for [`REASONING_CONTENT`], null otherwise.
pub fn assemble_outputs(
    format: RespFormat,
    parsed: &Map<String, Value>,
    output_keys: &[String],
    node_id: &str,
    pool: &VariablePool,
) -> Result<Map<String, Value>, PoolError> {
    let mut outputs = Map::new();
    for key in output_keys {
        let value = match parsed.get(key) {
            Some(value) if !value.is_null() => value.clone(),
            _ => match pool.get(node_id, key) {
                Ok(value) => value,
                Err(e) if format == RespFormat::Json => return Err(e),
                Err(_) if key == REASONING_CONTENT => Value::String(String::new()),
                Err(_) => Value::Null,
            },
        };
        outputs.insert(key.clone(), value);
    }
    Ok(outputs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn keys(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_text_with_reasoning() {
        let out = parse(
            RespFormat::Text,
            "final answer",
            "because",
            &keys(&["ANSWER", "REASONING_CONTENT"]),
        );
        assert_eq!(
            Value::Object(out),
            json!({"ANSWER": "final answer", "REASONING_CONTENT": "because"})
        );
    }

    #[test]
    fn test_text_without_reasoning_uses_primary_key() {
        let out = parse(
            RespFormat::Text,
            "final answer",
            "",
            &keys(&["ANSWER", "REASONING_CONTENT"]),
        );
        assert_eq!(Value::Object(out), json!({"ANSWER": "final answer"}));
    }

    #[test]
    fn test_markdown_verbatim() {
        let raw = "# Title\n\n```json\n{\"a\":1}\n```";
        let out = parse(RespFormat::Markdown, raw, "ignored", &keys(&["output"]));
        assert_eq!(out["output"], json!(raw));
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn test_no_output_keys() {
        assert!(parse(RespFormat::Text, "x", "", &[]).is_empty());
    }

    #[test]
    fn test_json_fenced_block() {
        let raw = "Sure:\n```json\n{\"city\": \"Hefei\", \"n\": 2}\n```\nDone.";
        let out = parse(RespFormat::Json, raw, "", &keys(&["city"]));
        assert_eq!(Value::Object(out), json!({"city": "Hefei", "n": 2}));
    }

    #[test]
    fn test_json_repair_literal_control_characters() {
        let raw = "{\"action_input\": \"line1\nline2\t\"q\"\"}";
        assert!(serde_json::from_str::<Value>(raw).is_err());

        let value = parse_json(raw).unwrap();
        assert_eq!(value["action_input"], json!("line1\nline2\t\"q\""));
    }

    #[test]
    fn test_json_repair_keeps_escaped_quotes() {
        let raw = "{\"action_input\": \"say \\\"hi\\\"\r\nbye\"}";
        let value = parse_json(raw).unwrap();
        assert_eq!(value["action_input"], json!("say \"hi\"\r\nbye"));
    }

    #[test]
    fn test_json_repair_leaves_other_fields() {
        let raw = "{\"action\": \"search\", \"action_input\": \"a \"b\"\nc\", \"thought\": \"t\"}";
        let value = parse_json(raw).unwrap();
        assert_eq!(value["action"], json!("search"));
        assert_eq!(value["action_input"], json!("a \"b\"\nc"));
        assert_eq!(value["thought"], json!("t"));
    }

    #[test]
    fn test_repair_is_noop_on_valid_json() {
        let raw = r#"{"action_input": "already\nescaped"}"#;
        assert!(matches!(repair_action_input(raw), Cow::Borrowed(_)));
        let plain = r#"{"answer": 1}"#;
        assert!(matches!(repair_action_input(plain), Cow::Borrowed(_)));
    }

    #[test]
    fn test_json_invalid_yields_empty_map() {
        let out = parse(RespFormat::Json, "not json at all", "", &keys(&["output"]));
        assert!(out.is_empty());
    }

    #[test]
    fn test_json_non_object_falls_back_to_text() {
        let out = parse(RespFormat::Json, "[1, 2]", "", &keys(&["output"]));
        assert_eq!(out["output"], json!("[1, 2]"));
    }

    #[test]
    fn test_resp_format_serde() {
        let fmt: RespFormat = serde_json::from_value(json!(2)).unwrap();
        assert_eq!(fmt, RespFormat::Json);
        let fmt: RespFormat = serde_json::from_value(json!("Markdown")).unwrap();
        assert_eq!(fmt, RespFormat::Markdown);
        assert!(serde_json::from_value::<RespFormat>(json!(7)).is_err());
        assert_eq!(serde_json::to_value(RespFormat::Text).unwrap(), json!("text"));
    }

    #[test]
    fn test_assemble_parsed_wins_over_pool() {
        let pool = VariablePool::new();
        pool.set("llm", "a", json!("from pool"));
        pool.set("llm", "b", json!("side channel"));

        let parsed = json!({"a": "parsed", "b": null, "extra": 1});
        let parsed = parsed.as_object().unwrap();
        let out = assemble_outputs(RespFormat::Json, parsed, &keys(&["b", "a"]), "llm", &pool).unwrap();

        assert_eq!(Value::Object(out.clone()), json!({"b": "side channel", "a": "parsed"}));
        let order: Vec<&String> = out.keys().collect();
        assert_eq!(order, vec!["b", "a"]);
    }

    #[test]
    fn test_assemble_json_missing_everywhere_fails() {
        let pool = VariablePool::new();
        let err = assemble_outputs(RespFormat::Json, &Map::new(), &keys(&["output"]), "llm", &pool)
            .unwrap_err();
        assert_eq!(err, PoolError::key_not_found("llm", "output"));
    }

    #[test]
    fn test_assemble_text_without_reasoning_fills_declared_keys() {
        let pool = VariablePool::new();
        let output_keys = keys(&["output", "REASONING_CONTENT", "extra"]);
        let parsed = parse(RespFormat::Text, "plain answer", "", &output_keys);

        let out = assemble_outputs(RespFormat::Text, &parsed, &output_keys, "plain", &pool).unwrap();
        assert_eq!(
            Value::Object(out),
            json!({"output": "plain answer", "REASONING_CONTENT": "", "extra": null})
        );
    }

    #[test]
    fn test_valid_json_with_trailing_escaped_backslash() {
        let raw = r#"{"action_input": "C:\\", "action": "ls"}"#;
        let value = parse_json(raw).unwrap();
        assert_eq!(value["action_input"], json!("C:\\"));
        assert_eq!(value["action"], json!("ls"));

        assert!(matches!(repair_action_input(raw), Cow::Borrowed(_)));
    }

    #[test]
    fn test_json_repair_after_escaped_backslash() {
        let raw = "{\"action_input\": \"dir C:\\\\\nnext\", \"action\": \"ls\"}";
        assert!(serde_json::from_str::<Value>(raw).is_err());

        let value = parse_json(raw).unwrap();
        assert_eq!(value["action_input"], json!("dir C:\\\nnext"));
        assert_eq!(value["action"], json!("ls"));
    }
}
