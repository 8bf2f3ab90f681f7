// SPDX-License-Identifier: MIT

//! Prompt template substitution
//!
//! Placeholders look like `{{query}}` or `{{profile.tags[0]}}`. Only
//! placeholders whose root identifier is a declared input of the node are
//! replaced; anything else is left as written.

use super::pool::{split_path, VariablePool};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::Value;

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{\s*([^{}]+?)\s*\}\}").expect("valid placeholder regex"));

/// Text inserted for a declared input that is missing or empty
pub const EMPTY_SUBSTITUTE: &str = " ";

/// Root identifier of a placeholder expression
pub fn root_identifier(expression: &str) -> Option<&str> {
    split_path(expression).into_iter().next()
}

/// Textual form of a value inserted into a prompt
pub fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Render `template` for `node_id`, substituting declared inputs
pub fn render(
    template: &str,
    declared_inputs: &[String],
    node_id: &str,
    pool: &VariablePool,
) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &Captures| {
            let expression = &caps[1];
            let declared = root_identifier(expression)
                .is_some_and(|root| declared_inputs.iter().any(|k| k == root));
            if !declared {
                return caps[0].to_string();
            }

            match pool.resolve_path(node_id, expression) {
                Ok(value) => {
                    let text = stringify(&value);
                    if text.is_empty() {
                        EMPTY_SUBSTITUTE.to_string()
                    } else {
                        text
                    }
                }
                Err(e) => {
                    log::debug!("Placeholder {{{{{}}}}} of {}: {}", expression, node_id, e);
                    EMPTY_SUBSTITUTE.to_string()
                }
            }
        })
        .into_owned()
}
