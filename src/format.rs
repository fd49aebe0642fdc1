//! Expected-output-format extraction and placeholder fallback.
//!
//! Once per request the pipeline asks the text generator what shape the
//! final answer should have. The resulting template is used only as a
//! last resort: when the deadline is exhausted or every attempt failed,
//! the template is populated with canonical typed placeholders and
//! returned instead of a hard error.

use std::time::Duration;

use serde_json::{json, Map, Value};
use tracing::debug;

use crate::extract;
use crate::llm::Generator;

const FORMAT_PROMPT_HEADER: &str = r#"Analyze the following questions and determine the EXACT JSON output format that is expected.
Identify:
- Whether output is an object or array
- Field names and their primitive / nested data types
- Repeated record structure (arrays of objects)

Return a JSON TEMPLATE using DEFAULT TYPED PLACEHOLDERS:
- string -> "default"
- integer/float -> 0 (use 0 for all numerics)
- boolean -> false
- null / unknown -> "default"
- array -> one representative element only
- object -> include all keys with placeholder values recursively

Examples:
- "JSON object with name and age" => {"name": "default", "age": 0}
- "Array of objects with id and value" => [{"id": 0, "value": "default"}]

QUESTIONS:
"#;

const FORMAT_PROMPT_FOOTER: &str = r#"

Respond with ONLY the JSON template (no explanation). If the format cannot be determined, respond with {"result": "default"}."#;

/// Derives the expected answer shape from the questions text.
pub struct FormatExtractor {
    generator: Generator,
}

impl FormatExtractor {
    /// Creates an extractor backed by the given generator.
    pub fn new(generator: Generator) -> Self {
        Self { generator }
    }

    /// Asks the text generator for a format template, bounded by `timeout`.
    ///
    /// Returns `None` on generator failure, timeout, or an unparseable
    /// response; never errors. Decorative code fences around the response
    /// are tolerated.
    pub async fn extract(&self, questions_txt: &str, timeout: Duration) -> Option<Value> {
        let prompt = format!("{FORMAT_PROMPT_HEADER}{questions_txt}{FORMAT_PROMPT_FOOTER}");

        let response = match self.generator.generate_text(&prompt, timeout).await {
            Ok(response) => response,
            Err(e) => {
                debug!("Format extraction unavailable: {e}");
                return None;
            }
        };

        let template = extract::extract_json_value(&response);
        if template.is_none() {
            debug!("Format response did not contain parseable JSON");
        }
        template
    }
}

/// Populates a format template with canonical typed placeholders.
///
/// Without a template this returns the fixed timeout sentinel object.
/// Otherwise every leaf is rewritten to its placeholder, arrays collapse
/// to a single representative (recursively defaulted) element, and all
/// object keys are preserved. Pure and deterministic.
pub fn populate_with_fallback(template: Option<&Value>) -> Value {
    match template {
        None => json!({"error": "timeout", "result": "default"}),
        Some(value) => fill(value),
    }
}

fn fill(value: &Value) -> Value {
    match value {
        Value::Object(fields) => {
            let mut out = Map::with_capacity(fields.len());
            for (key, field) in fields {
                out.insert(key.clone(), fill(field));
            }
            Value::Object(out)
        }
        Value::Array(items) => match items.first() {
            Some(first) => Value::Array(vec![fill(first)]),
            None => Value::Array(Vec::new()),
        },
        leaf => placeholder_for(leaf),
    }
}

/// Canonical placeholder for a scalar leaf.
fn placeholder_for(value: &Value) -> Value {
    match value {
        Value::Bool(_) => Value::Bool(false),
        Value::Number(_) => json!(0),
        _ => Value::String("default".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_without_template() {
        let value = populate_with_fallback(None);
        assert_eq!(value, json!({"error": "timeout", "result": "default"}));
    }

    #[test]
    fn test_leaves_become_placeholders() {
        let template = json!({"name": "Alice", "age": 42, "active": true, "note": null});
        let value = populate_with_fallback(Some(&template));
        assert_eq!(
            value,
            json!({"name": "default", "age": 0, "active": false, "note": "default"})
        );
    }

    #[test]
    fn test_arrays_collapse_to_one_element() {
        let template = json!([{"id": 7, "label": "x"}, {"id": 8, "label": "y"}]);
        let value = populate_with_fallback(Some(&template));
        assert_eq!(value, json!([{"id": 0, "label": "default"}]));
    }

    #[test]
    fn test_empty_array_stays_empty() {
        let template = json!({"rows": []});
        assert_eq!(
            populate_with_fallback(Some(&template)),
            json!({"rows": []})
        );
    }

    #[test]
    fn test_nested_structure_preserved() {
        let template = json!({"summary": {"total": 12.5, "items": [{"n": 1}]}});
        assert_eq!(
            populate_with_fallback(Some(&template)),
            json!({"summary": {"total": 0, "items": [{"n": 0}]}})
        );
    }

    #[test]
    fn test_idempotent_over_placeholder_values() {
        let template = json!([{"id": 3, "tags": ["a", "b"]}]);
        let once = populate_with_fallback(Some(&template));
        let twice = populate_with_fallback(Some(&once));
        assert_eq!(once, twice);
    }

    #[test]
    fn test_deterministic_output() {
        let template = json!({"b": 1, "a": "x", "c": [true, false, true]});
        let first = populate_with_fallback(Some(&template));
        let second = populate_with_fallback(Some(&template));
        assert_eq!(first, second);
        assert_eq!(first, json!({"b": 0, "a": "default", "c": [false]}));
    }
}
