//! Plain-text transcript built from the extraction service's structured data.

use serde_json::Value;
use std::collections::HashSet;

/// Object keys whose string values are treated as document text, in lookup order
const TEXT_KEYS: &[&str] = &["Text", "text", "content", "title", "altText"];

/// Collect the text of every element in `root`, depth-first in document order.
///
/// Values are trimmed, blanks are dropped and repeats keep only their first
/// occurrence.
pub fn collect_text(root: &Value) -> Vec<String> {
    let mut lines = Vec::new();
    let mut seen = HashSet::new();
    let mut stack = vec![root];

    while let Some(node) = stack.pop() {
        match node {
            Value::Object(map) => {
                for key in TEXT_KEYS {
                    if let Some(Value::String(text)) = map.get(*key) {
                        let text = text.trim();
                        if !text.is_empty() && seen.insert(text.to_string()) {
                            lines.push(text.to_string());
                        }
                    }
                }
                // Reverse so the first child is visited first
                stack.extend(map.values().rev());
            }
            Value::Array(items) => stack.extend(items.iter().rev()),
            _ => {}
        }
    }

    lines
}

/// Render the transcript file body: one entry per line, no trailing newline
pub fn render(lines: &[String]) -> String {
    lines.join("\n")
}
