//! Best-effort structural repair of malformed JSON from model output.
//!
//! Models wrap JSON in prose, markdown fences, or truncate it mid-object.
//! Repair-then-reparse is always attempted before re-invoking the model,
//! since a re-invocation is a billable call and a repair is free.

use serde_json::Value;
use tracing::debug;

/// Parse text as JSON, attempting structural repair when the raw parse
/// fails. Returns `None` only when the repaired text still does not parse.
pub fn parse_or_repair(text: &str) -> Option<Value> {
    if let Ok(value) = serde_json::from_str::<Value>(text) {
        return Some(value);
    }
    let repaired = repair(text);
    match serde_json::from_str::<Value>(&repaired) {
        Ok(value) => {
            debug!("structural repair recovered a parseable JSON body");
            Some(value)
        }
        Err(_) => None,
    }
}

/// Structural repair pass: strip fences and surrounding prose, drop
/// trailing commas, close unterminated strings and unbalanced brackets.
pub fn repair(text: &str) -> String {
    let stripped = strip_fences(text);
    let extracted = extract_body(stripped);
    let without_commas = remove_trailing_commas(extracted);
    balance(&without_commas)
}

fn strip_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Skip the language tag on the fence line.
    let rest = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// Extract from the first `{` or `[` to the matching close (or end of
/// input when truncated), ignoring surrounding prose.
fn extract_body(text: &str) -> &str {
    let start = match text.find(|c| c == '{' || c == '[') {
        Some(idx) => idx,
        None => return text,
    };
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, &b) in bytes[start..].iter().enumerate() {
        if escaped {
            escaped = false;
            continue;
        }
        match b {
            b'\\' if in_string => escaped = true,
            b'"' => in_string = !in_string,
            b'{' | b'[' if !in_string => depth += 1,
            b'}' | b']' if !in_string => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return &text[start..=start + offset];
                }
            }
            _ => {}
        }
    }
    &text[start..]
}

fn remove_trailing_commas(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;
    for c in text.chars() {
        if escaped {
            escaped = false;
            out.push(c);
            continue;
        }
        match c {
            '\\' if in_string => {
                escaped = true;
                out.push(c);
            }
            '"' => {
                in_string = !in_string;
                out.push(c);
            }
            '}' | ']' if !in_string => {
                while out.ends_with([',', ' ', '\n', '\t', '\r']) {
                    let trimmed_len = out.trim_end().len();
                    if out[..trimmed_len].ends_with(',') {
                        out.truncate(trimmed_len - 1);
                    } else {
                        out.truncate(trimmed_len);
                        break;
                    }
                }
                out.push(c);
            }
            _ => out.push(c),
        }
    }
    out
}

/// Close an unterminated string and any unbalanced braces/brackets, in
/// reverse opening order.
fn balance(text: &str) -> String {
    let mut stack = Vec::new();
    let mut in_string = false;
    let mut escaped = false;
    for c in text.chars() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => stack.push('}'),
            '[' if !in_string => stack.push(']'),
            '}' | ']' if !in_string => {
                stack.pop();
            }
            _ => {}
        }
    }

    let mut out = text.trim_end().to_string();
    if in_string {
        out.push('"');
    }
    // Truncation often leaves a dangling comma before the closers.
    let trimmed_len = out.trim_end().len();
    if out[..trimmed_len].ends_with(',') {
        out.truncate(trimmed_len - 1);
    }
    while let Some(closer) = stack.pop() {
        out.push(closer);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_json_passes_through() {
        let value = parse_or_repair(r#"{"a": 1}"#).unwrap();
        assert_eq!(value["a"], 1);
    }

    #[test]
    fn test_markdown_fence_stripped() {
        let text = "```json\n{\"recommendation\": \"proceed\"}\n```";
        let value = parse_or_repair(text).unwrap();
        assert_eq!(value["recommendation"], "proceed");
    }

    #[test]
    fn test_surrounding_prose_removed() {
        let text = "Sure, here is the JSON you asked for:\n{\"a\": [1, 2]}\nHope that helps!";
        let value = parse_or_repair(text).unwrap();
        assert_eq!(value["a"][1], 2);
    }

    #[test]
    fn test_trailing_comma_removed() {
        let value = parse_or_repair("{\"a\": 1, \"b\": 2,}").unwrap();
        assert_eq!(value["b"], 2);
    }

    #[test]
    fn test_truncated_object_closed() {
        let text = r#"{"headline": "Enter the market", "citations": ["https://a", "https://b"#;
        let value = parse_or_repair(text).unwrap();
        assert_eq!(value["headline"], "Enter the market");
        assert_eq!(value["citations"][1], "https://b");
    }

    #[test]
    fn test_truncated_after_comma() {
        let text = r#"{"a": 1,"#;
        let value = parse_or_repair(text).unwrap();
        assert_eq!(value["a"], 1);
    }

    #[test]
    fn test_string_containing_braces_untouched() {
        let value = parse_or_repair(r#"{"note": "use {curly} and [square]"}"#).unwrap();
        assert_eq!(value["note"], "use {curly} and [square]");
    }

    #[test]
    fn test_hopeless_input_returns_none() {
        assert!(parse_or_repair("no structure here at all").is_none());
    }
}
