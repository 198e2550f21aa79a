//! Tolerant JSON extraction from VLM output.
//!
//! Model output may wrap JSON in prose or markdown fences, or truncate it
//! mid-structure. Recovery steps, in order:
//! 1. strip ```json fences and whitespace
//! 2. direct parse
//! 3. balanced-delimiter slice from the first `{` or `[`
//! 4. truncation repair: append missing closers from the open stack, retry
//!    once
//!
//! Anything still unparseable is a `provider_bad_json` failure.

use serde_json::Value;

#[derive(thiserror::Error, Debug)]
#[error("no JSON value found in provider output")]
pub struct BadJson;

/// Extract the first JSON value per the module contract.
pub fn extract_json(raw: &str) -> Result<Value, BadJson> {
    let text = strip_fences(raw).trim().to_string();

    if let Ok(value) = serde_json::from_str::<Value>(&text) {
        return Ok(value);
    }

    let Some(start) = text.find(['{', '[']) else {
        return Err(BadJson);
    };
    let tail = &text[start..];

    match balanced_slice(tail) {
        SliceResult::Complete(end) => {
            serde_json::from_str(&tail[..end]).map_err(|_| BadJson)
        }
        SliceResult::Truncated { open_stack, in_string } => {
            let mut repaired = tail.trim_end().to_string();
            if in_string {
                repaired.push('"');
            }
            // A dangling comma before the closers would still be invalid.
            while repaired.ends_with(',') {
                repaired.pop();
                while repaired.ends_with(char::is_whitespace) {
                    repaired.pop();
                }
            }
            for open in open_stack.iter().rev() {
                repaired.push(match open {
                    '{' => '}',
                    _ => ']',
                });
            }
            serde_json::from_str(&repaired).map_err(|_| BadJson)
        }
    }
}

fn strip_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(after_open) = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
    else {
        // Fences may also appear mid-prose; take the first fenced block.
        if let Some(open) = trimmed.find("```json") {
            let body = &trimmed[open + 7..];
            if let Some(close) = body.find("```") {
                return &body[..close];
            }
            return body;
        }
        return trimmed;
    };
    match after_open.find("```") {
        Some(close) => &after_open[..close],
        None => after_open,
    }
}

enum SliceResult {
    /// Byte offset one past the balanced value.
    Complete(usize),
    Truncated { open_stack: Vec<char>, in_string: bool },
}

fn balanced_slice(text: &str) -> SliceResult {
    let mut stack: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' | '[' => stack.push(c),
            '}' | ']' => {
                stack.pop();
                if stack.is_empty() {
                    return SliceResult::Complete(i + c.len_utf8());
                }
            }
            _ => {}
        }
    }

    SliceResult::Truncated {
        open_stack: stack,
        in_string,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn valid_json_is_a_noop() {
        assert_eq!(extract_json("{\"a\":1}").unwrap(), json!({"a": 1}));
        assert_eq!(extract_json("[1,2,3]").unwrap(), json!([1, 2, 3]));
    }

    #[test]
    fn fenced_json_is_unwrapped() {
        let fenced = "```json\n{\"a\":1}\n```";
        assert_eq!(extract_json(fenced).unwrap(), json!({"a": 1}));
        let bare_fence = "```\n{\"a\":1}\n```";
        assert_eq!(extract_json(bare_fence).unwrap(), json!({"a": 1}));
    }

    #[test]
    fn prose_around_json_is_sliced_away() {
        let noisy = "noise {\"a\":1} trailing";
        assert_eq!(extract_json(noisy).unwrap(), json!({"a": 1}));
        let sentence = "Here is the analysis you asked for: {\"summary\": \"ok\"} hope it helps!";
        assert_eq!(
            extract_json(sentence).unwrap(),
            json!({"summary": "ok"})
        );
    }

    #[test]
    fn truncated_object_is_repaired() {
        assert_eq!(extract_json("{\"a\":1").unwrap(), json!({"a": 1}));
    }

    #[test]
    fn truncated_nested_array_is_repaired() {
        assert_eq!(
            extract_json("{\"a\":1,\"b\":[2,").unwrap(),
            json!({"a": 1, "b": [2]})
        );
    }

    #[test]
    fn truncated_inside_string_is_repaired() {
        let value = extract_json("{\"summary\": \"a person ent").unwrap();
        assert_eq!(value["summary"], json!("a person ent"));
    }

    #[test]
    fn braces_inside_strings_do_not_confuse_the_scan() {
        let tricky = "x {\"a\": \"curly } brace\", \"b\": 2} y";
        assert_eq!(
            extract_json(tricky).unwrap(),
            json!({"a": "curly } brace", "b": 2})
        );
    }

    #[test]
    fn pure_prose_fails() {
        assert!(extract_json("not json").is_err());
        assert!(extract_json("").is_err());
        assert!(extract_json("the scene is empty, nothing to report").is_err());
    }

    #[test]
    fn mid_prose_fence_is_found() {
        let text = "Sure!\n```json\n{\"ok\": true}\n```\nLet me know.";
        assert_eq!(extract_json(text).unwrap(), json!({"ok": true}));
    }
}
