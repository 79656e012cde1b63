//! Decoders for event-memory blob payloads.
//!
//! The upstream memory API does not always hand blobs back as the JSON it
//! was given. Two degraded shapes are seen in the wild:
//!
//! 1. The whole payload rendered as text, `{_type=line, text={"role":…}}`,
//!    where the inner payload is still valid JSON.
//! 2. A Python-dict-like rendering, `{_type=line, data={type=message, …}}`,
//!    where the inner structure uses `key=value` pairs and unquoted
//!    scalars.
//!
//! [`decode_line`] resolves both, preferring a strict JSON parse and only
//! then falling back to pattern extraction and the [`python_dict_to_json`]
//! converter. Unrecognized input passes through untouched so a bad decode
//! never destroys data.
//!
//! Conversational text fields carry a third hazard: a `text` field whose
//! value is itself Python-dict text, e.g.
//! `{'role': 'assistant', 'content': [{'text': "Hello, I'm A"}]}`. The
//! embedded text is recovered with a precise regex
//! ([`extract_embedded_text`]); a naive `'` → `"` substitution would
//! corrupt apostrophes inside the message and is deliberately not used.
//!
//! Everything in this module is pure and synchronous.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

static DOUBLE_QUOTED_TEXT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"'text':\s*"((?:[^"\\]|\\.)*)""#).expect("static regex compiles")
});

static SINGLE_QUOTED_TEXT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"'text':\s*'((?:[^'\\]|\\.)*)'").expect("static regex compiles")
});

/// Recovers the logical line from a raw blob string.
///
/// Resolution order:
/// 1. strict JSON parse — already well-formed input is returned as-is;
/// 2. `{_type=line, text=(…)}` — the inner payload is extracted verbatim;
/// 3. `{_type=line, data=(…)}` — the inner Python-dict form is converted
///    with [`python_dict_to_json`] and validated by reparsing;
/// 4. anything else passes through untouched.
pub fn decode_line(raw: &str) -> String {
    let trimmed = raw.trim();
    if serde_json::from_str::<Value>(trimmed).is_ok() {
        return trimmed.to_string();
    }
    if let Some(inner) = unwrap_line_marker(trimmed, "text=") {
        return inner.to_string();
    }
    if let Some(inner) = unwrap_line_marker(trimmed, "data=") {
        if let Some(json) = python_dict_to_json(inner) {
            return json;
        }
    }
    raw.to_string()
}

/// Converts a Python-dict-like rendering (`{key=value, nested={a=1}}`)
/// into JSON text.
///
/// Walks nesting depth, turning `key=value` pairs into `"key":value` and
/// quoting every scalar that is not a number, boolean, or `null`.
/// Top-level commas separate items. The converted string is validated by
/// reparsing; `None` means the input could not be converted and the caller
/// should keep the raw text.
pub fn python_dict_to_json(input: &str) -> Option<String> {
    let s = input.trim();
    if !s.starts_with('{') && !s.starts_with('[') {
        return None;
    }
    let converted = convert_fragment(s)?;
    serde_json::from_str::<Value>(&converted).ok()?;
    Some(converted)
}

/// Extracts the embedded `text` value from Python-dict-like message text.
///
/// Matches `'text': "…"` first (the common shape), then `'text': '…'`.
/// Escapes inside the captured value are unwound. Returns `None` when no
/// embedded text field is present.
pub fn extract_embedded_text(s: &str) -> Option<String> {
    if let Some(cap) = DOUBLE_QUOTED_TEXT.captures(s) {
        return Some(unescape_double_quoted(cap.get(1)?.as_str()));
    }
    if let Some(cap) = SINGLE_QUOTED_TEXT.captures(s) {
        return Some(cap.get(1)?.as_str().replace("\\'", "'"));
    }
    None
}

/// Applies the embedded-text recovery to a single content `text` field.
///
/// Only fields that look like a stray Python-dict rendering (start with
/// `{` and mention `'text'`) are rewritten; ordinary message text is left
/// alone.
pub fn sanitize_content_text(text: &str) -> Option<String> {
    if text.trim_start().starts_with('{') && text.contains("'text'") {
        return extract_embedded_text(text);
    }
    None
}

/// Sanitizes a transcript message in place.
///
/// Inspects each `content[*].text` and replaces values that carry the
/// Python-dict encoding with the recovered inner text.
pub fn sanitize_message(message: &mut Value) {
    let Some(content) = message.get_mut("content").and_then(Value::as_array_mut) else {
        return;
    };
    for item in content {
        let clean = item
            .get("text")
            .and_then(Value::as_str)
            .and_then(sanitize_content_text);
        if let (Some(clean), Some(obj)) = (clean, item.as_object_mut()) {
            obj.insert("text".to_string(), Value::String(clean));
        }
    }
}

/// Normalizes a blob payload value: string payloads are re-parsed through
/// the decode pipeline, structured payloads pass through.
pub(crate) fn normalize_blob(blob: &Value) -> Value {
    if let Value::String(raw) = blob {
        if let Ok(v) = serde_json::from_str::<Value>(raw) {
            return v;
        }
        if let Some(json) = python_dict_to_json(raw) {
            if let Ok(v) = serde_json::from_str::<Value>(&json) {
                return v;
            }
        }
        return blob.clone();
    }
    blob.clone()
}

/// Recovers the transcript line carried by a blob payload, whatever the
/// wire shape was.
pub(crate) fn line_text_from_blob(blob: &Value) -> Option<String> {
    match blob {
        Value::String(raw) => {
            let decoded = decode_line(raw);
            if let Ok(value) = serde_json::from_str::<Value>(&decoded) {
                if let Some(text) = line_text_from_object(&value) {
                    return Some(text);
                }
            }
            Some(decoded)
        }
        Value::Object(_) => line_text_from_object(blob),
        _ => None,
    }
}

fn line_text_from_object(value: &Value) -> Option<String> {
    let obj = value.as_object()?;
    if obj.get("_type").and_then(Value::as_str) != Some("line") {
        return None;
    }
    let payload = obj.get("text").or_else(|| obj.get("data"))?;
    match payload {
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn unwrap_line_marker<'a>(s: &'a str, marker: &str) -> Option<&'a str> {
    let rest = s.strip_prefix("{_type=line,")?.trim_start();
    let inner = rest.strip_prefix(marker)?;
    Some(inner.trim_end().strip_suffix('}')?.trim())
}

fn convert_fragment(s: &str) -> Option<String> {
    let s = s.trim();
    if let Some(body) = s.strip_prefix('{').and_then(|x| x.strip_suffix('}')) {
        let mut parts = Vec::new();
        for item in split_top_level(body) {
            let item = item.trim();
            if item.is_empty() {
                continue;
            }
            let (key, value) = split_key_value(item)?;
            parts.push(format!(
                "{}:{}",
                quote_json_string(key.trim()),
                convert_value(value.trim())?
            ));
        }
        Some(format!("{{{}}}", parts.join(",")))
    } else if let Some(body) = s.strip_prefix('[').and_then(|x| x.strip_suffix(']')) {
        let mut parts = Vec::new();
        for item in split_top_level(body) {
            let item = item.trim();
            if item.is_empty() {
                continue;
            }
            parts.push(convert_value(item)?);
        }
        Some(format!("[{}]", parts.join(",")))
    } else {
        None
    }
}

fn convert_value(v: &str) -> Option<String> {
    if v.starts_with('{') || v.starts_with('[') {
        return convert_fragment(v);
    }
    if v == "true" || v == "false" || v == "null" {
        return Some(v.to_string());
    }
    if v.parse::<f64>().is_ok() {
        return Some(v.to_string());
    }
    if v.len() >= 2 && v.starts_with('"') && v.ends_with('"') {
        return Some(v.to_string());
    }
    if v.len() >= 2 && v.starts_with('\'') && v.ends_with('\'') {
        return Some(quote_json_string(&v[1..v.len() - 1].replace("\\'", "'")));
    }
    Some(quote_json_string(v))
}

fn quote_json_string(s: &str) -> String {
    Value::String(s.to_string()).to_string()
}

/// Splits on commas at depth 0, respecting braces, brackets, and quotes.
fn split_top_level(s: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut start = 0usize;
    let mut in_str: Option<char> = None;
    let mut escaped = false;
    for (i, c) in s.char_indices() {
        if let Some(q) = in_str {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                in_str = None;
            }
            continue;
        }
        match c {
            '"' | '\'' => in_str = Some(c),
            '{' | '[' => depth += 1,
            '}' | ']' => depth -= 1,
            ',' if depth == 0 => {
                parts.push(&s[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&s[start..]);
    parts
}

/// Splits an item at its first depth-0 `=` outside quotes.
fn split_key_value(item: &str) -> Option<(&str, &str)> {
    let mut depth = 0i32;
    let mut in_str: Option<char> = None;
    let mut escaped = false;
    for (i, c) in item.char_indices() {
        if let Some(q) = in_str {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                in_str = None;
            }
            continue;
        }
        match c {
            '"' | '\'' => in_str = Some(c),
            '{' | '[' => depth += 1,
            '}' | ']' => depth -= 1,
            '=' if depth == 0 => return Some((&item[..i], &item[i + 1..])),
            _ => {}
        }
    }
    None
}

fn unescape_double_quoted(raw: &str) -> String {
    // The capture is the interior of a JSON-style double-quoted string;
    // re-wrap and parse to unwind \" \\ \n and friends.
    serde_json::from_str::<String>(&format!("\"{raw}\""))
        .unwrap_or_else(|_| raw.replace("\\\"", "\"").replace("\\\\", "\\"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // ---- decode_line ----

    #[test]
    fn valid_json_passes_through() {
        let raw = r#"{"type":"message","text":"hi"}"#;
        assert_eq!(decode_line(raw), raw);
    }

    #[test]
    fn text_wrapper_extracts_inner_json() {
        let raw = r#"{_type=line, text={"role":"assistant","content":[{"text":"hi"}]}}"#;
        assert_eq!(
            decode_line(raw),
            r#"{"role":"assistant","content":[{"text":"hi"}]}"#
        );
    }

    #[test]
    fn data_wrapper_converts_python_dict_form() {
        let raw = "{_type=line, data={type=message, count=3, ok=true, note=null}}";
        let decoded = decode_line(raw);
        let value: Value = serde_json::from_str(&decoded).unwrap();
        assert_eq!(
            value,
            json!({"type": "message", "count": 3, "ok": true, "note": null})
        );
    }

    #[test]
    fn malformed_input_passes_through_untouched() {
        let raw = "not json, not a wrapper";
        assert_eq!(decode_line(raw), raw);
    }

    #[test]
    fn unconvertible_data_wrapper_passes_through_untouched() {
        let raw = "{_type=line, data=garbage without braces}";
        assert_eq!(decode_line(raw), raw);
    }

    #[test]
    fn whitespace_around_markers_is_tolerated() {
        let raw = r#"{_type=line,   text={"a":1}}"#;
        assert_eq!(decode_line(raw), r#"{"a":1}"#);
    }

    // ---- python_dict_to_json ----

    #[test]
    fn rejects_non_brace_start() {
        assert_eq!(python_dict_to_json("plain text"), None);
        assert_eq!(python_dict_to_json("key=value"), None);
    }

    #[test]
    fn converts_nested_objects_and_arrays() {
        let converted =
            python_dict_to_json("{a={b=1, c=word}, list=[1, 2, three]}").unwrap();
        let value: Value = serde_json::from_str(&converted).unwrap();
        assert_eq!(
            value,
            json!({"a": {"b": 1, "c": "word"}, "list": [1, 2, "three"]})
        );
    }

    #[test]
    fn quotes_bare_scalars_but_not_numbers_booleans_null() {
        let converted = python_dict_to_json("{n=42, f=1.5, t=true, x=null, s=hello}").unwrap();
        let value: Value = serde_json::from_str(&converted).unwrap();
        assert_eq!(value["n"], json!(42));
        assert_eq!(value["f"], json!(1.5));
        assert_eq!(value["t"], json!(true));
        assert_eq!(value["x"], json!(null));
        assert_eq!(value["s"], json!("hello"));
    }

    #[test]
    fn value_with_embedded_equals_keeps_the_tail() {
        let converted = python_dict_to_json("{url=a=b}").unwrap();
        let value: Value = serde_json::from_str(&converted).unwrap();
        assert_eq!(value["url"], json!("a=b"));
    }

    #[test]
    fn single_quoted_values_are_requoted() {
        let converted = python_dict_to_json("{s='hello world'}").unwrap();
        let value: Value = serde_json::from_str(&converted).unwrap();
        assert_eq!(value["s"], json!("hello world"));
    }

    #[test]
    fn commas_inside_nested_structures_do_not_split() {
        let converted = python_dict_to_json("{outer={a=1, b=2}, tail=x}").unwrap();
        let value: Value = serde_json::from_str(&converted).unwrap();
        assert_eq!(value["outer"], json!({"a": 1, "b": 2}));
        assert_eq!(value["tail"], json!("x"));
    }

    #[test]
    fn item_without_separator_fails_conversion() {
        assert_eq!(python_dict_to_json("{no separator here}"), None);
    }

    // ---- embedded text extraction ----

    #[test]
    fn extracts_double_quoted_text_with_apostrophe() {
        let s = r#"{'role': 'assistant', 'content': [{'text': "Hello, I'm A"}]}"#;
        assert_eq!(extract_embedded_text(s).as_deref(), Some("Hello, I'm A"));
    }

    #[test]
    fn extracts_single_quoted_text() {
        let s = "{'role': 'user', 'content': [{'text': 'plain words'}]}";
        assert_eq!(extract_embedded_text(s).as_deref(), Some("plain words"));
    }

    #[test]
    fn double_quoted_escapes_are_unwound() {
        let s = r#"{'text': "she said \"hi\""}"#;
        assert_eq!(extract_embedded_text(s).as_deref(), Some(r#"she said "hi""#));
    }

    #[test]
    fn no_text_field_yields_none() {
        assert_eq!(extract_embedded_text("{'role': 'user'}"), None);
    }

    #[test]
    fn sanitize_content_text_leaves_ordinary_text_alone() {
        assert_eq!(sanitize_content_text("just a sentence"), None);
        assert_eq!(sanitize_content_text("{\"valid\": \"json\"}"), None);
    }

    #[test]
    fn sanitize_message_rewrites_python_dict_content() {
        let mut message = json!({
            "role": "assistant",
            "content": [
                {"text": "{'role': 'assistant', 'content': [{'text': \"Hello, I'm A\"}]}"},
                {"text": "untouched"}
            ]
        });
        sanitize_message(&mut message);
        assert_eq!(message["content"][0]["text"], json!("Hello, I'm A"));
        assert_eq!(message["content"][1]["text"], json!("untouched"));
    }

    #[test]
    fn sanitize_message_without_content_is_a_no_op() {
        let mut message = json!({"role": "user"});
        sanitize_message(&mut message);
        assert_eq!(message, json!({"role": "user"}));
    }

    // ---- blob helpers ----

    #[test]
    fn line_text_from_structured_blob() {
        let blob = json!({"_type": "line", "text": "{\"a\":1}"});
        assert_eq!(line_text_from_blob(&blob).as_deref(), Some("{\"a\":1}"));
    }

    #[test]
    fn line_text_from_raw_string_blob() {
        let blob = Value::String(
            r#"{_type=line, text={"role":"assistant","content":[{"text":"hi"}]}}"#.to_string(),
        );
        assert_eq!(
            line_text_from_blob(&blob).as_deref(),
            Some(r#"{"role":"assistant","content":[{"text":"hi"}]}"#)
        );
    }

    #[test]
    fn line_text_from_serialized_wrapper_string() {
        let blob = Value::String(r#"{"_type":"line","text":"payload"}"#.to_string());
        assert_eq!(line_text_from_blob(&blob).as_deref(), Some("payload"));
    }

    #[test]
    fn normalize_blob_handles_python_form() {
        let blob = Value::String("{_type=tombstone, deletedAt=2026-01-01}".to_string());
        let normalized = normalize_blob(&blob);
        assert_eq!(normalized["_type"], json!("tombstone"));
    }

    #[test]
    fn normalize_blob_keeps_structured_values() {
        let blob = json!({"_type": "kv", "value": {"a": 1}});
        assert_eq!(normalize_blob(&blob), blob);
    }
}
