//! Credential scrubbing and size caps applied before anything is persisted.
//!
//! Two rules, applied recursively to every JSON value:
//! - substrings shaped like known credentials are replaced with [`REDACTION_MARKER`]
//! - values under a key whose name looks sensitive are replaced wholesale

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{json, Value};

use crate::util::truncate_chars;

pub const REDACTION_MARKER: &str = "[REDACTED]";

static SECRET_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"sk-(?:proj-|ant-)?[A-Za-z0-9_\-]{16,}",
        r"|gh[pousr]_[A-Za-z0-9]{20,}",
        r"|github_pat_[A-Za-z0-9_]{20,}",
        r"|xox[abprs]-[A-Za-z0-9\-]{10,}",
        r"|AKIA[0-9A-Z]{16}",
        r"|AIza[0-9A-Za-z_\-]{35}",
        r"|eyJ[A-Za-z0-9_\-]{8,}\.[A-Za-z0-9_\-]{8,}\.[A-Za-z0-9_\-]{8,}",
        r"|(?i:bearer)\s+[A-Za-z0-9\-._~+/]{8,}=*",
    ))
    .expect("secret token pattern is valid")
});

/// Key segments that mark a value as sensitive wherever they appear.
const SENSITIVE_WORDS: &[&str] = &[
    "password",
    "passwd",
    "secret",
    "credential",
    "credentials",
    "authorization",
    "cookie",
];

/// Segments that mark a value as sensitive only as the final noun, so
/// `accessToken` matches and `maxTokens` or `sessionCount` do not.
const SENSITIVE_TAILS: &[&str] = &["token", "session", "apikey", "privatekey"];

/// Lowercased segments of a key split at `_`, `-`, `.` and camelCase humps.
fn key_segments(key: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut prev_lower = false;
    for c in key.chars() {
        if !c.is_alphanumeric() {
            if !current.is_empty() {
                segments.push(std::mem::take(&mut current));
            }
            prev_lower = false;
            continue;
        }
        if c.is_uppercase() && prev_lower && !current.is_empty() {
            segments.push(std::mem::take(&mut current));
        }
        prev_lower = c.is_lowercase() || c.is_ascii_digit();
        current.extend(c.to_lowercase());
    }
    if !current.is_empty() {
        segments.push(current);
    }
    segments
}

pub fn is_sensitive_key(key: &str) -> bool {
    let segments = key_segments(key);
    if segments.iter().any(|s| SENSITIVE_WORDS.contains(&s.as_str())) {
        return true;
    }
    let Some(last) = segments.last() else {
        return false;
    };
    let last_two = match segments.len() {
        n if n >= 2 => format!("{}{}", segments[n - 2], last),
        _ => last.clone(),
    };
    SENSITIVE_TAILS.contains(&last.as_str()) || SENSITIVE_TAILS.contains(&last_two.as_str())
}

/// Replace credential-shaped substrings, preserving the surrounding text.
pub fn redact_str(input: &str) -> String {
    SECRET_TOKEN.replace_all(input, REDACTION_MARKER).into_owned()
}

/// Recursively redact a JSON value.
pub fn redact_value(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(redact_str(s)),
        Value::Array(items) => Value::Array(items.iter().map(redact_value).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, v)| {
                    let redacted = if is_sensitive_key(key) && !v.is_null() {
                        Value::String(REDACTION_MARKER.to_string())
                    } else {
                        redact_value(v)
                    };
                    (key.clone(), redacted)
                })
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Replace a payload larger than `max_bytes` (serialized) with a marker.
///
/// The marker keeps the original size and the top-level key names, never any
/// partial content.
pub fn cap_detail(detail: Value, max_bytes: usize) -> Value {
    let size = serde_json::to_string(&detail).map(|s| s.len()).unwrap_or(0);
    if size <= max_bytes {
        return detail;
    }
    let keys: Vec<String> = match &detail {
        Value::Object(map) => map.keys().cloned().collect(),
        _ => Vec::new(),
    };
    json!({
        "_truncated": true,
        "originalSize": size,
        "keys": keys,
    })
}

/// Redact then cap a trace detail payload.
pub fn sanitize_detail(detail: &Value, max_bytes: usize) -> Value {
    cap_detail(redact_value(detail), max_bytes)
}

/// Redact then truncate preview text to `max_chars`.
///
/// Redaction runs first so a credential straddling the cut is never
/// partially kept.
pub fn sanitize_preview(text: &str, max_chars: usize) -> (String, bool) {
    let redacted = redact_str(text);
    let (mut out, truncated) = truncate_chars(&redacted, max_chars);
    if truncated {
        out.push('…');
    }
    (out, truncated)
}
