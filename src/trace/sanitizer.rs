//! Redacts secrets and PII from trace payloads before they ever touch
//! storage or the sync queue, and bounds payload size.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

const MAX_PAYLOAD_BYTES: usize = 10 * 1024;

static SENSITIVE_KEY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(api[_-]?key|token|password|secret|authorization|cookie|private[_-]?key|session[_-]?id)$")
        .unwrap()
});

static OPENAI_STYLE_KEY: Lazy<Regex> = Lazy::new(|| Regex::new(r"sk-[A-Za-z0-9]{20,}").unwrap());
static BEARER_JWT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Bearer\s+[A-Za-z0-9_-]+\.[A-Za-z0-9_-]+\.[A-Za-z0-9_-]+").unwrap());
static EMAIL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").unwrap());
static PHONE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\+?\d{1,3}?[-.\s]?\(?\d{3}\)?[-.\s]?\d{3}[-.\s]?\d{4}\b").unwrap());
static SSN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").unwrap());
static CARD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(?:\d[ -]?){13,16}\b").unwrap());

/// Sanitizes a JSON value in place: redacts sensitive keys and tags PII
/// inside strings, then truncates the serialized result if it still
/// exceeds the size cap.
pub fn sanitize(value: &Value) -> Value {
    let scrubbed = sanitize_value(value);
    truncate_if_oversized(scrubbed)
}

fn sanitize_value(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (k, v) in map {
                if SENSITIVE_KEY.is_match(k) {
                    out.insert(k.clone(), Value::String("[REDACTED]".to_string()));
                } else {
                    out.insert(k.clone(), sanitize_value(v));
                }
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(sanitize_value).collect()),
        Value::String(s) => Value::String(sanitize_string(s)),
        // NaN/Infinity never reach serde_json::Value (it rejects them at
        // construction), so by the time a value is a Number here it is
        // already finite; null/bool pass through unchanged.
        other => other.clone(),
    }
}

fn sanitize_string(s: &str) -> String {
    let s = OPENAI_STYLE_KEY.replace_all(s, "[REDACTED]");
    let s = BEARER_JWT.replace_all(&s, "[REDACTED]");
    let s = EMAIL.replace_all(&s, "[EMAIL]");
    let s = SSN.replace_all(&s, "[SSN]");
    let s = CARD.replace_all(&s, "[CARD]");
    let s = PHONE.replace_all(&s, "[PHONE]");
    s.into_owned()
}

fn truncate_if_oversized(value: Value) -> Value {
    let serialized = value.to_string();
    if serialized.len() <= MAX_PAYLOAD_BYTES {
        return value;
    }
    let preview: String = serialized.chars().take(200).collect();
    Value::String(format!(
        "[TRUNCATED: {} chars] preview: {preview}…",
        serialized.len()
    ))
}
