//! Best-effort recovery of envelopes from truncated payloads.
//!
//! Invoked only on entries whose payload failed direct structured parsing.
//! Three strategies run in order; the first success wins. Failure of all
//! three means the entry contributes nothing, which is non-fatal.

use crate::codec;
use crate::types::{DocumentType, Envelope};
use regex::Regex;
use serde_json::{Map, Value};
use std::str::FromStr;
use std::sync::OnceLock;

/// Envelope metadata keys, excluded from field extraction so they do not
/// leak into recovered document bodies.
const META_KEYS: &[&str] = &["type", "ownerId", "timestamp", "chunkIndex", "totalChunks"];

/// Cap on balanced-substring candidates scanned by strategy (b).
const MAX_SUBSTRING_CANDIDATES: usize = 32;

/// Attempt to recover an envelope from unparseable payload text.
pub fn repair(text: &str) -> Option<Envelope> {
    if let Some(env) = repair_truncated_tail(text) {
        tracing::debug!("recovered envelope by closing a truncated object");
        return Some(env);
    }
    if let Some(env) = repair_balanced_substring(text) {
        tracing::debug!("recovered envelope from a balanced substring");
        return Some(env);
    }
    if let Some(env) = repair_field_extraction(text) {
        tracing::debug!("synthesized partial envelope from field extraction");
        return Some(env);
    }
    tracing::debug!("all repair strategies failed");
    None
}

/// Strategy (a): the payload opens an object but was cut off before the
/// closing brace. Truncate to the last complete comma-separated field (the
/// last `,` after the last `"`), rebalance the closers, and retry.
fn repair_truncated_tail(text: &str) -> Option<Envelope> {
    let trimmed = text.trim();
    if !trimmed.starts_with('{') || trimmed.ends_with('}') {
        return None;
    }

    let last_quote = trimmed.rfind('"')?;
    let comma = trimmed[last_quote + 1..].rfind(',')?;
    let cut = &trimmed[..last_quote + 1 + comma];

    let candidate = rebalance(cut);
    codec::parse_envelope(&candidate).ok()
}

/// Append whatever closers an unterminated JSON text is missing.
fn rebalance(text: &str) -> String {
    let mut closers = Vec::new();
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
            '{' if !in_string => closers.push('}'),
            '[' if !in_string => closers.push(']'),
            '}' | ']' if !in_string => {
                closers.pop();
            }
            _ => {}
        }
    }

    let mut out = String::from(text);
    if in_string {
        out.push('"');
    }
    while let Some(c) = closers.pop() {
        out.push(c);
    }
    out
}

/// Strategy (b): scan for balanced-brace substrings and retry parsing each,
/// preferring one that exposes both a `type` and `data` field.
fn repair_balanced_substring(text: &str) -> Option<Envelope> {
    let mut fallback = None;

    for candidate in balanced_substrings(text).take(MAX_SUBSTRING_CANDIDATES) {
        let Ok(value) = serde_json::from_str::<Value>(candidate) else {
            continue;
        };
        let has_data = value.get("type").is_some() && value.get("data").is_some();
        if let Ok(env) = serde_json::from_value::<Envelope>(value) {
            if has_data {
                return Some(env);
            }
            if fallback.is_none() {
                fallback = Some(env);
            }
        }
    }

    fallback
}

/// Substrings of `text` spanning one balanced `{...}` region, outermost
/// starts first.
fn balanced_substrings(text: &str) -> impl Iterator<Item = &str> {
    let bytes = text.as_bytes();
    let starts: Vec<usize> = text
        .char_indices()
        .filter(|&(_, c)| c == '{')
        .map(|(i, _)| i)
        .collect();

    starts.into_iter().filter_map(move |start| {
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
                b'{' if !in_string => depth += 1,
                b'}' if !in_string => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(&text[start..start + offset + 1]);
                    }
                }
                _ => {}
            }
        }
        None
    })
}

/// Strategy (c): regex-extract field-shaped substrings and synthesize a
/// best-effort partial object. Insight payloads carry arrays of small
/// objects, so those are pulled out whole; profile and business shapes are
/// rebuilt from named key/value pairs. A dangling final pair has no closing
/// quote and therefore never matches, so it is dropped, not fabricated.
fn repair_field_extraction(text: &str) -> Option<Envelope> {
    let doc_type = extract_doc_type(text)?;
    let owner_id = capture_string(owner_re(), text).unwrap_or_default();
    let timestamp = capture_string(timestamp_re(), text)
        .and_then(|s| s.parse::<i64>().ok())
        .unwrap_or(0);

    let data = match doc_type {
        DocumentType::Insight => {
            let items = extract_insight_items(text);
            if items.is_empty() {
                extract_pairs(text)
            } else {
                let mut map = Map::new();
                map.insert("insights".into(), Value::Array(items));
                map
            }
        }
        _ => extract_pairs(text),
    };

    if data.is_empty() {
        return None;
    }

    Some(Envelope::single(doc_type, owner_id, timestamp, data))
}

fn extract_doc_type(text: &str) -> Option<DocumentType> {
    let re = type_re();
    let caps = re.captures(text)?;
    DocumentType::from_str(caps.get(1)?.as_str()).ok()
}

fn extract_pairs(text: &str) -> Map<String, Value> {
    let mut data = Map::new();

    for caps in string_pair_re().captures_iter(text) {
        let key = &caps[1];
        if META_KEYS.contains(&key) {
            continue;
        }
        data.insert(key.to_string(), Value::String(caps[2].to_string()));
    }

    for caps in number_pair_re().captures_iter(text) {
        let key = &caps[1];
        if META_KEYS.contains(&key) || data.contains_key(key) {
            continue;
        }
        if let Ok(num) = serde_json::from_str::<Value>(&caps[2]) {
            data.insert(key.to_string(), num);
        }
    }

    data
}

/// Flat `{...}` substrings that look like insight tuples
/// (`id`/`title`/`type`/`category`/`priority`).
fn extract_insight_items(text: &str) -> Vec<Value> {
    flat_object_re()
        .find_iter(text)
        .filter_map(|m| serde_json::from_str::<Value>(m.as_str()).ok())
        .filter(|v| {
            v.as_object().is_some_and(|obj| {
                (obj.contains_key("id") || obj.contains_key("title"))
                    && obj.keys().any(|k| {
                        matches!(k.as_str(), "id" | "title" | "type" | "category" | "priority")
                    })
            })
        })
        .collect()
}

fn capture_string(re: &Regex, text: &str) -> Option<String> {
    re.captures(text).map(|caps| caps[1].to_string())
}

fn type_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#""type"\s*:\s*"(profile|business_data|insight|completion)""#).unwrap()
    })
}

fn owner_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#""ownerId"\s*:\s*"([^"]*)""#).unwrap())
}

fn timestamp_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#""timestamp"\s*:\s*(\d+)"#).unwrap())
}

fn string_pair_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#""([A-Za-z_][A-Za-z0-9_]*)"\s*:\s*"((?:[^"\\]|\\.)*)""#).unwrap()
    })
}

fn number_pair_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#""([A-Za-z_][A-Za-z0-9_]*)"\s*:\s*(-?\d+(?:\.\d+)?)"#).unwrap()
    })
}

fn flat_object_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{[^{}]*\}").unwrap())
}
