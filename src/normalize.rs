//! Maps the older flat document shape onto the current nested schema.
//!
//! Early writes stored profile and business fields as one flat record.
//! Current documents nest personal details under `personal` and business
//! details under `business`, with audience fields one level further down.
//! Fields absent from the flat input are omitted rather than nulled, and
//! empty branches are pruned so the output contains no dead weight.

use crate::types::DocumentType;
use serde_json::{Map, Value};

/// Flat keys that belong under `personal`.
const PERSONAL_KEYS: &[&str] = &["name", "age", "location", "occupation", "email", "phone"];

/// Flat keys that belong directly under `business`.
const BUSINESS_KEYS: &[&str] = &[
    "industry",
    "business_type",
    "business_name",
    "stage",
    "revenue_model",
];

/// Flat keys that belong under `business.target_audience`.
const AUDIENCE_KEYS: &[&str] = &[
    "pain_points",
    "demographics",
    "age_range",
    "interests",
    "goals",
];

/// Whether a document already matches the current nested shape.
pub fn is_nested_shape(data: &Map<String, Value>) -> bool {
    data.get("personal").is_some_and(Value::is_object)
        || data.get("business").is_some_and(Value::is_object)
}

/// Map a flat legacy document onto the current nested shape.
///
/// Applied only when a reconstruction candidate is not already nested.
/// Insight and completion documents never had a flat predecessor and pass
/// through untouched apart from pruning.
pub fn normalize(data: &Map<String, Value>, doc_type: DocumentType) -> Map<String, Value> {
    let nested = match doc_type {
        DocumentType::Profile | DocumentType::BusinessData => {
            if is_nested_shape(data) {
                data.clone()
            } else {
                restructure(data)
            }
        }
        DocumentType::Insight | DocumentType::Completion => data.clone(),
    };

    match prune(Value::Object(nested)) {
        Some(Value::Object(map)) => map,
        _ => Map::new(),
    }
}

fn restructure(flat: &Map<String, Value>) -> Map<String, Value> {
    let mut personal = Map::new();
    let mut business = Map::new();
    let mut audience = Map::new();
    let mut rest = Map::new();

    for (key, value) in flat {
        if PERSONAL_KEYS.contains(&key.as_str()) {
            personal.insert(key.clone(), value.clone());
        } else if BUSINESS_KEYS.contains(&key.as_str()) {
            business.insert(key.clone(), value.clone());
        } else if AUDIENCE_KEYS.contains(&key.as_str()) {
            audience.insert(key.clone(), value.clone());
        } else if key == "competitor_profiles" {
            business.insert(key.clone(), value.clone());
        } else {
            rest.insert(key.clone(), value.clone());
        }
    }

    if !audience.is_empty() {
        business.insert("target_audience".into(), Value::Object(audience));
    }

    let mut out = Map::new();
    if !personal.is_empty() {
        out.insert("personal".into(), Value::Object(personal));
    }
    if !business.is_empty() {
        out.insert("business".into(), Value::Object(business));
    }
    // Unmapped keys survive at the top level rather than being guessed
    // into a section.
    for (key, value) in rest {
        out.insert(key, value);
    }
    out
}

/// Drop empty objects and arrays recursively. Returns `None` when the
/// value itself prunes away.
fn prune(value: Value) -> Option<Value> {
    match value {
        Value::Object(map) => {
            let pruned: Map<String, Value> = map
                .into_iter()
                .filter_map(|(k, v)| prune(v).map(|v| (k, v)))
                .collect();
            if pruned.is_empty() {
                None
            } else {
                Some(Value::Object(pruned))
            }
        }
        Value::Array(items) => {
            let pruned: Vec<Value> = items.into_iter().filter_map(prune).collect();
            if pruned.is_empty() {
                None
            } else {
                Some(Value::Array(pruned))
            }
        }
        other => Some(other),
    }
}
