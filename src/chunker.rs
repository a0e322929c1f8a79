//! Splits oversized documents into size-bounded fragments.
//!
//! The ledger caps individual payload sizes, so a document that serializes
//! past the cap is cut along top-level keys into ordered partial documents.
//! The output order is exactly the order chunks must be written with
//! ascending chunk index.

use serde_json::{Map, Value};

/// Serialization cost of a field beyond its key and value text: two
/// quotes, a colon, and a separating comma. With this accounting a chunk
/// of fields f1..fn serializes to exactly `1 + sum(cost(fi))` bytes.
const FIELD_OVERHEAD: usize = 4;

/// Split a document into partial documents whose serialized size stays
/// within `max_bytes`.
///
/// Returns a single-element list when the document already fits. Otherwise
/// packs consecutive top-level keys greedily against a per-chunk budget
/// derived from the estimated chunk count, so chunks come out evenly sized
/// rather than one full chunk and one sliver.
///
/// A single key whose value alone exceeds `max_bytes` is sub-chunked along
/// its own keys when it is an object; otherwise it is emitted as its own
/// oversized chunk and left to the transport to fragment.
pub fn split(document: &Map<String, Value>, max_bytes: usize) -> Vec<Map<String, Value>> {
    let total = serialized_len(document);
    if total <= max_bytes || document.is_empty() {
        return vec![document.clone()];
    }

    let estimated_chunks = total.div_ceil(max_bytes.max(1));
    let budget = total.div_ceil(estimated_chunks).min(max_bytes);

    let mut chunks: Vec<Map<String, Value>> = Vec::with_capacity(estimated_chunks);
    let mut current = Map::new();
    let mut current_size = 1;

    for (key, value) in document {
        let value_len = serde_json::to_string(value).map(|s| s.len()).unwrap_or(0);
        let field_len = key.len() + value_len + FIELD_OVERHEAD;

        // A chunk holding just this field serializes to `1 + field_len`
        // bytes, so the field fits only when it leaves room for the
        // enclosing brace.
        if field_len + 1 > max_bytes {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
                current_size = 1;
            }
            chunks.extend(split_oversized_field(key, value, max_bytes));
            continue;
        }

        if current_size + field_len > budget && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
            current_size = 1;
        }

        current.insert(key.clone(), value.clone());
        current_size += field_len;
    }

    if !current.is_empty() {
        chunks.push(current);
    }

    chunks
}

/// Handle a single field too large for any one chunk.
fn split_oversized_field(key: &str, value: &Value, max_bytes: usize) -> Vec<Map<String, Value>> {
    match value {
        Value::Object(inner) if inner.len() > 1 => {
            // Recurse into the value's own keys, reserving room for the
            // wrapping field name and its enclosing braces.
            let inner_budget = max_bytes
                .saturating_sub(key.len() + FIELD_OVERHEAD + 1)
                .max(1);
            split(inner, inner_budget)
                .into_iter()
                .map(|sub| {
                    let mut wrapper = Map::new();
                    wrapper.insert(key.to_string(), Value::Object(sub));
                    wrapper
                })
                .collect()
        }
        _ => {
            // Indivisible value: emit it alone and let the transport cope.
            tracing::debug!(key, "field exceeds chunk budget and cannot be subdivided");
            let mut wrapper = Map::new();
            wrapper.insert(key.to_string(), value.clone());
            vec![wrapper]
        }
    }
}

fn serialized_len(document: &Map<String, Value>) -> usize {
    serde_json::to_string(document).map(|s| s.len()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    fn merged(chunks: &[Map<String, Value>]) -> Map<String, Value> {
        let mut out = Map::new();
        for chunk in chunks {
            for (k, v) in chunk {
                match (out.get_mut(k), v) {
                    (Some(Value::Object(existing)), Value::Object(incoming)) => {
                        for (ik, iv) in incoming {
                            existing.insert(ik.clone(), iv.clone());
                        }
                    }
                    _ => {
                        out.insert(k.clone(), v.clone());
                    }
                }
            }
        }
        out
    }

    #[test]
    fn test_small_document_single_chunk() {
        let doc = obj(json!({"name": "Ana", "location": "SP"}));
        let chunks = split(&doc, 1024);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0], doc);
    }

    #[test]
    fn test_split_preserves_all_fields() {
        let mut doc = Map::new();
        for i in 0..20 {
            doc.insert(format!("field_{i:02}"), json!("v".repeat(50)));
        }
        let chunks = split(&doc, 200);
        assert!(chunks.len() > 1);
        assert_eq!(merged(&chunks), doc);
    }

    #[test]
    fn test_chunks_respect_max_bytes() {
        let mut doc = Map::new();
        for i in 0..30 {
            doc.insert(format!("k{i:02}"), json!("x".repeat(40)));
        }
        // An object field whose cost is exactly the ceiling: alone in a
        // chunk it would serialize one byte over, so it must sub-chunk.
        doc.insert(
            "big".into(),
            json!({"a": "x".repeat(64), "b": "y".repeat(64)}),
        );
        let big_cost = "big".len() + serialized_len(&obj(doc["big"].clone())) + FIELD_OVERHEAD;
        assert_eq!(big_cost, 150);

        let chunks = split(&doc, 150);
        for chunk in &chunks {
            let len = serialized_len(chunk);
            assert!(len <= 150, "chunk too large: {len}");
        }
        assert_eq!(merged(&chunks), doc);
    }

    #[test]
    fn test_even_packing_three_chunks() {
        // Twelve 188-byte fields serialize to ~2.3 KB; an 800-byte budget
        // estimates three chunks and packs four fields into each.
        let mut doc = Map::new();
        for i in 0..12 {
            doc.insert(format!("section_{i:02}"), json!("d".repeat(172)));
        }
        let chunks = split(&doc, 800);
        assert_eq!(chunks.len(), 3);
        for chunk in &chunks {
            assert_eq!(chunk.len(), 4);
        }
        assert_eq!(merged(&chunks), doc);
    }

    #[test]
    fn test_oversized_object_field_subchunks() {
        let mut inner = Map::new();
        for i in 0..8 {
            inner.insert(format!("sub_{i}"), json!("y".repeat(60)));
        }
        let mut doc = Map::new();
        doc.insert("tiny".into(), json!(1));
        doc.insert("huge".into(), Value::Object(inner.clone()));

        let chunks = split(&doc, 200);
        assert!(chunks.len() > 2);
        let result = merged(&chunks);
        assert_eq!(result.get("tiny"), Some(&json!(1)));
        assert_eq!(result.get("huge"), Some(&Value::Object(inner)));
    }

    #[test]
    fn test_oversized_scalar_emitted_alone() {
        let doc = obj(json!({
            "a": "short",
            "blob": "z".repeat(500)
        }));
        let chunks = split(&doc, 200);
        let blob_chunks: Vec<_> = chunks.iter().filter(|c| c.contains_key("blob")).collect();
        assert_eq!(blob_chunks.len(), 1);
        assert_eq!(blob_chunks[0].len(), 1);
        assert_eq!(merged(&chunks), doc);
    }

    #[test]
    fn test_empty_document() {
        let doc = Map::new();
        let chunks = split(&doc, 10);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].is_empty());
    }
}
