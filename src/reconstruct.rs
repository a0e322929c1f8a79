//! Groups classified fragments by logical write and merges each group back
//! into one document, then ranks competing candidates per owner and type.
//!
//! Two merge algorithms, selected by fragment kind: application chunks are
//! JSON-merged in ascending chunk index order; transport fragments are
//! concatenated as raw text in transport index order and re-fed through the
//! codec. Incomplete groups are withheld entirely, never promoted to
//! partial output.

use crate::classify::{ClassifiedEntry, FragmentKind};
use crate::codec;
use crate::repair;
use crate::types::{DocumentType, Envelope, Timestamp};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};

/// Anchor-field policy per document type.
///
/// Anchors mark a candidate as structurally "rich": a populated name that
/// is not a placeholder, or a non-empty nested audience/competitor field.
/// The sets are configuration, inherited from an unreliable write path, and
/// make no claim to being exhaustive.
#[derive(Clone, Debug)]
pub struct AnchorConfig {
    anchors: HashMap<DocumentType, Vec<String>>,
    placeholder_names: Vec<String>,
}

impl Default for AnchorConfig {
    fn default() -> Self {
        let mut anchors = HashMap::new();
        anchors.insert(DocumentType::Profile, vec!["name".to_string()]);
        anchors.insert(
            DocumentType::BusinessData,
            vec![
                "target_audience".to_string(),
                "competitor_profiles".to_string(),
                "industry".to_string(),
            ],
        );
        anchors.insert(DocumentType::Insight, vec!["insights".to_string(), "title".to_string()]);
        anchors.insert(DocumentType::Completion, vec!["task_id".to_string()]);

        Self {
            anchors,
            placeholder_names: vec![
                "unknown".to_string(),
                "user".to_string(),
                "new user".to_string(),
                "n/a".to_string(),
            ],
        }
    }
}

impl AnchorConfig {
    /// Replace the anchor-field set for one document type.
    pub fn with_anchors(mut self, doc_type: DocumentType, fields: Vec<String>) -> Self {
        self.anchors.insert(doc_type, fields);
        self
    }

    /// Replace the list of names that do not count as populated anchors.
    pub fn with_placeholder_names(mut self, names: Vec<String>) -> Self {
        self.placeholder_names = names;
        self
    }

    /// Whether `data` carries at least one populated anchor field for the
    /// given type, searching nested objects.
    pub fn has_anchor(&self, doc_type: DocumentType, data: &Map<String, Value>) -> bool {
        let Some(fields) = self.anchors.get(&doc_type) else {
            return false;
        };
        fields
            .iter()
            .any(|field| find_field(data, field).is_some_and(|v| self.is_populated(v)))
    }

    fn is_populated(&self, value: &Value) -> bool {
        match value {
            Value::Null => false,
            Value::String(s) => {
                let s = s.trim();
                !s.is_empty()
                    && !self
                        .placeholder_names
                        .iter()
                        .any(|p| p.eq_ignore_ascii_case(s))
            }
            Value::Array(a) => !a.is_empty(),
            Value::Object(o) => !o.is_empty(),
            _ => true,
        }
    }
}

/// Depth-first search for a field by name.
fn find_field<'a>(data: &'a Map<String, Value>, field: &str) -> Option<&'a Value> {
    if let Some(v) = data.get(field) {
        return Some(v);
    }
    data.values()
        .filter_map(Value::as_object)
        .find_map(|nested| find_field(nested, field))
}

/// A merged document with its completeness score, ranked against other
/// candidates for the same `(owner, type)`.
#[derive(Clone, Debug)]
pub struct ReconstructionCandidate {
    pub doc_type: DocumentType,
    pub owner_id: String,
    pub data: Map<String, Value>,

    /// Envelope write-session timestamp (epoch millis).
    pub timestamp: i64,

    /// Lowest ledger sequence number among contributing entries; final
    /// deterministic tie-break.
    pub sequence_number: u64,

    pub field_count: usize,
    pub has_anchor: bool,
}

impl ReconstructionCandidate {
    fn new(
        envelope: Envelope,
        sequence_number: u64,
        anchors: &AnchorConfig,
    ) -> Self {
        let field_count = count_fields(&envelope.data);
        let has_anchor = anchors.has_anchor(envelope.doc_type, &envelope.data);
        Self {
            doc_type: envelope.doc_type,
            owner_id: envelope.owner_id,
            data: envelope.data,
            timestamp: envelope.timestamp,
            sequence_number,
            field_count,
            has_anchor,
        }
    }

    /// Ranking key: anchor presence, then field count, then recency.
    /// Higher sorts first. Ties fall back to lowest sequence number, so the
    /// ordering is total and the winner deterministic.
    fn rank_key(&self) -> (bool, usize, i64, std::cmp::Reverse<u64>) {
        (
            self.has_anchor,
            self.field_count,
            self.timestamp,
            std::cmp::Reverse(self.sequence_number),
        )
    }
}

/// Leaf-field count, the raw completeness measure.
fn count_fields(data: &Map<String, Value>) -> usize {
    data.values().map(count_value).sum()
}

fn count_value(value: &Value) -> usize {
    match value {
        Value::Object(o) => o.values().map(count_value).sum(),
        Value::Array(a) => a.iter().map(count_value).sum::<usize>().max(1),
        _ => 1,
    }
}

/// Merge `incoming` into `target`. Nested objects merge recursively;
/// anything else is replaced, so within a chunk group the last write for a
/// key wins.
pub(crate) fn deep_merge(target: &mut Map<String, Value>, incoming: &Map<String, Value>) {
    for (key, value) in incoming {
        match (target.get_mut(key), value) {
            (Some(Value::Object(existing)), Value::Object(nested)) => {
                deep_merge(existing, nested);
            }
            _ => {
                target.insert(key.clone(), value.clone());
            }
        }
    }
}

/// Everything the reconstructor recovered from one entry set.
#[derive(Clone, Debug, Default)]
pub struct Reconstruction {
    /// One winning candidate per `(owner, type)` is chosen later; this is
    /// every usable candidate, single-document and merged-group alike.
    pub candidates: Vec<ReconstructionCandidate>,

    /// Every envelope that decoded successfully, chunked or not, with the
    /// consensus timestamp and sequence of the entry that carried it.
    pub decoded: Vec<(Envelope, Timestamp, u64)>,
}

/// Run grouping and merging over classified entries.
///
/// Transport fragment groups are reassembled first, since their payloads
/// may themselves contain application chunks. Unparseable entries are
/// routed through the repairer; entries that still fail contribute nothing.
pub fn reconstruct(entries: Vec<ClassifiedEntry>, anchors: &AnchorConfig) -> Reconstruction {
    let mut singles: Vec<(Envelope, Timestamp, u64)> = Vec::new();
    let mut chunks: Vec<(Envelope, Timestamp, u64)> = Vec::new();
    let mut transport: HashMap<(String, u32), TransportGroup> = HashMap::new();

    for entry in entries {
        match entry.kind {
            FragmentKind::SingleDocument(env) => {
                singles.push((env, entry.consensus_timestamp, entry.sequence_number));
            }
            FragmentKind::AppChunk(env) => {
                chunks.push((env, entry.consensus_timestamp, entry.sequence_number));
            }
            FragmentKind::TransportFragment { info, bytes } => {
                transport
                    .entry((info.group_key.clone(), info.total))
                    .or_default()
                    .insert(info.index, bytes, entry.consensus_timestamp, entry.sequence_number);
            }
            FragmentKind::Unparseable { text } => {
                match text.as_deref().and_then(repair::repair) {
                    Some(env) if env.is_chunk() => {
                        chunks.push((env, entry.consensus_timestamp, entry.sequence_number));
                    }
                    Some(env) => {
                        singles.push((env, entry.consensus_timestamp, entry.sequence_number));
                    }
                    None => {
                        tracing::debug!(
                            sequence = entry.sequence_number,
                            "dropping unrecoverable entry"
                        );
                    }
                }
            }
        }
    }

    // Reassembled transport submissions rejoin the pipeline as whatever
    // their payload turns out to be.
    for ((group_key, total), group) in transport {
        match group.reassemble(total) {
            Some((env, consensus, sequence)) if env.is_chunk() => {
                chunks.push((env, consensus, sequence));
            }
            Some((env, consensus, sequence)) => {
                singles.push((env, consensus, sequence));
            }
            None => {
                tracing::debug!(group_key = %group_key, total, "withholding incomplete transport group");
            }
        }
    }

    let mut decoded: Vec<(Envelope, Timestamp, u64)> = Vec::new();
    decoded.extend(singles.iter().cloned());
    decoded.extend(chunks.iter().cloned());

    let mut candidates: Vec<ReconstructionCandidate> = singles
        .into_iter()
        .map(|(env, _, seq)| ReconstructionCandidate::new(env, seq, anchors))
        .collect();
    candidates.extend(merge_chunk_groups(chunks, anchors));

    Reconstruction {
        candidates,
        decoded,
    }
}

/// Buffered fragments of one transport-split submission.
///
/// Fragments stay as raw bytes until the whole group is joined: the
/// transport cuts at byte offsets, so an individual fragment may end in
/// the middle of a multi-byte character and only the concatenation is
/// decodable.
#[derive(Default)]
struct TransportGroup {
    /// index -> (bytes, consensus timestamp, sequence number)
    fragments: BTreeMap<u32, (Vec<u8>, Timestamp, u64)>,
}

impl TransportGroup {
    fn insert(&mut self, index: u32, bytes: Vec<u8>, consensus: Timestamp, sequence: u64) {
        match self.fragments.get(&index) {
            // Retried fragment: keep the later arrival.
            Some((_, existing, _)) if *existing >= consensus => {}
            _ => {
                self.fragments.insert(index, (bytes, consensus, sequence));
            }
        }
    }

    /// Concatenate in strict index order and hand the result back through
    /// the codec, with a repair attempt as the last resort.
    fn reassemble(self, total: u32) -> Option<(Envelope, Timestamp, u64)> {
        if self.fragments.len() != total as usize
            || !(0..total).all(|i| self.fragments.contains_key(&i))
        {
            return None;
        }

        let consensus = self
            .fragments
            .values()
            .map(|(_, ts, _)| *ts)
            .max()
            .unwrap_or_default();
        let sequence = self
            .fragments
            .values()
            .map(|(_, _, seq)| *seq)
            .min()
            .unwrap_or_default();

        let combined: Vec<u8> = self
            .fragments
            .into_values()
            .flat_map(|(bytes, _, _)| bytes)
            .collect();

        let envelope = match codec::transport_decode(&combined) {
            Ok(text) => codec::parse_envelope(&text)
                .ok()
                .or_else(|| repair::repair(&text)),
            Err(_) => None,
        }?;

        Some((envelope, consensus, sequence))
    }
}

/// Group application chunks by `(owner, type, timestamp, total)` and merge
/// each complete group in ascending index order.
fn merge_chunk_groups(
    chunks: Vec<(Envelope, Timestamp, u64)>,
    anchors: &AnchorConfig,
) -> Vec<ReconstructionCandidate> {
    type GroupKey = (String, DocumentType, i64, u32);
    // index -> (envelope, consensus timestamp, sequence number)
    let mut groups: HashMap<GroupKey, BTreeMap<u32, (Envelope, Timestamp, u64)>> = HashMap::new();

    for (env, consensus, sequence) in chunks {
        let (Some(index), Some(total)) = (env.chunk_index, env.total_chunks) else {
            continue;
        };
        let key = (env.owner_id.clone(), env.doc_type, env.timestamp, total);
        let group = groups.entry(key).or_default();
        match group.get(&index) {
            // Retried write of the same index: keep the later instance.
            Some((_, existing, _)) if *existing >= consensus => {}
            _ => {
                group.insert(index, (env, consensus, sequence));
            }
        }
    }

    let mut candidates = Vec::new();

    for ((owner_id, doc_type, timestamp, total), group) in groups {
        if group.len() != total as usize || !(0..total).all(|i| group.contains_key(&i)) {
            tracing::debug!(
                owner = %owner_id,
                doc_type = %doc_type,
                timestamp,
                total,
                observed = group.len(),
                "withholding incomplete chunk group"
            );
            continue;
        }

        let sequence = group
            .values()
            .map(|(_, _, seq)| *seq)
            .min()
            .unwrap_or_default();

        let mut data = Map::new();
        for (_, (env, _, _)) in group {
            deep_merge(&mut data, &env.data);
        }

        let merged = Envelope::single(doc_type, owner_id, timestamp, data);
        candidates.push(ReconstructionCandidate::new(merged, sequence, anchors));
    }

    candidates
}

/// Pick the winning candidate per document type.
///
/// Ranking: anchor presence before raw field count before recency; ties
/// resolve by lowest sequence number. The result is deterministic for any
/// input ordering.
pub fn select_canonical(
    candidates: Vec<ReconstructionCandidate>,
) -> HashMap<DocumentType, ReconstructionCandidate> {
    let mut best: HashMap<DocumentType, ReconstructionCandidate> = HashMap::new();

    for candidate in candidates {
        match best.get(&candidate.doc_type) {
            Some(current) if current.rank_key() >= candidate.rank_key() => {}
            _ => {
                best.insert(candidate.doc_type, candidate);
            }
        }
    }

    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::classify;
    use crate::types::LogEntry;
    use serde_json::json;

    fn obj(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    fn entry(seq: u64, consensus: i64, payload: String) -> LogEntry {
        LogEntry {
            sequence_number: seq,
            consensus_timestamp: Timestamp(consensus),
            payer_id: "0.0.1001".into(),
            payload: payload.into_bytes(),
            transport_chunk: None,
        }
    }

    fn chunk_payload(index: u32, total: u32, data: Value) -> String {
        serde_json::to_string(&Envelope::chunk(
            DocumentType::Profile,
            "owner-1",
            500,
            obj(data),
            index,
            total,
        ))
        .unwrap()
    }

    fn run(entries: Vec<LogEntry>) -> Reconstruction {
        let classified = entries.iter().map(classify).collect();
        reconstruct(classified, &AnchorConfig::default())
    }

    #[test]
    fn test_complete_chunk_group_merges_in_index_order() {
        let entries = vec![
            entry(3, 30, chunk_payload(2, 3, json!({"c": 3}))),
            entry(1, 10, chunk_payload(0, 3, json!({"a": 1}))),
            entry(2, 20, chunk_payload(1, 3, json!({"b": 2}))),
        ];
        let result = run(entries);
        assert_eq!(result.candidates.len(), 1);
        let c = &result.candidates[0];
        assert_eq!(c.data, obj(json!({"a": 1, "b": 2, "c": 3})));
        assert_eq!(c.sequence_number, 1);
    }

    #[test]
    fn test_incomplete_chunk_group_withheld() {
        let entries = vec![
            entry(1, 10, chunk_payload(0, 3, json!({"a": 1}))),
            entry(2, 20, chunk_payload(2, 3, json!({"c": 3}))),
        ];
        let result = run(entries);
        assert!(result.candidates.is_empty());
        // Decoded view still sees both chunks.
        assert_eq!(result.decoded.len(), 2);
    }

    #[test]
    fn test_duplicate_chunk_index_keeps_later_write() {
        let entries = vec![
            entry(1, 10, chunk_payload(0, 3, json!({"a": "old"}))),
            entry(2, 20, chunk_payload(1, 3, json!({"b": 2}))),
            entry(3, 30, chunk_payload(2, 3, json!({"c": 3}))),
            entry(4, 40, chunk_payload(0, 3, json!({"a": "retried"}))),
        ];
        let result = run(entries);
        assert_eq!(result.candidates.len(), 1);
        assert_eq!(
            result.candidates[0].data.get("a"),
            Some(&json!("retried"))
        );
    }

    #[test]
    fn test_later_chunk_overwrites_rewritten_key() {
        let entries = vec![
            entry(1, 10, chunk_payload(0, 2, json!({"k": "first", "a": 1}))),
            entry(2, 20, chunk_payload(1, 2, json!({"k": "last", "b": 2}))),
        ];
        let result = run(entries);
        assert_eq!(result.candidates[0].data.get("k"), Some(&json!("last")));
    }

    #[test]
    fn test_subchunked_nested_objects_merge_deeply() {
        let entries = vec![
            entry(1, 10, chunk_payload(0, 2, json!({"business": {"industry": "retail"}}))),
            entry(2, 20, chunk_payload(1, 2, json!({"business": {"stage": "growth"}}))),
        ];
        let result = run(entries);
        assert_eq!(
            result.candidates[0].data.get("business"),
            Some(&json!({"industry": "retail", "stage": "growth"}))
        );
    }

    #[test]
    fn test_transport_group_reassembles_via_codec() {
        use base64::engine::general_purpose::STANDARD as BASE64;
        use base64::Engine;

        let env = Envelope::single(
            DocumentType::BusinessData,
            "owner-1",
            700,
            obj(json!({"industry": "retail", "stage": "seed"})),
        );
        let encoded = BASE64.encode(serde_json::to_vec(&env).unwrap());
        let mid = encoded.len() / 2;

        let make = |seq, index, text: &str| LogEntry {
            sequence_number: seq,
            consensus_timestamp: Timestamp(seq as i64 * 10),
            payer_id: "0.0.1001".into(),
            payload: text.as_bytes().to_vec(),
            transport_chunk: Some(crate::types::TransportChunkInfo {
                index,
                total: 2,
                group_key: "tg-1".into(),
            }),
        };

        // Delivered out of order.
        let entries = vec![make(2, 1, &encoded[mid..]), make(1, 0, &encoded[..mid])];
        let classified = entries.iter().map(classify).collect();
        let result = reconstruct(classified, &AnchorConfig::default());

        assert_eq!(result.candidates.len(), 1);
        assert_eq!(result.candidates[0].data, env.data);
    }

    #[test]
    fn test_transport_split_mid_character_reassembles() {
        let env = Envelope::single(
            DocumentType::Profile,
            "owner-1",
            700,
            obj(json!({"name": "Ana", "location": "São Paulo"})),
        );
        let json = serde_json::to_string(&env).unwrap();
        // Cut inside the two-byte 'ã' so neither fragment is valid UTF-8
        // on its own.
        let cut = json.find('ã').unwrap() + 1;
        let bytes = json.as_bytes();
        assert!(std::str::from_utf8(&bytes[..cut]).is_err());

        let make = |seq: u64, index, payload: &[u8]| LogEntry {
            sequence_number: seq,
            consensus_timestamp: Timestamp(seq as i64 * 10),
            payer_id: "0.0.1001".into(),
            payload: payload.to_vec(),
            transport_chunk: Some(crate::types::TransportChunkInfo {
                index,
                total: 2,
                group_key: "tg-3".into(),
            }),
        };

        let entries = vec![make(1, 0, &bytes[..cut]), make(2, 1, &bytes[cut..])];
        let classified = entries.iter().map(classify).collect();
        let result = reconstruct(classified, &AnchorConfig::default());

        assert_eq!(result.candidates.len(), 1);
        assert_eq!(result.candidates[0].data, env.data);
    }

    #[test]
    fn test_incomplete_transport_group_withheld() {
        let make = |seq, index| LogEntry {
            sequence_number: seq,
            consensus_timestamp: Timestamp(seq as i64),
            payer_id: "0.0.1001".into(),
            payload: b"partial".to_vec(),
            transport_chunk: Some(crate::types::TransportChunkInfo {
                index,
                total: 3,
                group_key: "tg-2".into(),
            }),
        };
        let entries = vec![make(1, 0), make(2, 2)];
        let classified = entries.iter().map(classify).collect();
        let result = reconstruct(classified, &AnchorConfig::default());
        assert!(result.candidates.is_empty());
    }

    #[test]
    fn test_anchor_beats_field_count_and_recency() {
        let anchors = AnchorConfig::default();
        let rich = ReconstructionCandidate::new(
            Envelope::single(
                DocumentType::BusinessData,
                "o",
                100,
                obj(json!({
                    "industry": "retail",
                    "competitor_profiles": [{"name": "Rival"}]
                })),
            ),
            1,
            &anchors,
        );
        let sparse = ReconstructionCandidate::new(
            Envelope::single(
                DocumentType::BusinessData,
                "o",
                999,
                obj(json!({"a": 1, "b": 2, "c": 3, "d": 4, "e": 5})),
            ),
            2,
            &anchors,
        );
        assert!(rich.has_anchor);
        assert!(!sparse.has_anchor);

        let best = select_canonical(vec![sparse, rich]);
        let winner = best.get(&DocumentType::BusinessData).unwrap();
        assert_eq!(winner.sequence_number, 1);
    }

    #[test]
    fn test_placeholder_name_is_not_an_anchor() {
        let anchors = AnchorConfig::default();
        let data = obj(json!({"name": "New User"}));
        assert!(!anchors.has_anchor(DocumentType::Profile, &data));
        let data = obj(json!({"name": "Ana"}));
        assert!(anchors.has_anchor(DocumentType::Profile, &data));
    }

    #[test]
    fn test_nested_anchor_found() {
        let anchors = AnchorConfig::default();
        let data = obj(json!({
            "business": {"target_audience": {"pain_points": ["time"]}}
        }));
        assert!(anchors.has_anchor(DocumentType::BusinessData, &data));
    }

    #[test]
    fn test_tie_breaks_deterministically() {
        let anchors = AnchorConfig::default();
        let make = |seq| {
            ReconstructionCandidate::new(
                Envelope::single(
                    DocumentType::Completion,
                    "o",
                    100,
                    obj(json!({"task_id": "t-1"})),
                ),
                seq,
                &anchors,
            )
        };
        let best = select_canonical(vec![make(7), make(3), make(5)]);
        assert_eq!(
            best.get(&DocumentType::Completion).unwrap().sequence_number,
            3
        );
    }
}
