//! Orchestrates the read path: classify, repair, group, merge, normalize.
//!
//! Assembly is a pure derivation over an already-fetched entry snapshot.
//! Nothing is cached across calls and no entry is mutated, so calling
//! [`Assembler::assemble`] twice with the same entry list yields identical
//! output regardless of entry order.

use crate::classify;
use crate::normalize;
use crate::reconstruct::{self, AnchorConfig};
use crate::types::{ContentKey, DecodedMessage, DocumentType, LogEntry};
use serde_json::{Map, Value};
use std::collections::HashSet;

/// The canonical per-owner output of one assembly pass.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AssemblyResult {
    /// Canonical profile document, normalized to the nested shape.
    pub profile: Option<Map<String, Value>>,

    /// Canonical business data document, normalized to the nested shape.
    pub business_data: Option<Map<String, Value>>,

    /// All insight documents, newest first.
    pub insights: Vec<Map<String, Value>>,

    /// All task-completion documents, newest first.
    pub completions: Vec<Map<String, Value>>,

    /// Every successfully decoded entry, deduplicated by content key and
    /// sorted by consensus timestamp descending. Audit/history view,
    /// independent of which candidates won above.
    pub all_messages: Vec<DecodedMessage>,
}

/// Reconstructs canonical documents from raw ledger entries.
#[derive(Clone, Debug, Default)]
pub struct Assembler {
    anchors: AnchorConfig,
}

impl Assembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a custom anchor-field policy for candidate ranking.
    pub fn with_anchors(anchors: AnchorConfig) -> Self {
        Self { anchors }
    }

    /// Reconstruct the canonical document set for one owner from a
    /// snapshot of their ledger entries.
    ///
    /// Per-entry failures are absorbed: a corrupt historical entry never
    /// prevents reconstruction of the rest. An empty result means no
    /// recoverable document existed; what that means to an end user is the
    /// caller's decision.
    pub fn assemble(&self, owner_id: &str, entries: &[LogEntry]) -> AssemblyResult {
        let classified = entries.iter().map(classify::classify).collect();
        let reconstruction = reconstruct::reconstruct(classified, &self.anchors);

        // Envelopes addressed to a different owner are interleaved noise
        // on a shared topic; skip them everywhere.
        let owned = |envelope_owner: &str| envelope_owner.is_empty() || envelope_owner == owner_id;

        let mut all_messages: Vec<DecodedMessage> = reconstruction
            .decoded
            .iter()
            .filter(|(env, _, _)| owned(&env.owner_id))
            .map(|(env, consensus, sequence)| DecodedMessage {
                doc_type: env.doc_type,
                timestamp: env.timestamp,
                consensus_timestamp: *consensus,
                sequence_number: *sequence,
                data: env.data.clone(),
            })
            .collect();
        all_messages.sort_by(|a, b| {
            b.consensus_timestamp
                .cmp(&a.consensus_timestamp)
                .then(b.sequence_number.cmp(&a.sequence_number))
        });
        let mut seen = HashSet::new();
        all_messages.retain(|m| seen.insert(ContentKey::of(m.doc_type, m.timestamp, &m.data)));

        let candidates: Vec<_> = reconstruction
            .candidates
            .into_iter()
            .filter(|c| owned(&c.owner_id))
            .collect();

        // Insight and completion writes are history, not competing
        // versions: every reconstructed document is kept.
        let mut insights = Vec::new();
        let mut completions = Vec::new();
        let mut insight_seen = HashSet::new();
        let mut completion_seen = HashSet::new();

        let mut history: Vec<_> = candidates
            .iter()
            .filter(|c| {
                matches!(
                    c.doc_type,
                    DocumentType::Insight | DocumentType::Completion
                )
            })
            .collect();
        history.sort_by(|a, b| {
            b.timestamp
                .cmp(&a.timestamp)
                .then(a.sequence_number.cmp(&b.sequence_number))
        });
        for candidate in history {
            let key = ContentKey::of(candidate.doc_type, candidate.timestamp, &candidate.data);
            match candidate.doc_type {
                DocumentType::Insight => {
                    if insight_seen.insert(key) {
                        insights.push(candidate.data.clone());
                    }
                }
                DocumentType::Completion => {
                    if completion_seen.insert(key) {
                        completions.push(candidate.data.clone());
                    }
                }
                _ => unreachable!(),
            }
        }

        let mut best = reconstruct::select_canonical(candidates);

        let profile = best
            .remove(&DocumentType::Profile)
            .map(|c| normalize::normalize(&c.data, DocumentType::Profile));
        let business_data = best
            .remove(&DocumentType::BusinessData)
            .map(|c| normalize::normalize(&c.data, DocumentType::BusinessData));

        AssemblyResult {
            profile,
            business_data,
            insights,
            completions,
            all_messages,
        }
    }
}
