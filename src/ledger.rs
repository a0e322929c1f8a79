//! External ledger collaborator and the document write path.
//!
//! The ledger is consumed as a black box: `append(bytes) -> entry id` and
//! `fetch(owner) -> entries`. [`MemoryLedger`] provides the reference
//! semantics, including the transport fragmenting oversized submissions
//! into tagged sub-entries the way the real service does.

use crate::chunker;
use crate::codec;
use crate::error::{DocLedgerError, Result};
use crate::types::{DocumentType, Envelope, EntryId, LogEntry, Timestamp, TransportChunkInfo};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Fetch ordering by consensus timestamp.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FetchOrder {
    Ascending,
    Descending,
}

/// The append-only log service this crate reads from and writes to.
///
/// `append` fails with [`DocLedgerError::Transport`] on network or
/// availability issues; that error is propagated to callers unchanged and
/// never retried here. `fetch` may return fewer entries than requested and
/// guarantees no ordering stronger than best effort; the read path re-sorts
/// as needed.
pub trait LedgerClient {
    fn append(&self, owner_topic: &str, payload: &[u8]) -> Result<EntryId>;

    fn fetch(&self, owner_topic: &str, limit: usize, order: FetchOrder) -> Result<Vec<LogEntry>>;
}

/// Default per-entry payload ceiling, matching the consensus service's
/// single-message limit.
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 1024;

/// Floor for the chunk data budget, so pathological payload limits still
/// produce forward progress.
const MIN_CHUNK_BUDGET: usize = 64;

/// Writes documents to the ledger, chunking them when they exceed the
/// per-entry payload ceiling.
pub struct DocumentWriter<'a, L: LedgerClient> {
    ledger: &'a L,
    max_payload_bytes: usize,
}

impl<'a, L: LedgerClient> DocumentWriter<'a, L> {
    pub fn new(ledger: &'a L) -> Self {
        Self {
            ledger,
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
        }
    }

    pub fn with_max_payload_bytes(mut self, max_payload_bytes: usize) -> Self {
        self.max_payload_bytes = max_payload_bytes;
        self
    }

    /// Write a document, stamping the current time as the write-session
    /// timestamp.
    pub fn write(
        &self,
        owner_topic: &str,
        doc_type: DocumentType,
        owner_id: &str,
        document: &Map<String, Value>,
    ) -> Result<Vec<EntryId>> {
        self.write_at(
            owner_topic,
            doc_type,
            owner_id,
            document,
            Timestamp::now().as_millis(),
        )
    }

    /// Write a document with an explicit write-session timestamp. Chunks
    /// of one call share the timestamp, which is what groups them back
    /// together on the read path.
    pub fn write_at(
        &self,
        owner_topic: &str,
        doc_type: DocumentType,
        owner_id: &str,
        document: &Map<String, Value>,
        timestamp: i64,
    ) -> Result<Vec<EntryId>> {
        // Envelope metadata eats into the payload ceiling; measure it with
        // a probe carrying worst-case chunk counters and an empty body.
        let probe = Envelope::chunk(
            doc_type,
            owner_id,
            timestamp,
            Map::new(),
            u32::MAX,
            u32::MAX,
        );
        let overhead = codec::encode(&probe)?.len() - 2;
        let budget = self
            .max_payload_bytes
            .saturating_sub(overhead)
            .max(MIN_CHUNK_BUDGET);

        let chunks = chunker::split(document, budget);
        let total = chunks.len() as u32;

        let mut ids = Vec::with_capacity(chunks.len());
        if total == 1 {
            let envelope = Envelope::single(
                doc_type,
                owner_id,
                timestamp,
                chunks.into_iter().next().unwrap_or_default(),
            );
            ids.push(self.ledger.append(owner_topic, &codec::encode(&envelope)?)?);
        } else {
            for (index, chunk) in chunks.into_iter().enumerate() {
                let envelope =
                    Envelope::chunk(doc_type, owner_id, timestamp, chunk, index as u32, total);
                ids.push(self.ledger.append(owner_topic, &codec::encode(&envelope)?)?);
            }
        }

        tracing::debug!(
            topic = owner_topic,
            doc_type = %doc_type,
            entries = ids.len(),
            "document written"
        );
        Ok(ids)
    }
}

/// In-memory ledger with the real service's transport semantics: payloads
/// above the transport limit are themselves fragmented into
/// `TransportChunkInfo`-tagged sub-entries.
///
/// Deterministic consensus timestamps make it suitable as a test double.
pub struct MemoryLedger {
    inner: Mutex<MemoryLedgerInner>,
    transport_limit: usize,
}

#[derive(Default)]
struct MemoryLedgerInner {
    topics: HashMap<String, Vec<LogEntry>>,
    next_entry: u64,
}

/// Arbitrary epoch base so consensus timestamps look like wall-clock time.
const CONSENSUS_BASE_MICROS: i64 = 1_700_000_000_000_000;

impl MemoryLedger {
    pub fn new() -> Self {
        Self::with_transport_limit(DEFAULT_MAX_PAYLOAD_BYTES)
    }

    /// Use a custom transport fragmentation threshold.
    pub fn with_transport_limit(transport_limit: usize) -> Self {
        Self {
            inner: Mutex::new(MemoryLedgerInner::default()),
            transport_limit: transport_limit.max(1),
        }
    }

    /// Entries currently stored for a topic, in append order.
    pub fn entries(&self, owner_topic: &str) -> Vec<LogEntry> {
        self.inner
            .lock()
            .topics
            .get(owner_topic)
            .cloned()
            .unwrap_or_default()
    }
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl LedgerClient for MemoryLedger {
    fn append(&self, owner_topic: &str, payload: &[u8]) -> Result<EntryId> {
        let mut inner = self.inner.lock();

        inner.next_entry += 1;
        let id = inner.next_entry;

        let fragments: Vec<&[u8]> = if payload.len() > self.transport_limit {
            payload.chunks(self.transport_limit).collect()
        } else {
            vec![payload]
        };
        let total = fragments.len() as u32;

        let topic = inner.topics.entry(owner_topic.to_string()).or_default();
        for (index, fragment) in fragments.into_iter().enumerate() {
            let sequence_number = topic.len() as u64 + 1;
            topic.push(LogEntry {
                sequence_number,
                consensus_timestamp: Timestamp(
                    CONSENSUS_BASE_MICROS + (id as i64) * 1_000_000 + index as i64,
                ),
                payer_id: "0.0.1001".into(),
                payload: fragment.to_vec(),
                transport_chunk: (total > 1).then(|| TransportChunkInfo {
                    index: index as u32,
                    total,
                    group_key: format!("tg-{id}"),
                }),
            });
        }

        Ok(EntryId(id))
    }

    fn fetch(&self, owner_topic: &str, limit: usize, order: FetchOrder) -> Result<Vec<LogEntry>> {
        if limit == 0 {
            return Err(DocLedgerError::InvalidOperation(
                "fetch limit must be positive".into(),
            ));
        }

        let mut entries = self.entries(owner_topic);
        if order == FetchOrder::Descending {
            entries.reverse();
        }
        entries.truncate(limit);
        Ok(entries)
    }
}
