//! Core types for ledger-backed documents.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

/// Identifier assigned by the ledger to an appended entry.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntryId(pub u64);

impl fmt::Debug for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntryId({})", self.0)
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Microseconds since Unix epoch.
///
/// Used for ledger consensus timestamps. Envelope timestamps on the wire
/// are epoch milliseconds (see [`Envelope::timestamp`]).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Current time.
    pub fn now() -> Self {
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("Time went backwards");
        Timestamp(duration.as_micros() as i64)
    }

    /// Epoch milliseconds, for envelope wire timestamps.
    pub fn as_millis(&self) -> i64 {
        self.0 / 1000
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

/// Content hash for message deduplication (SHA-256).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentKey(pub [u8; 32]);

/// Serialized `data` bytes beyond this length do not contribute to the
/// content key, so a retried write truncated at a different point still
/// collapses with its twin.
const CONTENT_KEY_DATA_PREFIX: usize = 256;

impl ContentKey {
    /// Compute the dedup key for a decoded message:
    /// `(type, timestamp, truncated(data))`.
    pub fn of(doc_type: DocumentType, timestamp: i64, data: &Map<String, Value>) -> Self {
        let serialized = serde_json::to_string(data).unwrap_or_default();
        let prefix: &str = match serialized
            .char_indices()
            .find(|&(i, _)| i > CONTENT_KEY_DATA_PREFIX)
        {
            Some((i, _)) => &serialized[..i],
            None => &serialized,
        };

        let mut hasher = Sha256::new();
        hasher.update(doc_type.as_str().as_bytes());
        hasher.update(timestamp.to_le_bytes());
        hasher.update(prefix.as_bytes());
        ContentKey(hasher.finalize().into())
    }

    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentKey({}...)", &self.to_hex()[..8])
    }
}

/// Application-level document category.
///
/// Determines merge and normalization rules downstream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    Profile,
    BusinessData,
    Insight,
    Completion,
}

impl DocumentType {
    /// Wire name, matching the serde representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentType::Profile => "profile",
            DocumentType::BusinessData => "business_data",
            DocumentType::Insight => "insight",
            DocumentType::Completion => "completion",
        }
    }

    /// All document types, in a stable order.
    pub fn all() -> [DocumentType; 4] {
        [
            DocumentType::Profile,
            DocumentType::BusinessData,
            DocumentType::Insight,
            DocumentType::Completion,
        ]
    }
}

impl FromStr for DocumentType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "profile" => Ok(DocumentType::Profile),
            "business_data" => Ok(DocumentType::BusinessData),
            "insight" => Ok(DocumentType::Insight),
            "completion" => Ok(DocumentType::Completion),
            _ => Err(()),
        }
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fragmentation metadata attached by the transport when it split an
/// oversized submission itself, independent of application chunking.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportChunkInfo {
    /// Zero-based position within the transport group.
    pub index: u32,

    /// Total fragments in the group.
    pub total: u32,

    /// Opaque key tying fragments of one submission together.
    pub group_key: String,
}

/// A single raw entry fetched from the ledger. Immutable once observed.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LogEntry {
    /// Ledger-assigned position within the owner topic.
    pub sequence_number: u64,

    /// When the ledger reached consensus on the entry.
    pub consensus_timestamp: Timestamp,

    /// Account that paid for the append.
    pub payer_id: String,

    /// Raw payload bytes as fetched.
    pub payload: Vec<u8>,

    /// Present only when the transport fragmented the submission.
    pub transport_chunk: Option<TransportChunkInfo>,
}

/// The application-level unit written into ledger payloads.
///
/// `chunk_index`/`total_chunks` are present only when the chunker split a
/// document; their absence means `data` is a complete document for that
/// write.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(rename = "type")]
    pub doc_type: DocumentType,

    /// Write-session timestamp, epoch milliseconds. Chunks of one logical
    /// write share this value.
    #[serde(default)]
    pub timestamp: i64,

    /// Missing on some historical writes; an empty owner is treated as
    /// belonging to the topic being assembled.
    #[serde(default)]
    pub owner_id: String,

    /// Partial or complete document body.
    #[serde(default)]
    pub data: Map<String, Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_index: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_chunks: Option<u32>,
}

impl Envelope {
    /// Envelope for a complete (unchunked) document write.
    pub fn single(
        doc_type: DocumentType,
        owner_id: impl Into<String>,
        timestamp: i64,
        data: Map<String, Value>,
    ) -> Self {
        Self {
            doc_type,
            timestamp,
            owner_id: owner_id.into(),
            data,
            chunk_index: None,
            total_chunks: None,
        }
    }

    /// Envelope for one chunk of a split document write.
    pub fn chunk(
        doc_type: DocumentType,
        owner_id: impl Into<String>,
        timestamp: i64,
        data: Map<String, Value>,
        index: u32,
        total: u32,
    ) -> Self {
        Self {
            doc_type,
            timestamp,
            owner_id: owner_id.into(),
            data,
            chunk_index: Some(index),
            total_chunks: Some(total),
        }
    }

    /// Whether this envelope is one chunk of a larger write.
    pub fn is_chunk(&self) -> bool {
        self.chunk_index.is_some()
    }
}

/// One element of the audit/history view produced by assembly.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DecodedMessage {
    pub doc_type: DocumentType,

    /// Envelope write-session timestamp (epoch millis).
    pub timestamp: i64,

    /// Ledger consensus timestamp of the entry that carried it.
    pub consensus_timestamp: Timestamp,

    pub sequence_number: u64,

    pub data: Map<String, Value>,
}
