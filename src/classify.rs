//! Assigns each raw ledger entry to a fragment class.
//!
//! Classification is pure and order-independent: the class of one entry
//! never depends on any other entry. Unparseable entries keep their decoded
//! text so the repairer can have a go before the entry is dropped.

use crate::codec;
use crate::types::{Envelope, LogEntry, Timestamp, TransportChunkInfo};

/// A raw entry with its fragment class attached.
#[derive(Clone, Debug)]
pub struct ClassifiedEntry {
    pub sequence_number: u64,
    pub consensus_timestamp: Timestamp,
    pub kind: FragmentKind,
}

/// What a raw entry turned out to be.
#[derive(Clone, Debug)]
pub enum FragmentKind {
    /// Parsed envelope carrying chunk metadata.
    AppChunk(Envelope),

    /// Parsed envelope holding a complete document for one write.
    SingleDocument(Envelope),

    /// The transport split an oversized submission; the payload is a
    /// partial byte string, not valid structured data on its own.
    TransportFragment {
        info: TransportChunkInfo,
        /// Raw payload bytes, kept undecoded for later concatenation. The
        /// transport cuts at arbitrary byte offsets, so a fragment on its
        /// own need not be valid UTF-8.
        bytes: Vec<u8>,
    },

    /// Neither parseable nor a transport fragment. `text` is the
    /// transport-decoded payload when it was at least valid UTF-8.
    Unparseable { text: Option<String> },
}

/// Classify a single ledger entry.
pub fn classify(entry: &LogEntry) -> ClassifiedEntry {
    let kind = classify_payload(entry);
    ClassifiedEntry {
        sequence_number: entry.sequence_number,
        consensus_timestamp: entry.consensus_timestamp,
        kind,
    }
}

fn classify_payload(entry: &LogEntry) -> FragmentKind {
    let decoded = codec::transport_decode(&entry.payload).ok();

    if let Some(text) = &decoded {
        match codec::parse_envelope(text) {
            Ok(envelope) if envelope.is_chunk() => return FragmentKind::AppChunk(envelope),
            Ok(envelope) => return FragmentKind::SingleDocument(envelope),
            Err(e) => {
                tracing::debug!(
                    sequence = entry.sequence_number,
                    error = %e,
                    "entry payload did not parse as an envelope"
                );
            }
        }
    }

    if let Some(info) = &entry.transport_chunk {
        if info.total > 1 {
            return FragmentKind::TransportFragment {
                info: info.clone(),
                bytes: entry.payload.clone(),
            };
        }
    }

    FragmentKind::Unparseable { text: decoded }
}
