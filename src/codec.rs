//! Envelope serialization and payload decoding.
//!
//! Payloads fetched back from the ledger may carry an extra transport-level
//! base64 layer, so decoding sniffs for it before attempting a structured
//! parse. Decode failure is a typed error consumed by the classifier, never
//! surfaced to assembly callers.

use crate::error::{DecodeError, Result};
use crate::types::Envelope;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

/// Shortest payload we will treat as possibly base64. Anything shorter is
/// parsed directly; a tiny all-alphanumeric payload is more likely a bare
/// value than an encoded document.
const MIN_BASE64_LEN: usize = 16;

/// Serialize an envelope into payload bytes.
pub fn encode(envelope: &Envelope) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(envelope)?)
}

/// Decode raw payload bytes into an envelope.
pub fn decode(raw: &[u8]) -> std::result::Result<Envelope, DecodeError> {
    let text = transport_decode(raw)?;
    parse_envelope(&text)
}

/// Undo the optional transport-level byte encoding.
///
/// If the payload matches the base64 alphabet, meets a minimum length, and
/// decodes to text beginning with `{` or `[`, the decoded text is returned;
/// otherwise the payload text is returned as-is.
pub fn transport_decode(raw: &[u8]) -> std::result::Result<String, DecodeError> {
    let text = std::str::from_utf8(raw).map_err(|_| DecodeError::NotText)?;
    let trimmed = text.trim();

    if looks_like_base64(trimmed) {
        if let Ok(bytes) = BASE64.decode(trimmed) {
            if let Ok(inner) = std::str::from_utf8(&bytes) {
                let head = inner.trim_start();
                if head.starts_with('{') || head.starts_with('[') {
                    return Ok(inner.to_string());
                }
            }
        }
    }

    Ok(trimmed.to_string())
}

/// Parse payload text as an envelope.
pub fn parse_envelope(text: &str) -> std::result::Result<Envelope, DecodeError> {
    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|e| DecodeError::Json(e.to_string()))?;
    serde_json::from_value(value).map_err(|e| DecodeError::NotEnvelope(e.to_string()))
}

fn looks_like_base64(s: &str) -> bool {
    s.len() >= MIN_BASE64_LEN
        && s.len() % 4 == 0
        && s.bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'+' | b'/' | b'='))
}
