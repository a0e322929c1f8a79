//! Error types for ledger-backed documents.

use thiserror::Error;

/// Main error type for ledger and write-path operations.
///
/// Per-entry decode failures never reach this type: the read path absorbs
/// them (skip-and-continue) so one corrupt historical entry cannot prevent
/// reconstruction of the rest. Only transport failures, which affect the
/// whole input set, are surfaced.
#[derive(Debug, Error)]
pub enum DocLedgerError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}

impl From<serde_json::Error> for DocLedgerError {
    fn from(e: serde_json::Error) -> Self {
        DocLedgerError::Serialization(e.to_string())
    }
}

/// Result type for ledger operations.
pub type Result<T> = std::result::Result<T, DocLedgerError>;

/// Why a payload failed to decode into an envelope.
///
/// Consumed by the classifier and repairer; never propagated out of
/// assembly.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Payload is not valid UTF-8")]
    NotText,

    #[error("Payload is not valid JSON: {0}")]
    Json(String),

    #[error("Parsed JSON is not an envelope: {0}")]
    NotEnvelope(String),
}
