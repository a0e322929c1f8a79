//! # Docledger
//!
//! Chunked document persistence and reconstruction over an append-only
//! ledger with a hard per-entry payload ceiling.
//!
//! ## Core Concepts
//!
//! - **Envelope**: the metadata+payload unit written into ledger entries
//! - **Chunks**: ordered fragments of a document too large for one entry
//! - **Classification**: sorting raw entries into documents, chunks,
//!   transport fragments, and unparseable payloads
//! - **Reconstruction**: grouping, merging, and ranking fragments back
//!   into one canonical document per owner and type
//!
//! ## Example
//!
//! ```ignore
//! use docledger::{Assembler, DocumentType, DocumentWriter, FetchOrder, MemoryLedger};
//! use serde_json::json;
//!
//! let ledger = MemoryLedger::new();
//! let writer = DocumentWriter::new(&ledger);
//!
//! // Write a document; oversized ones are chunked transparently.
//! writer.write("topic-1", DocumentType::Profile, "owner-1", &profile)?;
//!
//! // Read everything back and reconstruct.
//! let entries = ledger.fetch("topic-1", 1000, FetchOrder::Ascending)?;
//! let result = Assembler::new().assemble("owner-1", &entries);
//! ```

pub mod assemble;
pub mod chunker;
pub mod classify;
pub mod codec;
pub mod error;
pub mod ledger;
pub mod normalize;
pub mod reconstruct;
pub mod repair;
pub mod types;

// Re-exports
pub use assemble::{Assembler, AssemblyResult};
pub use classify::{ClassifiedEntry, FragmentKind};
pub use error::{DecodeError, DocLedgerError, Result};
pub use ledger::{
    DocumentWriter, FetchOrder, LedgerClient, MemoryLedger, DEFAULT_MAX_PAYLOAD_BYTES,
};
pub use reconstruct::{AnchorConfig, Reconstruction, ReconstructionCandidate};
pub use types::*;
