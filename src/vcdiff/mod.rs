//! VCDIFF (RFC 3284) wire format: headers, integers, code table, address
//! cache, and the window reader/writer used by the merge engine.
//!
//! The reader decodes a delta stream into per-window instruction lists
//! without executing them; the writer re-encodes a merged whole-target
//! state back into a VCDIFF stream.

pub mod address_cache;
pub mod code_table;
pub mod header;
pub mod reader;
pub mod varint;
pub mod writer;

pub use reader::{DecodedWindow, DeltaReader, Instruction};
pub use writer::{DeltaWriter, WriteOptions, write_delta};

use thiserror::Error;

/// Errors produced while parsing a VCDIFF stream.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("unsupported: {0}")]
    Unsupported(String),
}
