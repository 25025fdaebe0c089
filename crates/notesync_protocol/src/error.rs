//! Error types for record encoding.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors raised while encoding or decoding persisted records.
#[derive(Debug, Error)]
pub enum CodecError {
    /// CBOR serialization failed.
    #[error("encode error: {0}")]
    Encode(String),

    /// CBOR deserialization failed.
    #[error("decode error: {0}")]
    Decode(String),

    /// The record was written by an unknown format version.
    #[error("unsupported record version {found} (expected {expected})")]
    UnsupportedVersion {
        /// Version found in the envelope.
        found: u16,
        /// Version this build writes.
        expected: u16,
    },

    /// A string did not name a known entity type.
    #[error("unknown entity type: {0}")]
    UnknownEntityType(String),
}
