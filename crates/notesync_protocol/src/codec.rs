//! Versioned CBOR records.
//!
//! Every persisted record is wrapped in an envelope carrying the format
//! version, so a newer build can refuse (or migrate) records it does not
//! understand instead of misreading them.

use crate::error::{CodecError, CodecResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Record format version written by this build.
pub const RECORD_VERSION: u16 = 1;

#[derive(Serialize)]
struct EnvelopeRef<'a, T> {
    version: u16,
    body: &'a T,
}

#[derive(Deserialize)]
struct VersionProbe {
    version: u16,
}

#[derive(Deserialize)]
struct Envelope<T> {
    body: T,
}

/// Encodes `value` as a versioned CBOR record.
pub fn encode_record<T: Serialize>(value: &T) -> CodecResult<Vec<u8>> {
    let envelope = EnvelopeRef {
        version: RECORD_VERSION,
        body: value,
    };
    let mut bytes = Vec::new();
    ciborium::into_writer(&envelope, &mut bytes).map_err(|e| CodecError::Encode(e.to_string()))?;
    Ok(bytes)
}

/// Decodes a versioned CBOR record.
///
/// # Errors
///
/// Returns [`CodecError::UnsupportedVersion`] for records written by another
/// format version, and [`CodecError::Decode`] for malformed bytes.
pub fn decode_record<T: DeserializeOwned>(bytes: &[u8]) -> CodecResult<T> {
    let probe: VersionProbe =
        ciborium::from_reader(bytes).map_err(|e| CodecError::Decode(e.to_string()))?;

    if probe.version != RECORD_VERSION {
        return Err(CodecError::UnsupportedVersion {
            found: probe.version,
            expected: RECORD_VERSION,
        });
    }

    let envelope: Envelope<T> =
        ciborium::from_reader(bytes).map_err(|e| CodecError::Decode(e.to_string()))?;
    Ok(envelope.body)
}
