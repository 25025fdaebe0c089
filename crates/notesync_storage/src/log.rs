//! Record framing for the append-only cache log.
//!
//! Frame layout (little-endian):
//!
//! ```text
//! | magic "NSKV" (4) | body len (4) | crc32(body) (4) | body |
//! body = | kind (1) | key len (4) | key | value len (4) | value |   (Put)
//!        | kind (1) | key len (4) | key |                            (Remove)
//! ```

use crate::error::{StorageError, StorageResult};

/// Magic bytes at the start of every frame.
pub(crate) const RECORD_MAGIC: [u8; 4] = *b"NSKV";

/// Frame header size: magic + length + checksum.
pub(crate) const HEADER_SIZE: usize = 12;

const KIND_PUT: u8 = 1;
const KIND_REMOVE: u8 = 2;

/// A single mutation in the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum LogRecord {
    Put { key: String, value: Vec<u8> },
    Remove { key: String },
}

impl LogRecord {
    /// Encodes the record as a complete frame.
    pub(crate) fn encode_frame(&self) -> StorageResult<Vec<u8>> {
        let mut body = Vec::new();
        match self {
            LogRecord::Put { key, value } => {
                body.push(KIND_PUT);
                push_len_prefixed(&mut body, key.as_bytes())?;
                push_len_prefixed(&mut body, value)?;
            }
            LogRecord::Remove { key } => {
                body.push(KIND_REMOVE);
                push_len_prefixed(&mut body, key.as_bytes())?;
            }
        }

        let len = u32::try_from(body.len())
            .map_err(|_| StorageError::Encoding(format!("record too large: {} bytes", body.len())))?;

        let mut frame = Vec::with_capacity(HEADER_SIZE + body.len());
        frame.extend_from_slice(&RECORD_MAGIC);
        frame.extend_from_slice(&len.to_le_bytes());
        frame.extend_from_slice(&compute_crc32(&body).to_le_bytes());
        frame.extend_from_slice(&body);
        Ok(frame)
    }

    fn decode_body(body: &[u8]) -> StorageResult<Self> {
        let (&kind, rest) = body
            .split_first()
            .ok_or_else(|| StorageError::Corrupted("empty record body".into()))?;
        let mut cursor = 0usize;
        let key_bytes = read_len_prefixed(rest, &mut cursor)?;
        let key = String::from_utf8(key_bytes.to_vec())
            .map_err(|_| StorageError::Corrupted("record key is not UTF-8".into()))?;

        let record = match kind {
            KIND_PUT => {
                let value = read_len_prefixed(rest, &mut cursor)?.to_vec();
                LogRecord::Put { key, value }
            }
            KIND_REMOVE => LogRecord::Remove { key },
            other => {
                return Err(StorageError::Corrupted(format!("unknown record kind {other}")));
            }
        };

        if cursor != rest.len() {
            return Err(StorageError::Corrupted(format!(
                "trailing bytes in record: expected {} bytes, got {}",
                cursor,
                rest.len()
            )));
        }
        Ok(record)
    }
}

/// Outcome of reading one frame from a buffer.
#[derive(Debug)]
pub(crate) enum Frame {
    /// A complete record and the offset of the next frame.
    Record(LogRecord, usize),
    /// Clean end of the log.
    End,
    /// An incomplete or damaged frame starting at this offset.
    Torn(String),
}

/// Reads the frame starting at `offset`.
pub(crate) fn read_frame(buf: &[u8], offset: usize) -> Frame {
    if offset == buf.len() {
        return Frame::End;
    }
    if buf.len() - offset < HEADER_SIZE {
        return Frame::Torn("incomplete header".into());
    }

    let header = &buf[offset..offset + HEADER_SIZE];
    if header[0..4] != RECORD_MAGIC {
        return Frame::Torn("bad magic".into());
    }
    let len = u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as usize;
    let crc = u32::from_le_bytes([header[8], header[9], header[10], header[11]]);

    let body_start = offset + HEADER_SIZE;
    let Some(body_end) = body_start.checked_add(len).filter(|end| *end <= buf.len()) else {
        return Frame::Torn("incomplete body".into());
    };
    let body = &buf[body_start..body_end];
    if compute_crc32(body) != crc {
        return Frame::Torn("checksum mismatch".into());
    }

    match LogRecord::decode_body(body) {
        Ok(record) => Frame::Record(record, body_end),
        Err(e) => Frame::Torn(e.to_string()),
    }
}

fn push_len_prefixed(buf: &mut Vec<u8>, bytes: &[u8]) -> StorageResult<()> {
    let len = u32::try_from(bytes.len())
        .map_err(|_| StorageError::Encoding(format!("field too large: {} bytes", bytes.len())))?;
    buf.extend_from_slice(&len.to_le_bytes());
    buf.extend_from_slice(bytes);
    Ok(())
}

fn read_len_prefixed<'a>(buf: &'a [u8], cursor: &mut usize) -> StorageResult<&'a [u8]> {
    if *cursor + 4 > buf.len() {
        return Err(StorageError::Corrupted("unexpected end of length".into()));
    }
    let len = u32::from_le_bytes([
        buf[*cursor],
        buf[*cursor + 1],
        buf[*cursor + 2],
        buf[*cursor + 3],
    ]) as usize;
    *cursor += 4;
    if *cursor + len > buf.len() {
        return Err(StorageError::Corrupted("unexpected end of field".into()));
    }
    let bytes = &buf[*cursor..*cursor + len];
    *cursor += len;
    Ok(bytes)
}

/// Computes the IEEE CRC32 checksum of `data`.
pub(crate) fn compute_crc32(data: &[u8]) -> u32 {
    const CRC32_TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                if crc & 1 != 0 {
                    crc = (crc >> 1) ^ 0xEDB8_8320;
                } else {
                    crc >>= 1;
                }
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        let index = ((crc ^ u32::from(byte)) & 0xFF) as usize;
        crc = (crc >> 8) ^ CRC32_TABLE[index];
    }
    !crc
}
