//! On-disk framing for outbox files.
//!
//! # File Format
//!
//! ```text
//! [MAGIC "SPOX"][VERSION u8][RESERVED 3B]
//! [FRAME_START:u32][length:u32][payload:bytes][crc32:u32][FRAME_END:u32]
//! [FRAME_START:u32][length:u32][payload:bytes][crc32:u32][FRAME_END:u32]
//! ...
//! ```
//!
//! All integers are little-endian. The CRC covers the start sentinel, the
//! length and the payload. A missing end sentinel means the frame was never
//! completely written.

use bytes::Bytes;
use sealpost_crypto::crc32;

use crate::{OutboxError, OutboxRecord, OutboxResult};

// ============================================================================
// Format Constants
// ============================================================================

const MAGIC: &[u8; 4] = b"SPOX";

const VERSION: u8 = 0x01;

const RESERVED: [u8; 3] = [0u8; 3];

/// magic(4) + version(1) + reserved(3)
pub(crate) const PREAMBLE_SIZE: usize = 8;

const FRAME_START: u32 = 0x5EA1_B0C5;

const FRAME_END: u32 = 0xC0FF_EE42;

/// start(4) + length(4)
const FRAME_HEADER_SIZE: usize = 8;

/// header(8) + crc(4) + end(4)
const FRAME_OVERHEAD: usize = 16;

fn read_u32(data: &[u8], at: usize) -> OutboxResult<u32> {
    data.get(at..at + 4)
        .and_then(|slice| slice.try_into().ok())
        .map(u32::from_le_bytes)
        .ok_or(OutboxError::UnexpectedEof)
}

// ============================================================================
// Encoding
// ============================================================================

/// Serializes a whole outbox: preamble followed by one frame per record.
pub(crate) fn encode_file(records: &[OutboxRecord]) -> OutboxResult<Vec<u8>> {
    let mut buf = Vec::with_capacity(PREAMBLE_SIZE + records.len() * 256);
    buf.extend_from_slice(MAGIC);
    buf.push(VERSION);
    buf.extend_from_slice(&RESERVED);

    for record in records {
        let payload = postcard::to_allocvec(record)?;
        write_frame(&mut buf, &payload);
    }
    Ok(buf)
}

fn write_frame(buf: &mut Vec<u8>, payload: &[u8]) {
    let frame_start = buf.len();
    buf.reserve(FRAME_OVERHEAD + payload.len());

    buf.extend_from_slice(&FRAME_START.to_le_bytes());
    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(payload);

    let crc = crc32(&buf[frame_start..]);
    buf.extend_from_slice(&crc.to_le_bytes());
    buf.extend_from_slice(&FRAME_END.to_le_bytes());

    debug_assert_eq!(
        buf.len() - frame_start,
        FRAME_OVERHEAD + payload.len(),
        "frame size mismatch"
    );
}

// ============================================================================
// Decoding
// ============================================================================

/// Parses an outbox file. An empty file is an empty outbox.
pub(crate) fn decode_file(data: &Bytes) -> OutboxResult<Vec<OutboxRecord>> {
    if data.is_empty() {
        return Ok(Vec::new());
    }
    if data.len() < PREAMBLE_SIZE || &data[0..4] != MAGIC {
        return Err(OutboxError::BadPreamble);
    }
    if data[4] != VERSION {
        return Err(OutboxError::UnsupportedVersion(data[4]));
    }

    let mut records = Vec::new();
    let mut position = PREAMBLE_SIZE;
    while position < data.len() {
        let (payload, consumed) = read_frame(data, position)?;
        records.push(postcard::from_bytes(&payload)?);
        position += consumed;
    }
    Ok(records)
}

/// Reads one frame starting at `position`.
///
/// Returns the payload and the number of bytes the frame occupies.
fn read_frame(data: &Bytes, position: usize) -> OutboxResult<(Bytes, usize)> {
    let frame = &data[position..];
    if frame.len() < FRAME_HEADER_SIZE {
        return Err(OutboxError::UnexpectedEof);
    }

    if read_u32(frame, 0)? != FRAME_START {
        return Err(OutboxError::TornWrite {
            reason: format!("missing frame start sentinel at byte {position}"),
        });
    }

    let length = read_u32(frame, 4)? as usize;
    let total = FRAME_OVERHEAD + length;
    if frame.len() < total {
        return Err(OutboxError::UnexpectedEof);
    }

    let crc_at = FRAME_HEADER_SIZE + length;
    let stored_crc = read_u32(frame, crc_at)?;
    if stored_crc != crc32(&frame[..crc_at]) {
        return Err(OutboxError::Corrupted { position });
    }

    let end_sentinel = read_u32(frame, crc_at + 4)?;
    if end_sentinel != FRAME_END {
        return Err(OutboxError::TornWrite {
            reason: format!(
                "missing frame end sentinel at byte {position}: expected {FRAME_END:#010x}, found {end_sentinel:#010x}"
            ),
        });
    }

    let payload_at = position + FRAME_HEADER_SIZE;
    Ok((data.slice(payload_at..payload_at + length), total))
}
