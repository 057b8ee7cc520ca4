//! Append-only frame log following the meta page.
//!
//! Each frame is `[len: u32][crc: u32][payload; len]`, big endian. The CRC
//! is salted with the storage salt and the frame's file offset, so stale
//! frames from an earlier log generation never validate.

use tracing::debug;

use crate::primitives::io::FileIo;
use crate::types::{be_u32, salted_crc32, Result, UmbraError};

/// Bytes of framing in front of every payload.
pub const FRAME_HEADER_LEN: usize = 8;
/// Upper bound on a single payload.
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Encodes one frame destined for file offset `offset`.
pub fn encode_frame(salt: u64, offset: u64, payload: &[u8]) -> Result<Vec<u8>> {
    if payload.is_empty() || payload.len() > MAX_FRAME_LEN {
        return Err(UmbraError::Invalid("frame payload size out of range"));
    }
    let crc = salted_crc32(salt, offset, payload);
    let mut out = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
    out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    out.extend_from_slice(&crc.to_be_bytes());
    out.extend_from_slice(payload);
    Ok(out)
}

/// Result of scanning the log.
#[derive(Debug, Default)]
pub struct LogScan {
    /// Payloads of every intact frame, in order.
    pub frames: Vec<Vec<u8>>,
    /// Offset right after the last intact frame.
    pub valid_end: u64,
    /// True when bytes after `valid_end` failed to parse as a frame.
    pub torn: bool,
}

/// Reads frames from `start` until the end of the file or the first frame
/// that fails its length or checksum test.
pub fn scan_frames(io: &dyn FileIo, salt: u64, start: u64) -> Result<LogScan> {
    let file_len = io.len()?;
    let mut scan = LogScan {
        valid_end: start,
        ..LogScan::default()
    };
    let mut offset = start;
    while offset < file_len {
        if file_len - offset < FRAME_HEADER_LEN as u64 {
            scan.torn = true;
            break;
        }
        let mut header = [0u8; FRAME_HEADER_LEN];
        io.read_at(offset, &mut header)?;
        let len = be_u32(&header, 0) as usize;
        let crc = be_u32(&header, 4);
        let body_start = offset + FRAME_HEADER_LEN as u64;
        if len == 0 || len > MAX_FRAME_LEN || file_len - body_start < len as u64 {
            scan.torn = true;
            break;
        }
        let mut payload = vec![0u8; len];
        io.read_at(body_start, &mut payload)?;
        if salted_crc32(salt, offset, &payload) != crc {
            scan.torn = true;
            break;
        }
        scan.frames.push(payload);
        offset = body_start + len as u64;
        scan.valid_end = offset;
    }
    debug!(
        frames = scan.frames.len(),
        valid_end = scan.valid_end,
        torn = scan.torn,
        "frame.scan"
    );
    Ok(scan)
}
