//! Length-prefixed framing
//!
//! Frame layout: `[len: u32 big-endian][payload: len bytes]`.

use crate::{Error, Result};

/// Maximum accepted payload size (16 MiB)
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

const HEADER_LEN: usize = 4;

/// Encode a payload into a single frame
pub fn encode_frame(payload: &[u8]) -> Result<Vec<u8>> {
    if payload.len() > MAX_FRAME_SIZE {
        return Err(Error::Frame(format!(
            "payload of {} bytes exceeds maximum frame size {}",
            payload.len(),
            MAX_FRAME_SIZE
        )));
    }

    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Try to decode one frame from the front of `data`
///
/// Returns the payload and the number of bytes consumed, or `None` if `data`
/// does not yet hold a complete frame.
pub fn decode_frame(data: &[u8]) -> Result<Option<(Vec<u8>, usize)>> {
    if data.len() < HEADER_LEN {
        return Ok(None);
    }

    let len = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(Error::Frame(format!(
            "announced frame of {len} bytes exceeds maximum frame size {MAX_FRAME_SIZE}"
        )));
    }

    let total = HEADER_LEN + len;
    if data.len() < total {
        return Ok(None);
    }

    Ok(Some((data[HEADER_LEN..total].to_vec(), total)))
}

/// Accumulates partial reads until complete frames are available
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buf: Vec<u8>,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self { buf: Vec::with_capacity(8192) }
    }

    /// Append raw bytes read from the wire
    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Pop the next complete frame, if any
    pub fn next_frame(&mut self) -> Result<Option<Vec<u8>>> {
        match decode_frame(&self.buf)? {
            Some((payload, consumed)) => {
                self.buf.drain(..consumed);
                Ok(Some(payload))
            }
            None => Ok(None),
        }
    }

    /// Number of buffered bytes not yet returned as frames
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}
