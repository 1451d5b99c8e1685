//! Incremental frame decoding for the turn byte stream.
//!
//! The transport delivers arbitrary byte chunks; frame boundaries are
//! newlines. Each line is either empty (frame separator) or a single JSON
//! object. The decoder buffers partial lines across chunks, so a frame
//! split mid-way through a multi-byte character still decodes cleanly.

use crate::error::{ProtocolError, ProtocolResult};
use crate::event::StreamEvent;

/// Splits an ordered byte stream into [`StreamEvent`] frames.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk; returns every frame completed by it, in order.
    ///
    /// A malformed line fails the whole decode: the caller must treat the
    /// connection as dead. Frames already returned remain valid.
    pub fn push(&mut self, chunk: &[u8]) -> ProtocolResult<Vec<StreamEvent>> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(newline) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=newline).collect();
            if let Some(event) = Self::decode_line(&line[..line.len() - 1])? {
                events.push(event);
            }
        }
        Ok(events)
    }

    /// Flush a trailing unterminated line once the stream ends.
    pub fn finish(&mut self) -> ProtocolResult<Option<StreamEvent>> {
        let rest = std::mem::take(&mut self.buffer);
        Self::decode_line(&rest)
    }

    /// Bytes buffered awaiting a newline.
    pub fn pending_bytes(&self) -> usize {
        self.buffer.len()
    }

    fn decode_line(line: &[u8]) -> ProtocolResult<Option<StreamEvent>> {
        let text = std::str::from_utf8(line)
            .map_err(|error| ProtocolError::Decode(format!("invalid utf-8 in frame: {error}")))?;
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }
        serde_json::from_str(trimmed)
            .map(Some)
            .map_err(|error| ProtocolError::Decode(error.to_string()))
    }
}

/// Encode one event as a wire frame (JSON object plus newline terminator).
pub fn encode_frame(event: &StreamEvent) -> ProtocolResult<String> {
    let mut frame = serde_json::to_string(event)
        .map_err(|error| ProtocolError::Decode(error.to_string()))?;
    frame.push('\n');
    Ok(frame)
}
