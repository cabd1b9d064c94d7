//! ==============================================================================
//! protocol.rs - swarm datagram framing
//! ==============================================================================
//!
//! wire format (ascii):
//!
//!     +++<node-id>,<reading>***
//!
//! the reset broadcast and its acknowledgement share one frame:
//!
//!     +++RESET_REQUESTED***
//!
//! anything else is a malformed frame. callers drop those without touching
//! state; the error only exists so the reason can be logged.
//!
//! ==============================================================================

use thiserror::Error;

pub const START_MARKER: &str = "+++";
pub const END_MARKER: &str = "***";
pub const SEPARATOR: char = ',';
pub const RESET_MARKER: &str = "RESET_REQUESTED";

/// frame the coordinator broadcasts to every node when a reset starts
pub const RESET_FRAME: &[u8] = b"+++RESET_REQUESTED***";

/// largest reading a node may report (10-bit adc)
pub const MAX_READING: u16 = 1023;

/// a successfully decoded datagram
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Reading { node_id: String, value: u16 },
    /// a node echoing the reset broadcast; carries no reading
    ResetAck,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("payload is not valid utf-8")]
    NotUtf8,
    #[error("missing start marker")]
    MissingStart,
    #[error("missing end marker")]
    MissingEnd,
    #[error("missing separator")]
    MissingSeparator,
    #[error("more than one separator")]
    ExtraSeparator,
    #[error("empty node id")]
    EmptyNodeId,
    #[error("reading {0:?} is not an integer")]
    NotNumeric(String),
    #[error("reading {0} outside 0..=1023")]
    OutOfRange(i64),
}

/// decode a raw datagram payload
pub fn decode(payload: &[u8]) -> Result<Frame, FrameError> {
    let text = std::str::from_utf8(payload).map_err(|_| FrameError::NotUtf8)?;
    let interior = strip_markers(text)?;

    if interior == RESET_MARKER {
        return Ok(Frame::ResetAck);
    }

    let (node_id, raw) = interior
        .split_once(SEPARATOR)
        .ok_or(FrameError::MissingSeparator)?;
    if raw.contains(SEPARATOR) {
        return Err(FrameError::ExtraSeparator);
    }
    if node_id.is_empty() {
        return Err(FrameError::EmptyNodeId);
    }

    let raw = raw.trim();
    let parsed: i64 = raw
        .parse()
        .map_err(|_| FrameError::NotNumeric(raw.to_string()))?;
    let value = u16::try_from(parsed)
        .ok()
        .filter(|v| *v <= MAX_READING)
        .ok_or(FrameError::OutOfRange(parsed))?;

    Ok(Frame::Reading { node_id: node_id.to_string(), value })
}

/// encode a reading frame
#[cfg(test)]
pub fn encode_reading(node_id: &str, value: u16) -> Vec<u8> {
    format!("{START_MARKER}{node_id}{SEPARATOR}{value}{END_MARKER}").into_bytes()
}

fn strip_markers(text: &str) -> Result<&str, FrameError> {
    let rest = text.strip_prefix(START_MARKER).ok_or(FrameError::MissingStart)?;
    // "+++**" style payloads overlap the two markers; treat as no end marker
    rest.strip_suffix(END_MARKER).ok_or(FrameError::MissingEnd)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_reading() {
        assert_eq!(
            decode(b"+++A,100***"),
            Ok(Frame::Reading { node_id: "A".into(), value: 100 })
        );
        assert_eq!(
            decode(b"+++esp-32,1023***"),
            Ok(Frame::Reading { node_id: "esp-32".into(), value: 1023 })
        );
    }

    #[test]
    fn test_decode_reset_ack() {
        assert_eq!(decode(RESET_FRAME), Ok(Frame::ResetAck));
    }

    #[test]
    fn test_encode_matches_wire_format() {
        assert_eq!(encode_reading("B", 900), b"+++B,900***".to_vec());
        assert_eq!(
            decode(&encode_reading("B", 900)),
            Ok(Frame::Reading { node_id: "B".into(), value: 900 })
        );
    }

    #[test]
    fn test_malformed_frames() {
        assert_eq!(decode(b"A,100***"), Err(FrameError::MissingStart));
        assert_eq!(decode(b"+++A,100"), Err(FrameError::MissingEnd));
        assert_eq!(decode(b"+++A100***"), Err(FrameError::MissingSeparator));
        assert_eq!(decode(b"+++A,1,2***"), Err(FrameError::ExtraSeparator));
        assert_eq!(decode(b"+++,100***"), Err(FrameError::EmptyNodeId));
        assert_eq!(decode(b"+++A,abc***"), Err(FrameError::NotNumeric("abc".into())));
        assert_eq!(decode(b"+++A,***"), Err(FrameError::NotNumeric(String::new())));
        assert_eq!(decode(b"+++A,2000***"), Err(FrameError::OutOfRange(2000)));
        assert_eq!(decode(b"+++A,-5***"), Err(FrameError::OutOfRange(-5)));
        assert_eq!(decode(&[0x2b, 0x2b, 0x2b, 0xff, 0x2a, 0x2a, 0x2a]), Err(FrameError::NotUtf8));
    }

    #[test]
    fn test_markers_must_not_overlap() {
        assert_eq!(decode(b"+++**"), Err(FrameError::MissingEnd));
        assert_eq!(decode(b""), Err(FrameError::MissingStart));
    }

    #[test]
    fn test_reading_whitespace_is_tolerated() {
        assert_eq!(
            decode(b"+++A, 42 ***"),
            Ok(Frame::Reading { node_id: "A".into(), value: 42 })
        );
    }
}
