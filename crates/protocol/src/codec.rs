//! SSE framing: `data: <json>\n\n`

use bytes::Bytes;
use tracing::trace;

use crate::{Frame, Result};

/// Prefix of every data line
pub const SSE_DATA_PREFIX: &str = "data: ";

/// Record terminator
pub const SSE_LINE_DELIMITER: &str = "\n\n";

/// Result of decoding the head of a buffer
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    /// A full record holding a frame
    Frame { frame: Frame, consumed: usize },
    /// A full record with no data line (comment, keep-alive)
    Skipped { consumed: usize },
    /// A full record whose payload is not a frame
    Invalid { consumed: usize, reason: String },
    /// No record terminator yet
    Incomplete,
}

impl Decoded {
    /// Bytes taken from the front of the buffer
    pub fn consumed(&self) -> usize {
        match self {
            Self::Frame { consumed, .. }
            | Self::Skipped { consumed }
            | Self::Invalid { consumed, .. } => *consumed,
            Self::Incomplete => 0,
        }
    }
}

/// Serialize a frame into one SSE record.
///
/// Compact JSON escapes control characters inside strings, so the record
/// delimiter can only ever appear at the end of the record.
pub fn encode(frame: &Frame) -> Result<Bytes> {
    let json = serde_json::to_string(frame)?;
    let mut record =
        String::with_capacity(SSE_DATA_PREFIX.len() + json.len() + SSE_LINE_DELIMITER.len());
    record.push_str(SSE_DATA_PREFIX);
    record.push_str(&json);
    record.push_str(SSE_LINE_DELIMITER);
    Ok(Bytes::from(record))
}

/// Decode the first record of `buf`.
///
/// Never fails: a buffer without a terminator is `Incomplete` so callers can
/// wait for more bytes.
pub fn decode(buf: &[u8]) -> Decoded {
    match find_delimiter(buf, 0) {
        Some(end) => decode_complete(&buf[..end], end + SSE_LINE_DELIMITER.len()),
        None => Decoded::Incomplete,
    }
}

pub(crate) fn find_delimiter(buf: &[u8], from: usize) -> Option<usize> {
    let delimiter = SSE_LINE_DELIMITER.as_bytes();
    if buf.len() < from + delimiter.len() {
        return None;
    }
    buf[from..]
        .windows(delimiter.len())
        .position(|window| window == delimiter)
        .map(|pos| from + pos)
}

pub(crate) fn decode_complete(record: &[u8], consumed: usize) -> Decoded {
    let text = match std::str::from_utf8(record) {
        Ok(text) => text,
        Err(e) => {
            return Decoded::Invalid {
                consumed,
                reason: format!("record is not UTF-8: {}", e),
            }
        }
    };

    let payload = match extract_data_payload(text) {
        Some(payload) => payload,
        None => {
            trace!("◆ SKIPPING RECORD WITHOUT DATA ({} bytes)", consumed);
            return Decoded::Skipped { consumed };
        }
    };

    match serde_json::from_str::<Frame>(&payload) {
        Ok(frame) => Decoded::Frame { frame, consumed },
        Err(e) => Decoded::Invalid {
            consumed,
            reason: format!("{}: {}", e, preview(&payload)),
        },
    }
}

fn extract_data_payload(record: &str) -> Option<String> {
    let data_lines: Vec<&str> = record
        .split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line))
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|value| value.strip_prefix(' ').unwrap_or(value))
        .collect();

    if data_lines.iter().all(|value| value.trim().is_empty()) {
        None
    } else {
        Some(data_lines.join("\n"))
    }
}

fn preview(payload: &str) -> String {
    const LIMIT: usize = 80;
    match payload.char_indices().nth(LIMIT) {
        Some((idx, _)) => format!("{}...", &payload[..idx]),
        None => payload.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn all_frames() -> Vec<Frame> {
        vec![
            Frame::Connected,
            Frame::token("Hello"),
            Frame::tool_start("search", json!({"q": "x"})),
            Frame::tool_end("search", json!({"r": [1, 2]})),
            Frame::error("engine exploded"),
            Frame::Done,
        ]
    }

    #[test]
    fn test_encode_layout() {
        let bytes = encode(&Frame::token("hi")).unwrap();
        assert_eq!(&bytes[..], b"data: {\"type\":\"token\",\"token\":\"hi\"}\n\n");
    }

    #[test]
    fn test_round_trip_every_kind() {
        for frame in all_frames() {
            let bytes = encode(&frame).unwrap();
            match decode(&bytes) {
                Decoded::Frame {
                    frame: decoded,
                    consumed,
                } => {
                    assert_eq!(decoded, frame);
                    assert_eq!(consumed, bytes.len());
                }
                other => panic!("expected frame, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_round_trip_delimiter_inside_strings() {
        let frames = vec![
            Frame::token("line one\n\nline two\n\n"),
            Frame::tool_start("grep", json!({"pattern": "\n\n", "note": "data: x\n\n"})),
            Frame::tool_end("grep", json!("a\r\n\r\nb")),
            Frame::error("failed:\n\ntrace"),
        ];

        for frame in frames {
            let bytes = encode(&frame).unwrap();
            let body = &bytes[..bytes.len() - SSE_LINE_DELIMITER.len()];
            assert!(find_delimiter(body, 0).is_none());
            assert_eq!(decode(&bytes), Decoded::Frame {
                frame,
                consumed: bytes.len()
            });
        }
    }

    #[test]
    fn test_decode_is_idempotent() {
        let bytes = encode(&Frame::token("same")).unwrap();
        assert_eq!(decode(&bytes), decode(&bytes));
    }

    #[test]
    fn test_decode_incomplete() {
        let bytes = encode(&Frame::token("partial")).unwrap();
        for cut in 0..bytes.len() {
            assert_eq!(decode(&bytes[..cut]), Decoded::Incomplete, "cut at {}", cut);
        }
    }

    #[test]
    fn test_decode_only_first_record() {
        let mut buf = encode(&Frame::Connected).unwrap().to_vec();
        let first_len = buf.len();
        buf.extend_from_slice(&encode(&Frame::Done).unwrap());

        assert_eq!(
            decode(&buf),
            Decoded::Frame {
                frame: Frame::Connected,
                consumed: first_len
            }
        );
    }

    #[test]
    fn test_decode_skips_comments() {
        assert_eq!(decode(b": keep-alive\n\n"), Decoded::Skipped { consumed: 14 });
        assert_eq!(decode(b"event: ping\n\n"), Decoded::Skipped { consumed: 13 });
    }

    #[test]
    fn test_decode_invalid_payload() {
        match decode(b"data: {not json}\n\n") {
            Decoded::Invalid { consumed, .. } => assert_eq!(consumed, 18),
            other => panic!("expected invalid, got {:?}", other),
        }
        match decode(b"data: {\"type\":\"teleport\"}\n\n") {
            Decoded::Invalid { reason, .. } => assert!(reason.contains("teleport")),
            other => panic!("expected invalid, got {:?}", other),
        }
    }

    fn frame_of(buf: &[u8]) -> Option<Frame> {
        match decode(buf) {
            Decoded::Frame { frame, .. } => Some(frame),
            _ => None,
        }
    }

    #[test]
    fn test_decode_prefix_without_space() {
        assert_eq!(frame_of(b"data:{\"type\":\"done\"}\n\n"), Some(Frame::Done));
    }

    #[test]
    fn test_decode_multiple_data_lines() {
        let record = b"data: {\"type\":\"token\",\ndata: \"token\":\"joined\"}\n\n";
        assert_eq!(frame_of(record), Some(Frame::token("joined")));
    }

    #[test]
    fn test_decode_garbage_records() {
        assert_eq!(frame_of(b"data: [DONE]\n\n"), None);
        assert_eq!(frame_of(&[0xff, 0xfe, b'\n', b'\n']), None);
        assert_eq!(frame_of(b"\n\n"), None);
    }
}
