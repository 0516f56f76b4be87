//! Incremental frame parser

use futures::{Stream, StreamExt};
use std::collections::VecDeque;
use std::fmt::Display;
use tracing::{debug, trace};

use crate::codec::{decode_complete, find_delimiter, Decoded, SSE_LINE_DELIMITER};
use crate::{Frame, ProtocolError, Result};

const DELIMITER_LEN: usize = SSE_LINE_DELIMITER.len();

/// Accumulates transport reads and drains complete frames.
///
/// Works on raw bytes so a multi-byte character split across two reads is
/// reassembled before it is decoded.
#[derive(Debug, Default)]
pub struct FrameParser {
    buffer: Vec<u8>,
    /// Prefix of `buffer` already searched for a delimiter
    scanned: usize,
}

impl FrameParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one transport read and drain every complete record, in order.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Result<Frame>> {
        if chunk.is_empty() {
            return Vec::new();
        }

        self.buffer.extend_from_slice(chunk);
        let mut items = Vec::new();
        let mut start = 0;
        let mut from = self.scanned;

        while let Some(end) = find_delimiter(&self.buffer, from) {
            let next = end + DELIMITER_LEN;
            match decode_complete(&self.buffer[start..end], next - start) {
                Decoded::Frame { frame, .. } => {
                    trace!("◆ FRAME DECODED: {}", frame.kind());
                    items.push(Ok(frame));
                }
                Decoded::Invalid { reason, .. } => {
                    debug!("◆ INVALID RECORD: {}", reason);
                    items.push(Err(ProtocolError::Malformed(reason)));
                }
                Decoded::Skipped { .. } | Decoded::Incomplete => {}
            }
            start = next;
            from = next;
        }

        self.buffer.drain(..start);
        // The tail may hold the first half of a delimiter.
        self.scanned = self.buffer.len().saturating_sub(DELIMITER_LEN - 1);
        items
    }

    /// Decode a complete payload in one shot.
    pub fn parse_frames(input: &[u8]) -> Vec<Result<Frame>> {
        let mut parser = Self::new();
        parser.feed(input)
    }

    /// Bytes held back waiting for a delimiter
    pub fn pending_bytes(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty_buffer(&self) -> bool {
        self.buffer.iter().all(|b| b.is_ascii_whitespace())
    }

    /// Check the transport ended on a record boundary.
    pub fn finish(&self) -> Result<()> {
        if self.is_empty_buffer() {
            Ok(())
        } else {
            Err(ProtocolError::Truncated(self.buffer.len()))
        }
    }
}

struct DecodeState<S> {
    chunks: std::pin::Pin<Box<S>>,
    parser: FrameParser,
    ready: VecDeque<Result<Frame>>,
    finished: bool,
}

/// Turn a stream of transport reads into a lazy stream of frames.
///
/// A transport error or a truncated trailing record is yielded as a final
/// error item; the stream ends after the transport does.
pub fn decode_stream<S, B, E>(chunks: S) -> impl Stream<Item = Result<Frame>>
where
    S: Stream<Item = std::result::Result<B, E>>,
    B: AsRef<[u8]>,
    E: Display,
{
    let state = DecodeState {
        chunks: Box::pin(chunks),
        parser: FrameParser::new(),
        ready: VecDeque::new(),
        finished: false,
    };

    futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.ready.pop_front() {
                return Some((item, state));
            }
            if state.finished {
                return None;
            }

            match state.chunks.next().await {
                Some(Ok(chunk)) => {
                    let items = state.parser.feed(chunk.as_ref());
                    state.ready.extend(items);
                }
                Some(Err(e)) => {
                    state.finished = true;
                    state
                        .ready
                        .push_back(Err(ProtocolError::Transport(e.to_string())));
                }
                None => {
                    state.finished = true;
                    if let Err(e) = state.parser.finish() {
                        state.ready.push_back(Err(e));
                    }
                }
            }
        }
    })
}
