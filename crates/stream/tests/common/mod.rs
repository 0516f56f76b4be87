//! Shared helpers for stream integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use agentwire_protocol::{Frame, FrameParser};
use agentwire_stream::{FrameSink, SinkError};

/// Sink that keeps every record it accepts
#[derive(Clone, Default)]
pub struct RecordingSink {
    records: Arc<Mutex<Vec<Bytes>>>,
    closes: Arc<AtomicUsize>,
    disconnect_after: Option<usize>,
    fail_close: bool,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept `n` records, then behave as if the reader went away
    pub fn disconnecting_after(n: usize) -> Self {
        Self {
            disconnect_after: Some(n),
            ..Self::default()
        }
    }

    pub fn failing_close() -> Self {
        Self {
            fail_close: true,
            ..Self::default()
        }
    }

    pub fn records(&self) -> Vec<Bytes> {
        self.records.lock().unwrap().clone()
    }

    pub fn bytes(&self) -> Vec<u8> {
        self.records().iter().flat_map(|r| r.to_vec()).collect()
    }

    pub fn frames(&self) -> Vec<Frame> {
        let mut parser = FrameParser::new();
        parser
            .feed(&self.bytes())
            .into_iter()
            .map(|f| f.expect("Should decode recorded frame"))
            .collect()
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FrameSink for RecordingSink {
    async fn send(&mut self, record: Bytes) -> Result<(), SinkError> {
        let mut records = self.records.lock().unwrap();
        if let Some(limit) = self.disconnect_after {
            if records.len() >= limit {
                return Err(SinkError::Disconnected);
            }
        }
        records.push(record);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), SinkError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        if self.fail_close {
            return Err(SinkError::Disconnected);
        }
        Ok(())
    }
}

pub fn kinds(frames: &[Frame]) -> Vec<&'static str> {
    frames.iter().map(|f| f.kind().as_str()).collect()
}
