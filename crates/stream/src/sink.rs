//! Outbound byte channel

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::convert::Infallible;
use thiserror::Error;
use tokio::sync::mpsc;

/// Sink errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SinkError {
    #[error("◆ RECEIVER DISCONNECTED")]
    Disconnected,

    #[error("◆ SINK ALREADY CLOSED")]
    Closed,
}

/// Destination for encoded frames.
///
/// `send` suspends while the transport is saturated and fails fast once the
/// reading side is gone.
#[async_trait]
pub trait FrameSink: Send {
    async fn send(&mut self, record: Bytes) -> Result<(), SinkError>;

    async fn close(&mut self) -> Result<(), SinkError>;
}

/// Sink backed by a bounded tokio channel
#[derive(Debug)]
pub struct ChannelSink {
    tx: Option<mpsc::Sender<Bytes>>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<Bytes>) -> Self {
        Self { tx: Some(tx) }
    }

    /// Bounded channel holding at most `capacity` undelivered records
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx), rx)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.as_ref().map(|tx| tx.is_closed()).unwrap_or(true)
    }
}

#[async_trait]
impl FrameSink for ChannelSink {
    async fn send(&mut self, record: Bytes) -> Result<(), SinkError> {
        let tx = self.tx.as_ref().ok_or(SinkError::Closed)?;
        tx.send(record).await.map_err(|_| SinkError::Disconnected)
    }

    async fn close(&mut self) -> Result<(), SinkError> {
        // Dropping the last sender ends the receiving stream.
        self.tx.take().map(drop).ok_or(SinkError::Closed)
    }
}

/// Adapt the receiving half into a response body stream.
pub fn body_stream(
    rx: mpsc::Receiver<Bytes>,
) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static {
    futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|record| (Ok(record), rx))
    })
}
