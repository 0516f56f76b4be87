//! Frame writer: one sink, one stream, one terminal frame

use futures::{Stream, StreamExt};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use tracing::{debug, error, info, warn};

use agentwire_protocol::{encode, Frame};

use crate::sink::FrameSink;
use crate::{Result, StreamError};

/// How a stream ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamOutcome {
    /// `done` was written
    Completed { frames: usize },
    /// `error` was written
    Failed { message: String },
    /// The reading side went away; no terminal frame could be delivered
    Disconnected { reason: String },
}

impl StreamOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Fresh,
    Open,
    Terminated,
}

/// Owns the outbound sink for one request.
///
/// Guarantees `connected` first, at most one terminal frame, nothing after it,
/// and a single close through [`StreamWriter::close`], which consumes the writer.
pub struct StreamWriter<S: FrameSink> {
    sink: S,
    phase: Phase,
    frames_written: usize,
}

impl<S: FrameSink> StreamWriter<S> {
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            phase: Phase::Fresh,
            frames_written: 0,
        }
    }

    pub fn frames_written(&self) -> usize {
        self.frames_written
    }

    pub fn is_terminated(&self) -> bool {
        self.phase == Phase::Terminated
    }

    /// Write the `connected` frame
    pub async fn start(&mut self) -> Result<()> {
        if self.phase != Phase::Fresh {
            return Err(StreamError::AlreadyStarted);
        }
        self.write(&Frame::Connected).await?;
        self.phase = Phase::Open;
        Ok(())
    }

    async fn write(&mut self, frame: &Frame) -> Result<()> {
        let record = encode(frame)?;
        self.sink.send(record).await?;
        self.frames_written += 1;
        debug!("◆ FRAME #{} {}", self.frames_written, frame.kind());
        Ok(())
    }

    async fn write_open(&mut self, frame: &Frame) -> Result<()> {
        match self.phase {
            Phase::Fresh => Err(StreamError::NotStarted),
            Phase::Open => self.write(frame).await,
            Phase::Terminated => Err(StreamError::Terminated),
        }
    }

    /// Write frames as the source yields them, then exactly one terminal frame.
    ///
    /// The first source error, or a panic while polling the source, becomes
    /// the `error` frame and the source is not polled again. A failed write
    /// stops the loop without a terminal frame.
    pub async fn forward<St>(&mut self, frames: St) -> StreamOutcome
    where
        St: Stream<Item = Result<Frame>>,
    {
        let frames = AssertUnwindSafe(frames).catch_unwind();
        futures::pin_mut!(frames);

        while let Some(next) = frames.next().await {
            let next = match next {
                Ok(next) => next,
                Err(panic) => return self.fail(panic_message(panic.as_ref())).await,
            };
            match next {
                Ok(frame) if frame.is_terminal() || frame == Frame::Connected => {
                    warn!("◆ DROPPING CONTROL FRAME {} FROM SOURCE", frame.kind());
                }
                Ok(frame) => {
                    if let Err(e) = self.write_open(&frame).await {
                        return self.abandon(e);
                    }
                }
                Err(e) => return self.fail(e.to_string()).await,
            }
        }

        self.complete().await
    }

    /// Terminate with an `error` frame
    pub async fn fail(&mut self, message: impl Into<String>) -> StreamOutcome {
        let message = message.into();
        error!("◆ STREAM FAILED: {}", message);

        match self.write_open(&Frame::error(message.clone())).await {
            Ok(()) => {
                self.phase = Phase::Terminated;
                StreamOutcome::Failed { message }
            }
            Err(e) => self.abandon(e),
        }
    }

    /// Terminate with a `done` frame
    pub async fn complete(&mut self) -> StreamOutcome {
        match self.write_open(&Frame::Done).await {
            Ok(()) => {
                self.phase = Phase::Terminated;
                info!("◆ STREAM COMPLETE ({} frames)", self.frames_written);
                StreamOutcome::Completed {
                    frames: self.frames_written,
                }
            }
            Err(e) => self.abandon(e),
        }
    }

    pub(crate) fn abandon(&mut self, e: StreamError) -> StreamOutcome {
        warn!("◆ STREAM ABANDONED: {}", e);
        if self.phase == Phase::Open {
            self.phase = Phase::Terminated;
        }
        StreamOutcome::Disconnected {
            reason: e.to_string(),
        }
    }

    /// Close the sink. Failures are logged, never raised.
    pub async fn close(mut self) {
        if let Err(e) = self.sink.close().await {
            warn!("◆ ERROR CLOSING STREAM: {}", e);
        }
    }

    /// Run a whole stream: `connected`, the source, a terminal frame, close.
    pub async fn run<St>(sink: S, frames: St) -> StreamOutcome
    where
        St: Stream<Item = Result<Frame>>,
    {
        let mut writer = Self::new(sink);
        let outcome = match writer.start().await {
            Ok(()) => writer.forward(frames).await,
            Err(e) => writer.abandon(e),
        };
        writer.close().await;
        outcome
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    let detail = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    format!("agent trace panicked: {}", detail)
}
