//! RELAY: Agent Event Streaming
//!
//! Producer side of the wire: execution traces are normalized into frames and
//! written, in order, to a single outbound sink per request.

use thiserror::Error;

use agentwire_engine::EngineError;
use agentwire_protocol::ProtocolError;

pub mod normalize;
pub mod pipeline;
pub mod sink;
pub mod writer;

pub use normalize::{EventNormalizer, TraceEvent};
pub use pipeline::ChatPipeline;
pub use sink::{body_stream, ChannelSink, FrameSink, SinkError};
pub use writer::{StreamOutcome, StreamWriter};

/// Streaming errors
#[derive(Error, Debug)]
pub enum StreamError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("malformed {category} event: {reason}")]
    Shape {
        category: String,
        reason: String,
    },

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error("◆ STREAM ALREADY STARTED")]
    AlreadyStarted,

    #[error("◆ STREAM NOT STARTED")]
    NotStarted,

    #[error("◆ STREAM ALREADY TERMINATED")]
    Terminated,
}

pub type Result<T> = std::result::Result<T, StreamError>;
