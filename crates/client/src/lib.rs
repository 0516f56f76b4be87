//! CONSOLE: Stream Consumer
//!
//! Client side of the wire: opens a chat stream, reconciles its frames into a
//! progressively rendered response and keeps the conversation in sync with the
//! message store.

use thiserror::Error;

use agentwire_protocol::ProtocolError;
use agentwire_session::SessionError;

pub mod chat;
pub mod http;
pub mod reconcile;

pub use chat::{failure_block, ChatSession, ClientMessage, PendingMessage, PendingTurn, TurnOutcome};
pub use http::StreamClient;
pub use reconcile::{
    OpenTool, Phase, ReconcileError, Reconciler, Segment, ToolBlock, ToolOutput, Transition,
};

/// Client errors
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("◆ EMPTY MESSAGE")]
    EmptyMessage,

    #[error("◆ A TURN IS ALREADY IN FLIGHT")]
    TurnInFlight,

    #[error("◆ SERVER REJECTED REQUEST ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("◆ HTTP ERROR: {0}")]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Reconcile(#[from] ReconcileError),

    #[error(transparent)]
    Store(#[from] SessionError),
}

pub type Result<T> = std::result::Result<T, ClientError>;
