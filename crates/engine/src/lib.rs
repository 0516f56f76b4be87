//! ENGINE: Agent Execution Seam
//!
//! The agent runtime is opaque to the streaming core. It accepts a conversation
//! and answers with an asynchronous trace of loosely-typed execution events.

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::pin::Pin;
use thiserror::Error;

use agentwire_protocol::ChatTurn;

pub mod scripted;

pub use scripted::{EchoEngine, ScriptStep, ScriptedEngine};

/// Engine errors
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("engine rejected submission: {0}")]
    Submit(String),

    /// Mid-trace failure, reported verbatim to the client
    #[error("{0}")]
    Trace(String),

    #[error("◆ SCRIPT ERROR AT LINE {line}: {reason}")]
    Script { line: usize, reason: String },

    #[error("◆ SCRIPT IO ERROR: {0}")]
    Io(#[from] std::io::Error),

    #[error("◆ TRACE DECODE ERROR: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;

/// Event category names emitted by the runtime
pub mod events {
    pub const CHAT_MODEL_STREAM: &str = "on_chat_model_stream";
    pub const TOOL_START: &str = "on_tool_start";
    pub const TOOL_END: &str = "on_tool_end";
    pub const CHAIN_END: &str = "on_chain_end";
}

/// One raw execution event, exactly as the runtime reports it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawTraceEvent {
    /// Category, e.g. `on_tool_start`
    pub event: String,
    /// Runnable name (tool or chain)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Category-specific payload
    #[serde(default)]
    pub data: Value,
}

impl RawTraceEvent {
    pub fn new(event: impl Into<String>, name: Option<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            name,
            data,
        }
    }

    /// Streamed model chunk carrying a single text block
    pub fn model_token(text: impl Into<String>) -> Self {
        Self::new(
            events::CHAT_MODEL_STREAM,
            None,
            json!({ "chunk": { "content": [{ "type": "text", "text": text.into() }] } }),
        )
    }

    pub fn tool_start(tool: impl Into<String>, input: Value) -> Self {
        Self::new(events::TOOL_START, Some(tool.into()), json!({ "input": input }))
    }

    pub fn tool_end(tool: impl Into<String>, output: Value) -> Self {
        Self::new(events::TOOL_END, Some(tool.into()), json!({ "output": output }))
    }

    /// Chain completion whose last message has string content
    pub fn chain_end(chain: impl Into<String>, final_text: impl Into<String>) -> Self {
        Self::new(
            events::CHAIN_END,
            Some(chain.into()),
            json!({ "output": { "messages": [{ "content": final_text.into() }] } }),
        )
    }
}

/// Asynchronous execution trace for one submission
pub type TraceStream = Pin<Box<dyn Stream<Item = Result<RawTraceEvent>> + Send>>;

/// Agent runtime
#[async_trait]
pub trait AgentEngine: Send + Sync {
    /// Start executing a conversation and return its trace
    async fn submit(&self, conversation: Vec<ChatTurn>, chat_id: &str) -> Result<TraceStream>;

    fn name(&self) -> &str;
}
