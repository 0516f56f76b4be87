//! WIRE: Agent Event Frames
//!
//! Typed frames exchanged between the streaming endpoint and its consumers,
//! the SSE codec that carries them, and the incremental parser that reads them back.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

pub mod codec;
pub mod parser;

pub use codec::{decode, encode, Decoded, SSE_DATA_PREFIX, SSE_LINE_DELIMITER};
pub use parser::{decode_stream, FrameParser};

/// Wire errors
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("◆ FRAME ENCODING FAILED: {0}")]
    Json(#[from] serde_json::Error),

    #[error("◆ MALFORMED FRAME: {0}")]
    Malformed(String),

    #[error("◆ TRANSPORT LOST: {0}")]
    Transport(String),

    #[error("◆ STREAM TRUNCATED: {0} BYTES UNTERMINATED")]
    Truncated(usize),
}

pub type Result<T> = std::result::Result<T, ProtocolError>;

/// One discrete unit of the stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    /// First frame of every stream
    Connected,
    /// Text fragment appended to the running output
    Token { token: String },
    /// A tool invocation began
    ToolStart {
        tool: String,
        #[serde(default)]
        input: Value,
    },
    /// The open tool invocation finished
    ToolEnd {
        tool: String,
        #[serde(default)]
        output: Value,
    },
    /// Terminal failure
    Error { error: String },
    /// Terminal success
    Done,
}

impl Frame {
    pub fn token(token: impl Into<String>) -> Self {
        Self::Token {
            token: token.into(),
        }
    }

    pub fn tool_start(tool: impl Into<String>, input: Value) -> Self {
        Self::ToolStart {
            tool: tool.into(),
            input,
        }
    }

    pub fn tool_end(tool: impl Into<String>, output: Value) -> Self {
        Self::ToolEnd {
            tool: tool.into(),
            output,
        }
    }

    pub fn error(error: impl Into<String>) -> Self {
        Self::Error {
            error: error.into(),
        }
    }

    pub fn kind(&self) -> FrameKind {
        match self {
            Self::Connected => FrameKind::Connected,
            Self::Token { .. } => FrameKind::Token,
            Self::ToolStart { .. } => FrameKind::ToolStart,
            Self::ToolEnd { .. } => FrameKind::ToolEnd,
            Self::Error { .. } => FrameKind::Error,
            Self::Done => FrameKind::Done,
        }
    }

    /// `done` and `error` end a stream
    pub fn is_terminal(&self) -> bool {
        self.kind().is_terminal()
    }
}

/// Frame discriminant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    Connected,
    Token,
    ToolStart,
    ToolEnd,
    Error,
    Done,
}

impl FrameKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Token => "token",
            Self::ToolStart => "tool_start",
            Self::ToolEnd => "tool_end",
            Self::Error => "error",
            Self::Done => "done",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error)
    }
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Conversation role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Prior conversation turn
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Body of `POST /api/chat/stream`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequestBody {
    /// History, oldest first, without the new message
    #[serde(default)]
    pub messages: Vec<ChatTurn>,
    pub new_message: String,
    pub chat_id: String,
}

impl ChatRequestBody {
    pub fn new(
        chat_id: impl Into<String>,
        messages: Vec<ChatTurn>,
        new_message: impl Into<String>,
    ) -> Self {
        Self {
            messages,
            new_message: new_message.into(),
            chat_id: chat_id.into(),
        }
    }

    /// History followed by the new user message
    pub fn conversation(&self) -> Vec<ChatTurn> {
        let mut turns = self.messages.clone();
        turns.push(ChatTurn::user(&self.new_message));
        turns
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_frame_wire_shape() {
        assert_eq!(
            serde_json::to_value(Frame::Connected).unwrap(),
            json!({"type": "connected"})
        );
        assert_eq!(
            serde_json::to_value(Frame::token("hi")).unwrap(),
            json!({"type": "token", "token": "hi"})
        );
        assert_eq!(
            serde_json::to_value(Frame::tool_start("search", json!({"q": "x"}))).unwrap(),
            json!({"type": "tool_start", "tool": "search", "input": {"q": "x"}})
        );
        assert_eq!(
            serde_json::to_value(Frame::tool_end("search", json!([1, 2]))).unwrap(),
            json!({"type": "tool_end", "tool": "search", "output": [1, 2]})
        );
        assert_eq!(
            serde_json::to_value(Frame::error("boom")).unwrap(),
            json!({"type": "error", "error": "boom"})
        );
        assert_eq!(
            serde_json::to_value(Frame::Done).unwrap(),
            json!({"type": "done"})
        );
    }

    #[test]
    fn test_missing_tool_payload_is_null() {
        let frame: Frame = serde_json::from_str(r#"{"type":"tool_start","tool":"t"}"#).unwrap();
        assert_eq!(frame, Frame::tool_start("t", Value::Null));

        let frame: Frame = serde_json::from_str(r#"{"type":"tool_end","tool":"t"}"#).unwrap();
        assert_eq!(frame, Frame::tool_end("t", Value::Null));
    }

    #[test]
    fn test_terminal_kinds() {
        assert!(Frame::Done.is_terminal());
        assert!(Frame::error("x").is_terminal());
        assert!(!Frame::Connected.is_terminal());
        assert!(!Frame::token("x").is_terminal());
        assert!(!Frame::tool_start("t", Value::Null).is_terminal());
        assert!(!Frame::tool_end("t", Value::Null).is_terminal());
        assert_eq!(FrameKind::ToolStart.to_string(), "tool_start");
    }

    #[test]
    fn test_request_body_camel_case() {
        let body: ChatRequestBody = serde_json::from_value(json!({
            "messages": [
                {"role": "user", "content": "hi"},
                {"role": "assistant", "content": "hello"}
            ],
            "newMessage": "how are you",
            "chatId": "chat-1"
        }))
        .unwrap();

        assert_eq!(body.chat_id, "chat-1");
        assert_eq!(body.messages.len(), 2);

        let conversation = body.conversation();
        assert_eq!(conversation.len(), 3);
        assert_eq!(conversation[2], ChatTurn::user("how are you"));
        assert_eq!(body.messages.len(), 2);
    }

    #[test]
    fn test_request_body_without_history() {
        let body: ChatRequestBody =
            serde_json::from_str(r#"{"newMessage":"hi","chatId":"c"}"#).unwrap();
        assert!(body.messages.is_empty());
        assert_eq!(body.conversation(), vec![ChatTurn::user("hi")]);
    }
}
