//! Trace event normalization

use futures::{future, Stream, TryStreamExt};
use serde_json::{Map, Value};
use tracing::trace;

use agentwire_engine::{events, RawTraceEvent, TraceStream};
use agentwire_protocol::Frame;

use crate::{Result, StreamError};

pub const DEFAULT_TOP_LEVEL_AGENT: &str = "agent";
pub const DEFAULT_TOOL_NAME: &str = "unknown";

/// A raw trace event projected onto the categories the stream understands
#[derive(Debug, Clone, PartialEq)]
pub enum TraceEvent {
    ModelToken {
        text: String,
    },
    ToolStarted {
        tool: Option<String>,
        input: Value,
    },
    ToolEnded {
        tool: Option<String>,
        output: Value,
    },
    ChainCompleted {
        chain: Option<String>,
        final_text: Option<String>,
    },
    Ignored {
        event: String,
    },
}

impl TraceEvent {
    /// Classify a raw event. Recognized categories with a payload of the wrong
    /// shape are an error; unknown categories are `Ignored`.
    pub fn classify(raw: &RawTraceEvent) -> Result<Self> {
        let category = raw.event.as_str();
        match category {
            events::CHAT_MODEL_STREAM => {
                let data = payload(raw)?;
                Ok(Self::ModelToken {
                    text: chunk_text(data.and_then(|d| d.get("chunk")), category)?,
                })
            }
            events::TOOL_START => {
                let data = payload(raw)?;
                Ok(Self::ToolStarted {
                    tool: non_empty(raw.name.as_deref()),
                    input: field(data, "input"),
                })
            }
            events::TOOL_END => {
                let data = payload(raw)?;
                let output = field(data, "output");
                let tool = output_tool_name(&output).or_else(|| non_empty(raw.name.as_deref()));
                Ok(Self::ToolEnded { tool, output })
            }
            events::CHAIN_END => {
                let data = payload(raw)?;
                Ok(Self::ChainCompleted {
                    chain: raw.name.clone(),
                    final_text: final_message_text(data.and_then(|d| d.get("output"))),
                })
            }
            other => Ok(Self::Ignored {
                event: other.to_string(),
            }),
        }
    }
}

fn payload(raw: &RawTraceEvent) -> Result<Option<&Map<String, Value>>> {
    match &raw.data {
        Value::Null => Ok(None),
        Value::Object(map) => Ok(Some(map)),
        other => Err(StreamError::Shape {
            category: raw.event.clone(),
            reason: format!("expected an object payload, got {}", type_name(other)),
        }),
    }
}

fn field(data: Option<&Map<String, Value>>, key: &str) -> Value {
    data.and_then(|d| d.get(key)).cloned().unwrap_or(Value::Null)
}

fn non_empty(name: Option<&str>) -> Option<String> {
    name.filter(|n| !n.is_empty()).map(ToString::to_string)
}

/// Text of a streamed chunk: either plain string content or the first content block.
fn chunk_text(chunk: Option<&Value>, category: &str) -> Result<String> {
    let content = match chunk.and_then(|c| c.get("content")) {
        Some(content) => content,
        None => return Ok(String::new()),
    };

    match content {
        Value::Null => Ok(String::new()),
        Value::String(text) => Ok(text.clone()),
        Value::Array(blocks) => Ok(blocks
            .first()
            .and_then(|block| match block {
                Value::String(text) => Some(text.as_str()),
                other => other.get("text").and_then(Value::as_str),
            })
            .unwrap_or_default()
            .to_string()),
        other => Err(StreamError::Shape {
            category: category.to_string(),
            reason: format!("chunk content must be text or blocks, got {}", type_name(other)),
        }),
    }
}

/// Tool name carried by a tool result message, serialized or constructor form.
fn output_tool_name(output: &Value) -> Option<String> {
    let name = output
        .get("name")
        .and_then(Value::as_str)
        .or_else(|| {
            output
                .get("kwargs")
                .and_then(|kwargs| kwargs.get("name"))
                .and_then(Value::as_str)
        });
    non_empty(name)
}

fn final_message_text(output: Option<&Value>) -> Option<String> {
    let last = output?.get("messages")?.as_array()?.last()?;
    last.get("content")
        .or_else(|| last.get("kwargs").and_then(|kwargs| kwargs.get("content")))
        .and_then(Value::as_str)
        .map(ToString::to_string)
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Maps trace events onto protocol frames, one event at a time
#[derive(Debug, Clone)]
pub struct EventNormalizer {
    top_level_agent: String,
    default_tool_name: String,
}

impl Default for EventNormalizer {
    fn default() -> Self {
        Self::new(DEFAULT_TOP_LEVEL_AGENT, DEFAULT_TOOL_NAME)
    }
}

impl EventNormalizer {
    pub fn new(top_level_agent: impl Into<String>, default_tool_name: impl Into<String>) -> Self {
        Self {
            top_level_agent: top_level_agent.into(),
            default_tool_name: default_tool_name.into(),
        }
    }

    /// Zero or one frame for a raw event
    pub fn normalize(&self, raw: &RawTraceEvent) -> Result<Option<Frame>> {
        let event = TraceEvent::classify(raw)?;
        Ok(self.frame_for(event))
    }

    pub fn frame_for(&self, event: TraceEvent) -> Option<Frame> {
        match event {
            TraceEvent::ModelToken { text } if !text.is_empty() => Some(Frame::token(text)),
            TraceEvent::ModelToken { .. } => None,
            TraceEvent::ToolStarted { tool, input } => Some(Frame::tool_start(
                tool.unwrap_or_else(|| self.default_tool_name.clone()),
                input,
            )),
            TraceEvent::ToolEnded { tool, output } => Some(Frame::tool_end(
                tool.unwrap_or_else(|| self.default_tool_name.clone()),
                output,
            )),
            // Agents that compose a final answer instead of streaming it
            TraceEvent::ChainCompleted {
                chain: Some(chain),
                final_text: Some(text),
            } if chain == self.top_level_agent && !text.is_empty() => Some(Frame::token(text)),
            TraceEvent::ChainCompleted { .. } => None,
            TraceEvent::Ignored { event } => {
                trace!("◆ IGNORING TRACE EVENT {}", event);
                None
            }
        }
    }

    /// Lazily normalize a whole trace, preserving order.
    ///
    /// Engine failures and malformed events are yielded as error items; the
    /// consumer decides whether to keep pulling.
    pub fn normalize_stream(&self, trace: TraceStream) -> impl Stream<Item = Result<Frame>> + Send {
        let normalizer = self.clone();
        trace
            .map_err(StreamError::from)
            .try_filter_map(move |raw| future::ready(normalizer.normalize(&raw)))
    }
}
