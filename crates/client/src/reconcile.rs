//! Reconciliation of decoded frames into a displayable response

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use agentwire_protocol::{Frame, FrameKind};

/// Marker shown in place of a tool's output while it runs
pub const PENDING_MARKER: &str = "Processing...";

/// Protocol violations seen by the reconciler
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ReconcileError {
    #[error("◆ {0} FRAME AFTER STREAM ENDED")]
    AfterTerminal(FrameKind),

    #[error("◆ DUPLICATE CONNECTED FRAME")]
    DuplicateConnected,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutput {
    Pending,
    Ready(Value),
}

/// One tool invocation as shown to the user
#[derive(Debug, Clone, PartialEq)]
pub struct ToolBlock {
    pub tool: String,
    pub input: Value,
    pub output: ToolOutput,
}

impl ToolBlock {
    pub fn pending(tool: impl Into<String>, input: Value) -> Self {
        Self {
            tool: tool.into(),
            input,
            output: ToolOutput::Pending,
        }
    }

    pub fn finished(tool: impl Into<String>, input: Value, output: Value) -> Self {
        Self {
            tool: tool.into(),
            input,
            output: ToolOutput::Ready(output),
        }
    }

    pub fn is_pending(&self) -> bool {
        self.output == ToolOutput::Pending
    }

    /// Terminal-style block: `-START-`, `~/<tool>`, input, output, `--END--`
    pub fn render(&self) -> String {
        let output = match &self.output {
            ToolOutput::Pending => PENDING_MARKER.to_string(),
            ToolOutput::Ready(value) => display_value(value),
        };
        format!(
            "-START-\n~/{}\n$ Input\n{}\n$ Output\n{}\n--END--",
            self.tool,
            display_value(&self.input),
            output
        )
    }
}

/// Strings verbatim, everything else as pretty JSON
pub fn display_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Text(String),
    Tool(ToolBlock),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Connected,
    Streaming,
    Completed,
    Failed,
}

impl Phase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// The single in-flight tool invocation
#[derive(Debug, Clone, PartialEq)]
pub struct OpenTool {
    pub tool: String,
    pub input: Value,
    /// Index of its pending block in the segment list
    pub segment: usize,
}

/// What a frame did to the view
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Connected,
    /// Rendered text changed
    Updated,
    /// Final rendered text, handed out once for persistence
    Completed { text: String },
    Failed { message: String },
}

/// Turns a frame sequence into an ordered list of text and tool segments.
///
/// Frames are applied synchronously in arrival order. After a terminal frame
/// the reconciler refuses further frames until [`Reconciler::reset`].
#[derive(Debug, Clone)]
pub struct Reconciler {
    phase: Phase,
    segments: Vec<Segment>,
    open_tool: Option<OpenTool>,
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::new()
    }
}

impl Reconciler {
    pub fn new() -> Self {
        Self {
            phase: Phase::Idle,
            segments: Vec::new(),
            open_tool: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn open_tool(&self) -> Option<&OpenTool> {
        self.open_tool.as_ref()
    }

    pub fn apply(&mut self, frame: Frame) -> Result<Transition, ReconcileError> {
        if self.phase.is_terminal() {
            return Err(ReconcileError::AfterTerminal(frame.kind()));
        }

        match frame {
            Frame::Connected => {
                if self.phase != Phase::Idle {
                    return Err(ReconcileError::DuplicateConnected);
                }
                self.phase = Phase::Connected;
                Ok(Transition::Connected)
            }
            Frame::Token { token } => {
                self.phase = Phase::Streaming;
                self.push_text(&token);
                Ok(Transition::Updated)
            }
            Frame::ToolStart { tool, input } => {
                self.phase = Phase::Streaming;
                if let Some(previous) = self.open_tool.take() {
                    warn!("◆ TOOL {} STILL OPEN WHEN {} STARTED", previous.tool, tool);
                }
                let segment = self.segments.len();
                self.segments
                    .push(Segment::Tool(ToolBlock::pending(tool.clone(), input.clone())));
                self.open_tool = Some(OpenTool {
                    tool,
                    input,
                    segment,
                });
                Ok(Transition::Updated)
            }
            Frame::ToolEnd { tool, output } => {
                self.phase = Phase::Streaming;
                match self.open_tool.take() {
                    Some(open) => {
                        self.segments[open.segment] =
                            Segment::Tool(ToolBlock::finished(open.tool, open.input, output));
                    }
                    None => {
                        debug!("◆ TOOL END FOR {} WITHOUT START", tool);
                        self.segments
                            .push(Segment::Tool(ToolBlock::finished(tool, Value::Null, output)));
                    }
                }
                Ok(Transition::Updated)
            }
            Frame::Error { error } => {
                self.phase = Phase::Failed;
                self.clear();
                Ok(Transition::Failed { message: error })
            }
            Frame::Done => {
                self.phase = Phase::Completed;
                let text = self.render();
                self.clear();
                Ok(Transition::Completed { text })
            }
        }
    }

    fn push_text(&mut self, token: &str) {
        match self.segments.last_mut() {
            Some(Segment::Text(text)) => text.push_str(token),
            _ => self.segments.push(Segment::Text(token.to_string())),
        }
    }

    fn clear(&mut self) {
        self.segments.clear();
        self.open_tool = None;
    }

    /// Display text of the current buffer
    pub fn render(&self) -> String {
        self.segments
            .iter()
            .map(|segment| match segment {
                Segment::Text(text) => text.clone(),
                Segment::Tool(block) => block.render(),
            })
            .collect()
    }

    /// Back to `Idle` with an empty buffer
    pub fn reset(&mut self) {
        self.phase = Phase::Idle;
        self.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn replay(frames: &[Frame]) -> (Reconciler, Vec<Transition>) {
        let mut reconciler = Reconciler::new();
        let transitions = frames
            .iter()
            .cloned()
            .map(|f| reconciler.apply(f).expect("Should apply"))
            .collect();
        (reconciler, transitions)
    }

    #[test]
    fn test_tokens_accumulate() {
        let (reconciler, transitions) = replay(&[
            Frame::Connected,
            Frame::token("Hello"),
            Frame::token(" world"),
        ]);
        assert_eq!(reconciler.phase(), Phase::Streaming);
        assert_eq!(reconciler.render(), "Hello world");
        assert_eq!(reconciler.segments().len(), 1);
        assert_eq!(transitions[0], Transition::Connected);
    }

    #[test]
    fn test_token_scenario_completes_once() {
        let (reconciler, transitions) = replay(&[
            Frame::Connected,
            Frame::token("Hello"),
            Frame::token(" world"),
            Frame::Done,
        ]);
        assert_eq!(
            transitions.last(),
            Some(&Transition::Completed {
                text: "Hello world".into()
            })
        );
        assert_eq!(reconciler.phase(), Phase::Completed);
        assert!(reconciler.segments().is_empty());
    }

    #[test]
    fn test_tool_block_matching() {
        let (reconciler, _) = replay(&[
            Frame::Connected,
            Frame::tool_start("x", json!({"a": 1})),
            Frame::token("partial..."),
            Frame::tool_end("x", json!("out")),
        ]);

        let blocks: Vec<&ToolBlock> = reconciler
            .segments()
            .iter()
            .filter_map(|s| match s {
                Segment::Tool(block) => Some(block),
                Segment::Text(_) => None,
            })
            .collect();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0], &ToolBlock::finished("x", json!({"a": 1}), json!("out")));
        assert!(reconciler.open_tool().is_none());
        assert!(!reconciler.render().contains(PENDING_MARKER));
        assert!(reconciler.render().ends_with("--END--partial..."));
    }

    #[test]
    fn test_pending_block_rendering() {
        let mut reconciler = Reconciler::new();
        reconciler.apply(Frame::Connected).unwrap();
        reconciler
            .apply(Frame::tool_start("search", json!({"q": "x"})))
            .unwrap();

        assert_eq!(
            reconciler.render(),
            "-START-\n~/search\n$ Input\n{\n  \"q\": \"x\"\n}\n$ Output\nProcessing...\n--END--"
        );
        assert_eq!(reconciler.open_tool().map(|t| t.segment), Some(0));
    }

    #[test]
    fn test_unmatched_tool_end_appends() {
        let (reconciler, _) = replay(&[
            Frame::Connected,
            Frame::token("a"),
            Frame::tool_end("ghost", json!("boo")),
        ]);
        assert_eq!(
            reconciler.segments(),
            &[
                Segment::Text("a".into()),
                Segment::Tool(ToolBlock::finished("ghost", Value::Null, json!("boo"))),
            ]
        );
    }

    #[test]
    fn test_overlapping_tool_start_moves_slot() {
        let (reconciler, _) = replay(&[
            Frame::Connected,
            Frame::tool_start("first", json!(1)),
            Frame::tool_start("second", json!(2)),
            Frame::tool_end("second", json!(3)),
        ]);
        assert_eq!(
            reconciler.segments(),
            &[
                Segment::Tool(ToolBlock::pending("first", json!(1))),
                Segment::Tool(ToolBlock::finished("second", json!(2), json!(3))),
            ]
        );
    }

    #[test]
    fn test_error_discards_buffer() {
        let (reconciler, transitions) = replay(&[
            Frame::Connected,
            Frame::token("half"),
            Frame::error("boom"),
        ]);
        assert_eq!(
            transitions.last(),
            Some(&Transition::Failed {
                message: "boom".into()
            })
        );
        assert_eq!(reconciler.phase(), Phase::Failed);
        assert_eq!(reconciler.render(), "");
    }

    #[test]
    fn test_frames_after_terminal_are_rejected() {
        let (mut reconciler, _) = replay(&[Frame::Connected, Frame::Done]);
        assert_eq!(
            reconciler.apply(Frame::token("late")),
            Err(ReconcileError::AfterTerminal(FrameKind::Token))
        );
        assert_eq!(reconciler.phase(), Phase::Completed);

        reconciler.reset();
        assert_eq!(reconciler.phase(), Phase::Idle);
        assert!(reconciler.apply(Frame::Connected).is_ok());
    }

    #[test]
    fn test_duplicate_connected_is_rejected() {
        let (mut reconciler, _) = replay(&[Frame::Connected, Frame::token("a")]);
        assert_eq!(
            reconciler.apply(Frame::Connected),
            Err(ReconcileError::DuplicateConnected)
        );
        assert_eq!(reconciler.render(), "a");
    }

    #[test]
    fn test_replay_is_idempotent() {
        let frames = vec![
            Frame::Connected,
            Frame::token("Look: "),
            Frame::tool_start("calc", json!({"expr": "1+1"})),
            Frame::tool_end("calc", json!(2)),
            Frame::token(" done"),
        ];
        let (first, _) = replay(&frames);
        let (second, _) = replay(&frames);
        assert_eq!(first.render(), second.render());
        assert_eq!(first.segments(), second.segments());
    }
}
