//! Replayable engines for local serving and tests

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

use agentwire_protocol::{ChatTurn, Role};

use crate::{events, AgentEngine, EngineError, RawTraceEvent, Result, TraceStream};

/// One step of a recorded trace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScriptStep {
    /// Fail the trace at this point
    Fail { fail: String },
    Event(RawTraceEvent),
}

/// Replays a fixed trace for every submission
#[derive(Debug, Clone, Default)]
pub struct ScriptedEngine {
    steps: Vec<ScriptStep>,
    step_delay: Duration,
}

impl ScriptedEngine {
    pub fn new(steps: Vec<ScriptStep>) -> Self {
        Self {
            steps,
            step_delay: Duration::ZERO,
        }
    }

    pub fn from_events(events: Vec<RawTraceEvent>) -> Self {
        Self::new(events.into_iter().map(ScriptStep::Event).collect())
    }

    /// Pause before every step
    pub fn with_step_delay(mut self, delay: Duration) -> Self {
        self.step_delay = delay;
        self
    }

    /// Parse a JSON-lines script. Blank lines and `#` comments are ignored.
    pub fn parse(script: &str) -> Result<Self> {
        let mut steps = Vec::new();

        for (idx, line) in script.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let step = serde_json::from_str(line).map_err(|e| EngineError::Script {
                line: idx + 1,
                reason: e.to_string(),
            })?;
            steps.push(step);
        }

        Ok(Self::new(steps))
    }

    pub async fn load_from(path: &Path) -> Result<Self> {
        debug!("◆ LOADING TRACE SCRIPT FROM {:?}", path);
        let content = tokio::fs::read_to_string(path).await?;
        Self::parse(&content)
    }

    pub fn steps(&self) -> &[ScriptStep] {
        &self.steps
    }
}

#[async_trait]
impl AgentEngine for ScriptedEngine {
    async fn submit(&self, _conversation: Vec<ChatTurn>, chat_id: &str) -> Result<TraceStream> {
        debug!("◆ REPLAYING {} STEPS FOR {}", self.steps.len(), chat_id);
        Ok(replay(self.steps.clone(), self.step_delay))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

fn replay(steps: Vec<ScriptStep>, delay: Duration) -> TraceStream {
    let trace = futures::stream::iter(steps).then(move |step| async move {
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        match step {
            ScriptStep::Event(event) => Ok(event),
            ScriptStep::Fail { fail } => Err(EngineError::Trace(fail)),
        }
    });
    Box::pin(trace)
}

/// Streams the latest user message back word by word
#[derive(Debug, Clone, Default)]
pub struct EchoEngine {
    step_delay: Duration,
}

impl EchoEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_step_delay(mut self, delay: Duration) -> Self {
        self.step_delay = delay;
        self
    }
}

#[async_trait]
impl AgentEngine for EchoEngine {
    async fn submit(&self, conversation: Vec<ChatTurn>, chat_id: &str) -> Result<TraceStream> {
        let last = conversation
            .iter()
            .rev()
            .find(|turn| turn.role == Role::User)
            .ok_or_else(|| EngineError::Submit("conversation has no user message".into()))?;

        let mut steps: Vec<ScriptStep> = last
            .content
            .split_inclusive(' ')
            .map(|word| ScriptStep::Event(RawTraceEvent::model_token(word)))
            .collect();
        steps.push(ScriptStep::Event(RawTraceEvent::new(
            events::CHAIN_END,
            Some("echo".into()),
            json!({}),
        )));

        debug!("◆ ECHOING {} STEPS FOR {}", steps.len(), chat_id);
        Ok(replay(steps, self.step_delay))
    }

    fn name(&self) -> &str {
        "echo"
    }
}
