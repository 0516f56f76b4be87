//! Per-request streaming pipeline

use std::sync::Arc;
use tracing::info;

use agentwire_engine::AgentEngine;
use agentwire_protocol::ChatRequestBody;

use crate::normalize::EventNormalizer;
use crate::sink::FrameSink;
use crate::writer::{StreamOutcome, StreamWriter};

/// Engine → normalizer → writer, for one request at a time
#[derive(Clone)]
pub struct ChatPipeline {
    engine: Arc<dyn AgentEngine>,
    normalizer: EventNormalizer,
}

impl ChatPipeline {
    pub fn new(engine: Arc<dyn AgentEngine>, normalizer: EventNormalizer) -> Self {
        Self { engine, normalizer }
    }

    /// Stream one request into `sink`.
    ///
    /// Once `connected` is written every failure, including a rejected
    /// submission, is reported through the `error` frame. The sink is closed
    /// on every path.
    pub async fn run<S: FrameSink>(&self, request: &ChatRequestBody, sink: S) -> StreamOutcome {
        info!(
            "◆ STREAM OPEN: chat {} via {} ({} prior turns)",
            request.chat_id,
            self.engine.name(),
            request.messages.len()
        );

        let mut writer = StreamWriter::new(sink);
        let outcome = match writer.start().await {
            Err(e) => writer.abandon(e),
            Ok(()) => {
                match self
                    .engine
                    .submit(request.conversation(), &request.chat_id)
                    .await
                {
                    Ok(trace) => writer.forward(self.normalizer.normalize_stream(trace)).await,
                    Err(e) => writer.fail(e.to_string()).await,
                }
            }
        };
        writer.close().await;

        info!("◆ STREAM CLOSED: chat {} ({:?})", request.chat_id, outcome);
        outcome
    }
}
