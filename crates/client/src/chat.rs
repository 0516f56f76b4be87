//! Chat turn driver with optimistic user messages

use chrono::{DateTime, Local};
use futures::{Stream, StreamExt};
use serde_json::json;
use std::fmt::Display;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use agentwire_protocol::{decode_stream, ChatRequestBody, ChatTurn, Role};
use agentwire_session::{MessageStore, StoredMessage};

use crate::reconcile::{Reconciler, ToolBlock, Transition};
use crate::{ClientError, Result};

/// User message shown before the server has confirmed it
#[derive(Debug, Clone, PartialEq)]
pub struct PendingMessage {
    pub id: String,
    pub chat_id: String,
    pub content: String,
    pub created_at: DateTime<Local>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    Pending(PendingMessage),
    Persisted(StoredMessage),
}

impl ClientMessage {
    pub fn id(&self) -> &str {
        match self {
            Self::Pending(m) => &m.id,
            Self::Persisted(m) => &m.id,
        }
    }

    pub fn role(&self) -> Role {
        match self {
            Self::Pending(_) => Role::User,
            Self::Persisted(m) => m.role,
        }
    }

    pub fn content(&self) -> &str {
        match self {
            Self::Pending(m) => &m.content,
            Self::Persisted(m) => &m.content,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending(_))
    }

    pub fn as_turn(&self) -> ChatTurn {
        ChatTurn {
            role: self.role(),
            content: self.content().to_string(),
        }
    }
}

/// A submitted turn awaiting its response stream
#[derive(Debug, Clone)]
pub struct PendingTurn {
    pub request: ChatRequestBody,
    pub optimistic_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    Completed { assistant: StoredMessage },
    /// `display` is the rendered failure block
    Failed { message: String, display: String },
}

/// Client-side view of one conversation
pub struct ChatSession {
    chat_id: String,
    store: Arc<dyn MessageStore>,
    messages: Vec<ClientMessage>,
    in_flight: bool,
    reconciler: Reconciler,
    failure: Option<String>,
}

impl ChatSession {
    /// Open a conversation with its persisted history
    pub async fn load(chat_id: impl Into<String>, store: Arc<dyn MessageStore>) -> Result<Self> {
        let chat_id = chat_id.into();
        let messages = store
            .list(&chat_id)
            .await?
            .into_iter()
            .map(ClientMessage::Persisted)
            .collect::<Vec<_>>();
        debug!("Loaded {} messages for {}", messages.len(), chat_id);

        Ok(Self {
            chat_id,
            store,
            messages,
            in_flight: false,
            reconciler: Reconciler::new(),
            failure: None,
        })
    }

    pub fn chat_id(&self) -> &str {
        &self.chat_id
    }

    pub fn messages(&self) -> &[ClientMessage] {
        &self.messages
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    /// Failure block of the last failed turn, if any
    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    /// Insert the optimistic user message and build the request for it
    pub fn submit(&mut self, input: &str) -> Result<PendingTurn> {
        let content = input.trim();
        if content.is_empty() {
            return Err(ClientError::EmptyMessage);
        }
        if self.in_flight {
            return Err(ClientError::TurnInFlight);
        }

        let history: Vec<ChatTurn> = self.messages.iter().map(ClientMessage::as_turn).collect();

        let now = Local::now();
        let pending = PendingMessage {
            id: format!("temp_{}", now.timestamp_millis()),
            chat_id: self.chat_id.clone(),
            content: content.to_string(),
            created_at: now,
        };
        let optimistic_id = pending.id.clone();
        self.messages.push(ClientMessage::Pending(pending));
        self.in_flight = true;
        self.failure = None;
        self.reconciler.reset();

        Ok(PendingTurn {
            request: ChatRequestBody::new(self.chat_id.clone(), history, content),
            optimistic_id,
        })
    }

    /// Drive a turn from the raw response body.
    ///
    /// `on_update` receives the rendered response after every visible change.
    pub async fn consume<S, B, E, F>(
        &mut self,
        turn: PendingTurn,
        chunks: S,
        mut on_update: F,
    ) -> TurnOutcome
    where
        S: Stream<Item = std::result::Result<B, E>>,
        B: AsRef<[u8]>,
        E: Display,
        F: FnMut(&str),
    {
        let frames = decode_stream(chunks);
        futures::pin_mut!(frames);

        let result = loop {
            let frame = match frames.next().await {
                Some(Ok(frame)) => frame,
                Some(Err(e)) => break Err(e.to_string()),
                None => break Err("stream ended before completion".to_string()),
            };

            match self.reconciler.apply(frame) {
                Ok(Transition::Connected) => debug!("◆ STREAM CONNECTED: {}", self.chat_id),
                Ok(Transition::Updated) => on_update(&self.reconciler.render()),
                Ok(Transition::Completed { text }) => break Ok(text),
                Ok(Transition::Failed { message }) => break Err(message),
                Err(e) => break Err(e.to_string()),
            }
        };

        match result {
            Ok(text) => self.finish(turn, text).await,
            Err(message) => self.abort(turn, message),
        }
    }

    async fn finish(&mut self, turn: PendingTurn, text: String) -> TurnOutcome {
        let assistant = match self.store.append_assistant(&self.chat_id, &text).await {
            Ok(message) => message,
            Err(e) => return self.abort(turn, e.to_string()),
        };
        self.in_flight = false;

        match self.store.list(&self.chat_id).await {
            Ok(persisted) => {
                self.messages = persisted.into_iter().map(ClientMessage::Persisted).collect();
            }
            Err(e) => {
                warn!("◆ HISTORY REFRESH FAILED: {}", e);
                self.messages.push(ClientMessage::Persisted(assistant.clone()));
            }
        }

        info!("◆ TURN COMPLETE: {} ({} chars)", self.chat_id, text.len());
        TurnOutcome::Completed { assistant }
    }

    /// Roll back the optimistic message and show the failure
    pub fn abort(&mut self, turn: PendingTurn, message: String) -> TurnOutcome {
        error!("◆ TURN FAILED: {}", message);
        self.messages
            .retain(|m| !(m.is_pending() && m.id() == turn.optimistic_id));
        self.in_flight = false;
        self.reconciler.reset();

        let display = failure_block(&message);
        self.failure = Some(display.clone());
        TurnOutcome::Failed { message, display }
    }
}

pub fn failure_block(message: &str) -> String {
    ToolBlock::finished("error", json!("Failed to process message"), json!(message)).render()
}
