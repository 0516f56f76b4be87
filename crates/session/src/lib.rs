//! Message persistence for chat conversations

use async_trait::async_trait;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use agentwire_protocol::{ChatTurn, Role};

/// Default maximum number of messages kept per conversation
pub const DEFAULT_MAX_MESSAGES: usize = 100;

/// Store errors
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("◆ INVALID CHAT ID: {0:?}")]
    InvalidChatId(String),

    #[error("◆ STORE IO ERROR: {0}")]
    Io(#[from] std::io::Error),

    #[error("◆ STORE DECODE ERROR: {0}")]
    Json(#[from] serde_json::Error),

    #[error("◆ FILE {path:?} HOLDS CHAT {found:?}, EXPECTED {expected:?}")]
    ChatMismatch {
        path: PathBuf,
        expected: String,
        found: String,
    },
}

pub type Result<T> = std::result::Result<T, SessionError>;

/// A persisted chat message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: String,
    pub chat_id: String,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Local>,
}

impl StoredMessage {
    pub fn new(chat_id: impl Into<String>, role: Role, content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            chat_id: chat_id.into(),
            role,
            content: content.into(),
            created_at: Local::now(),
        }
    }

    pub fn as_turn(&self) -> ChatTurn {
        ChatTurn {
            role: self.role,
            content: self.content.clone(),
        }
    }
}

/// Persistence collaborator for the chat pipeline
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist the user's message before its response is streamed
    async fn append_user(&self, chat_id: &str, content: &str) -> Result<StoredMessage>;

    /// Persist a completed assistant response
    async fn append_assistant(&self, chat_id: &str, content: &str) -> Result<StoredMessage>;

    /// All messages of a chat, oldest first
    async fn list(&self, chat_id: &str) -> Result<Vec<StoredMessage>>;
}

fn validate_chat_id(chat_id: &str) -> Result<()> {
    if chat_id.trim().is_empty() {
        return Err(SessionError::InvalidChatId(chat_id.to_string()));
    }
    Ok(())
}

fn truncate_oldest(messages: &mut Vec<StoredMessage>, max_messages: usize) {
    if messages.len() > max_messages {
        let to_remove = messages.len() - max_messages;
        messages.drain(0..to_remove);
    }
}

/// In-process store, lost on restart
#[derive(Debug, Default)]
pub struct MemoryMessageStore {
    chats: Mutex<HashMap<String, Vec<StoredMessage>>>,
}

impl MemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn append(&self, chat_id: &str, role: Role, content: &str) -> Result<StoredMessage> {
        validate_chat_id(chat_id)?;
        let message = StoredMessage::new(chat_id, role, content);
        self.chats
            .lock()
            .await
            .entry(chat_id.to_string())
            .or_default()
            .push(message.clone());
        Ok(message)
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn append_user(&self, chat_id: &str, content: &str) -> Result<StoredMessage> {
        self.append(chat_id, Role::User, content).await
    }

    async fn append_assistant(&self, chat_id: &str, content: &str) -> Result<StoredMessage> {
        self.append(chat_id, Role::Assistant, content).await
    }

    async fn list(&self, chat_id: &str) -> Result<Vec<StoredMessage>> {
        validate_chat_id(chat_id)?;
        Ok(self
            .chats
            .lock()
            .await
            .get(chat_id)
            .cloned()
            .unwrap_or_default())
    }
}

/// On-disk form of one conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub chat_id: String,
    pub messages: Vec<StoredMessage>,
    pub created_at: DateTime<Local>,
    pub updated_at: DateTime<Local>,
}

impl Conversation {
    pub fn new(chat_id: impl Into<String>) -> Self {
        let now = Local::now();
        Self {
            chat_id: chat_id.into(),
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// One JSON file per conversation under a directory.
///
/// The file is the source of truth: every operation re-reads it, so several
/// stores (the server and each chat client) can share one directory.
pub struct FileMessageStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
    max_messages: usize,
}

impl FileMessageStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self::with_max_messages(dir, DEFAULT_MAX_MESSAGES)
    }

    pub fn with_max_messages(dir: impl AsRef<Path>, max_messages: usize) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
            max_messages: max_messages.max(1),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn max_messages(&self) -> usize {
        self.max_messages
    }

    /// File holding a conversation
    pub fn conversation_path(&self, chat_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", file_stem(chat_id)))
    }

    async fn load(&self, chat_id: &str) -> Result<Conversation> {
        let path = self.conversation_path(chat_id);
        if !path.exists() {
            return Ok(Conversation::new(chat_id));
        }

        let content = tokio::fs::read_to_string(&path).await?;
        let mut conversation: Conversation = serde_json::from_str(&content)?;
        if conversation.chat_id != chat_id {
            warn!("◆ CHAT ID MISMATCH IN {:?}", path);
            return Err(SessionError::ChatMismatch {
                path,
                expected: chat_id.to_string(),
                found: conversation.chat_id,
            });
        }
        truncate_oldest(&mut conversation.messages, self.max_messages);
        debug!("Loaded conversation: {}", chat_id);
        Ok(conversation)
    }

    /// Write through a sibling temp file so readers never see a partial file
    async fn save(&self, conversation: &Conversation) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.conversation_path(&conversation.chat_id);
        let staging = path.with_extension(format!("{}.tmp", uuid::Uuid::new_v4().simple()));
        let content = serde_json::to_string_pretty(conversation)?;
        tokio::fs::write(&staging, content).await?;
        if let Err(e) = tokio::fs::rename(&staging, &path).await {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(e.into());
        }
        debug!("Saved conversation: {}", conversation.chat_id);
        Ok(())
    }

    async fn append(&self, chat_id: &str, role: Role, content: &str) -> Result<StoredMessage> {
        validate_chat_id(chat_id)?;
        let _guard = self.write_lock.lock().await;

        let mut conversation = self.load(chat_id).await?;
        let message = StoredMessage::new(chat_id, role, content);
        conversation.messages.push(message.clone());
        conversation.updated_at = message.created_at;
        truncate_oldest(&mut conversation.messages, self.max_messages);

        self.save(&conversation).await?;
        Ok(message)
    }
}

/// File stem for a chat id.
///
/// ASCII letters, digits and `-` pass through; every other byte, `_` included,
/// becomes `_XX` in hex, so distinct ids never share a file.
fn file_stem(chat_id: &str) -> String {
    let mut stem = String::with_capacity(chat_id.len());
    for byte in chat_id.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' {
            stem.push(byte as char);
        } else {
            stem.push_str(&format!("_{:02X}", byte));
        }
    }
    stem
}

#[async_trait]
impl MessageStore for FileMessageStore {
    async fn append_user(&self, chat_id: &str, content: &str) -> Result<StoredMessage> {
        self.append(chat_id, Role::User, content).await
    }

    async fn append_assistant(&self, chat_id: &str, content: &str) -> Result<StoredMessage> {
        self.append(chat_id, Role::Assistant, content).await
    }

    async fn list(&self, chat_id: &str) -> Result<Vec<StoredMessage>> {
        validate_chat_id(chat_id)?;
        Ok(self.load(chat_id).await?.messages)
    }
}
