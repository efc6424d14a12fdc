//! Conversation storage
//!
//! Conversations are persisted as one JSON file each under the data directory.
//! The chat service only talks to the [`ConversationStore`] trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::fs;
use uuid::Uuid;

use crate::storage::{get_data_dir, StorageError};
use crate::types::message::ChatMessage;

/// Conversation names derived from a prompt are cut to this many characters.
const TITLE_MAX_CHARS: usize = 40;

/// A persisted conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub name: String,
    /// Persisted history, source of truth for the engine context
    pub messages: Vec<ChatMessage>,
    pub message_count: usize,
    pub created_at: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
}

impl Conversation {
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            messages: Vec::new(),
            message_count: 0,
            created_at: now,
            last_modified: now,
        }
    }

    /// Create a conversation named after its first prompt.
    pub fn from_first_prompt(prompt: &str) -> Self {
        Self::new(title_from_prompt(prompt))
    }

    /// Append one completed exchange to the persisted history.
    pub fn push_exchange(&mut self, user: ChatMessage, assistant: ChatMessage) {
        self.messages.push(user);
        self.messages.push(assistant);
        self.message_count = self.messages.len();
    }

    pub fn summary(&self) -> ConversationSummary {
        ConversationSummary {
            id: self.id,
            name: self.name.clone(),
            message_count: self.message_count,
            last_modified: self.last_modified,
        }
    }
}

/// Sidebar entry for a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: Uuid,
    pub name: String,
    pub message_count: usize,
    pub last_modified: DateTime<Utc>,
}

pub fn title_from_prompt(prompt: &str) -> String {
    let prompt = prompt.trim();
    if prompt.chars().count() > TITLE_MAX_CHARS {
        let head: String = prompt.chars().take(TITLE_MAX_CHARS).collect();
        format!("{head}...")
    } else {
        prompt.to_string()
    }
}

/// Persistence collaborator for conversations
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// All conversations, most recently modified first
    async fn list_conversations(&self) -> Result<Vec<Conversation>, StorageError>;

    async fn load(&self, id: Uuid) -> Result<Conversation, StorageError>;

    /// Insert or update, always stamping `last_modified`. Returns the id.
    async fn save(&self, conversation: &mut Conversation) -> Result<Uuid, StorageError>;

    async fn delete(&self, id: Uuid) -> Result<(), StorageError>;
}

/// JSON-file backed conversation store
#[derive(Debug, Clone)]
pub struct JsonConversationStore {
    root: PathBuf,
}

impl JsonConversationStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Store rooted at `<data dir>/conversations`
    pub fn in_data_dir() -> Result<Self, StorageError> {
        Ok(Self::new(get_data_dir()?.join("conversations")))
    }

    fn path_for(&self, id: Uuid) -> PathBuf {
        self.root.join(format!("{id}.json"))
    }
}

#[async_trait]
impl ConversationStore for JsonConversationStore {
    async fn list_conversations(&self) -> Result<Vec<Conversation>, StorageError> {
        if !fs::try_exists(&self.root).await? {
            return Ok(Vec::new());
        }

        let mut conversations = Vec::new();
        let mut entries = fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let json = fs::read_to_string(&path).await?;
            match serde_json::from_str::<Conversation>(&json) {
                Ok(conversation) => conversations.push(conversation),
                Err(e) => tracing::warn!("Skipping unreadable conversation {}: {}", path.display(), e),
            }
        }

        conversations.sort_by(|a, b| b.last_modified.cmp(&a.last_modified));
        Ok(conversations)
    }

    async fn load(&self, id: Uuid) -> Result<Conversation, StorageError> {
        let path = self.path_for(id);
        if !fs::try_exists(&path).await? {
            return Err(StorageError::NotFound(id.to_string()));
        }
        let json = fs::read_to_string(path).await?;
        Ok(serde_json::from_str(&json)?)
    }

    async fn save(&self, conversation: &mut Conversation) -> Result<Uuid, StorageError> {
        fs::create_dir_all(&self.root).await?;

        let path = self.path_for(conversation.id);
        let now = Utc::now();
        if !fs::try_exists(&path).await? {
            conversation.created_at = now;
        }
        conversation.last_modified = now;
        conversation.message_count = conversation.messages.len();

        let json = serde_json::to_string_pretty(conversation)?;
        fs::write(&path, json).await?;

        tracing::debug!("Saved conversation {} ({} messages)", conversation.id, conversation.message_count);
        Ok(conversation.id)
    }

    async fn delete(&self, id: Uuid) -> Result<(), StorageError> {
        let path = self.path_for(id);
        if !fs::try_exists(&path).await? {
            return Err(StorageError::NotFound(id.to_string()));
        }
        fs::remove_file(path).await?;
        tracing::debug!("Deleted conversation {}", id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_title_from_prompt() {
        assert_eq!(title_from_prompt("  Hi  "), "Hi");
        let long = "a".repeat(45);
        assert_eq!(title_from_prompt(&long), format!("{}...", "a".repeat(40)));
    }

    #[tokio::test]
    async fn test_save_list_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonConversationStore::new(dir.path().join("conversations"));
        assert!(store.list_conversations().await.unwrap().is_empty());

        let mut first = Conversation::new("first");
        first.push_exchange(ChatMessage::user("Hi"), ChatMessage::assistant("Hello"));
        store.save(&mut first).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;

        let mut second = Conversation::new("second");
        store.save(&mut second).await.unwrap();

        let listed = store.list_conversations().await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, second.id);

        // Updating the first conversation moves it to the front.
        let created = first.created_at;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        store.save(&mut first).await.unwrap();
        let listed = store.list_conversations().await.unwrap();
        assert_eq!(listed[0].id, first.id);
        assert_eq!(listed[0].created_at, created);
        assert_eq!(listed[0].message_count, 2);

        let loaded = store.load(first.id).await.unwrap();
        assert_eq!(loaded.messages, first.messages);

        store.delete(first.id).await.unwrap();
        assert!(matches!(store.load(first.id).await, Err(StorageError::NotFound(_))));
        assert_eq!(store.list_conversations().await.unwrap().len(), 1);
    }
}
