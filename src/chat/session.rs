//! Conversation session
//!
//! Tracks which conversation is active, what is displayed for it and whether
//! its history still has to be primed into the engine.

use uuid::Uuid;

use crate::inference::streaming::{lock, SharedTranscript};
use crate::storage::conversations::{Conversation, ConversationSummary};
use crate::types::message::ChatMessage;

#[derive(Debug)]
pub struct ConversationSession {
    current: Option<Conversation>,
    transcript: SharedTranscript,
    history_pending: bool,
    conversations: Vec<ConversationSummary>,
}

impl ConversationSession {
    pub fn new(transcript: SharedTranscript) -> Self {
        Self {
            current: None,
            transcript,
            history_pending: false,
            conversations: Vec::new(),
        }
    }

    pub fn current(&self) -> Option<&Conversation> {
        self.current.as_ref()
    }

    pub fn current_id(&self) -> Option<Uuid> {
        self.current.as_ref().map(|c| c.id)
    }

    pub fn history_pending(&self) -> bool {
        self.history_pending
    }

    pub fn set_history_pending(&mut self, pending: bool) {
        self.history_pending = pending;
    }

    pub fn conversations(&self) -> &[ConversationSummary] {
        &self.conversations
    }

    pub fn set_conversations(&mut self, conversations: Vec<ConversationSummary>) {
        self.conversations = conversations;
    }

    /// Make `conversation` current and replay its persisted messages. The
    /// engine context is primed later, on demand.
    pub fn select(&mut self, conversation: Conversation) {
        lock(&self.transcript).replace(conversation.messages.clone());
        self.current = Some(conversation);
        self.history_pending = true;
    }

    pub fn reset(&mut self) {
        self.current = None;
        self.history_pending = false;
        lock(&self.transcript).clear();
    }

    /// Open an exchange: show the user's turn and an empty assistant message.
    ///
    /// Creates the conversation when none is selected. Messages displayed but
    /// never persisted (failed generations, history load errors) are dropped
    /// first. Returns a copy of the conversation and the index of the open
    /// assistant message.
    pub fn begin_exchange(&mut self, prompt: &str) -> (Conversation, bool, usize) {
        let created = self.current.is_none();
        let conversation = self
            .current
            .get_or_insert_with(|| Conversation::from_first_prompt(prompt))
            .clone();

        let mut transcript = lock(&self.transcript);
        if transcript.messages() != conversation.messages.as_slice() {
            transcript.replace(conversation.messages.clone());
        }
        transcript.push(ChatMessage::user(prompt));
        let index = transcript.open_assistant();
        (conversation, created, index)
    }

    /// Store the result of a finished exchange and move it to the top of the
    /// sidebar.
    pub fn commit(&mut self, conversation: Conversation) {
        self.upsert_summary(conversation.summary());
        if self.current_id().map_or(true, |id| id == conversation.id) {
            self.current = Some(conversation);
        }
    }

    /// Most-recently-used ordering. Existing entries are updated in place and
    /// moved, never removed and re-inserted.
    pub fn upsert_summary(&mut self, summary: ConversationSummary) {
        match self.conversations.iter().position(|c| c.id == summary.id) {
            Some(index) => {
                let entry = &mut self.conversations[index];
                entry.name = summary.name;
                entry.message_count = summary.message_count;
                entry.last_modified = summary.last_modified;
                if index != 0 {
                    let entry = self.conversations.remove(index);
                    self.conversations.insert(0, entry);
                }
            }
            None => self.conversations.insert(0, summary),
        }
    }

    pub fn remove_summary(&mut self, id: Uuid) -> bool {
        let before = self.conversations.len();
        self.conversations.retain(|c| c.id != id);
        before != self.conversations.len()
    }
}
