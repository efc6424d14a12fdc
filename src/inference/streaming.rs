//! Token streaming
//!
//! Displayed messages live in a [`Transcript`] shared between the chat service
//! and the engine's token callback. At most one assistant message is open for
//! streaming at a time.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;

use crate::chat::events::ChatEvent;
use crate::inference::port::{is_sentinel, TokenCallback};
use crate::types::message::{ChatMessage, Role};

#[derive(Debug, Default, Clone)]
pub struct Transcript {
    messages: Vec<ChatMessage>,
    open: Option<usize>,
}

impl Transcript {
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn open_index(&self) -> Option<usize> {
        self.open
    }

    /// Replace everything and close any open message.
    pub fn replace(&mut self, messages: Vec<ChatMessage>) {
        self.messages = messages;
        self.open = None;
    }

    pub fn clear(&mut self) {
        self.replace(Vec::new());
    }

    pub fn push(&mut self, message: ChatMessage) -> usize {
        self.messages.push(message);
        self.messages.len() - 1
    }

    /// Push an empty assistant message and open it for streaming.
    pub fn open_assistant(&mut self) -> usize {
        let index = self.push(ChatMessage::assistant(String::new()));
        self.open = Some(index);
        index
    }

    /// Close the open message, returning its index and accumulated content.
    pub fn close(&mut self) -> Option<(usize, String)> {
        let index = self.open.take()?;
        let content = self.messages.get(index)?.content.clone();
        Some((index, content))
    }

    pub fn set_content(&mut self, index: usize, content: impl Into<String>) {
        if let Some(message) = self.messages.get_mut(index) {
            message.content = content.into();
        }
    }

    fn append_open(&mut self, token: &str) -> Option<usize> {
        let index = self.open?;
        let message = self.messages.get_mut(index)?;
        if message.role != Role::Assistant {
            return None;
        }
        message.content.push_str(token);
        Some(index)
    }
}

pub type SharedTranscript = Arc<Mutex<Transcript>>;

pub fn lock(transcript: &SharedTranscript) -> MutexGuard<'_, Transcript> {
    transcript.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Receives streamed tokens and appends them to the open assistant message
#[derive(Clone)]
pub struct TokenSink {
    transcript: SharedTranscript,
    events: broadcast::Sender<ChatEvent>,
}

impl TokenSink {
    pub fn new(transcript: SharedTranscript, events: broadcast::Sender<ChatEvent>) -> Self {
        Self { transcript, events }
    }

    /// Returns whether the token became visible content.
    pub fn push(&self, token: &str) -> bool {
        if is_sentinel(token) {
            tracing::trace!("sentinel token {:?} filtered", token);
            return false;
        }

        // Appended under the lock, in callback order.
        let appended = lock(&self.transcript).append_open(token);
        match appended {
            Some(index) => {
                let _ = self.events.send(ChatEvent::Token {
                    index,
                    token: token.to_string(),
                });
                true
            }
            None => {
                tracing::debug!("Dropping token with no open assistant message");
                false
            }
        }
    }

    pub fn into_callback(self) -> TokenCallback {
        Box::new(move |token: &str| {
            self.push(token);
        })
    }
}
