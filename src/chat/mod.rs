//! Chat orchestration
//!
//! The chat service, the state of the active conversation and the events UI
//! surfaces subscribe to.

pub mod events;
pub mod service;
pub mod session;

use thiserror::Error;

use crate::storage::StorageError;

pub use events::ChatEvent;
pub use service::{ChatService, ChatSnapshot, HistoryLoadOutcome, LoadOutcome, SendOutcome};

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("Failed to persist conversation: {0}")]
    Storage(#[from] StorageError),
}
