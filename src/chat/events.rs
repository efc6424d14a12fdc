//! Change notifications for UI surfaces

use serde::Serialize;
use uuid::Uuid;

use crate::inference::state::EngineState;

/// Broadcast to every subscriber of the chat service
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ChatEvent {
    /// Engine state or its error message changed
    StateChanged {
        state: EngineState,
        error: Option<String>,
    },
    /// Busy/generating/history latches changed
    ActivityChanged {
        is_busy: bool,
        is_generating: bool,
        history_pending: bool,
    },
    /// Loaded model reference changed
    ModelChanged { name: Option<String> },
    /// Current conversation changed
    ConversationChanged { id: Option<Uuid> },
    /// Displayed message list replaced or extended
    MessagesChanged,
    /// Token appended to the displayed message at `index`
    Token { index: usize, token: String },
    /// Sidebar index changed
    ConversationListChanged,
    /// Sampling parameters changed
    SamplingChanged,
}
