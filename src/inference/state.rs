//! Engine state machine
//!
//! The engine only reports coarse occupancy. Which operation is running is
//! tracked here as an [`Activity`] latch that clears whenever the engine is
//! observed leaving BUSY.

use serde::Serialize;
use std::fmt;

use crate::inference::codec::{CodecError, StatusReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EngineState {
    Uninitialized,
    Idle,
    Busy,
    InError,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineState::Uninitialized => write!(f, "uninitialized"),
            EngineState::Idle => write!(f, "idle"),
            EngineState::Busy => write!(f, "busy"),
            EngineState::InError => write!(f, "error"),
        }
    }
}

/// Which orchestrator operation currently owns the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Activity {
    LoadingModel,
    Generating,
    LoadingHistory,
    /// `free`, `clear_context`, `set_parameters`
    Maintenance,
}

/// Result of applying one observation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: EngineState,
    pub to: EngineState,
}

impl Transition {
    pub fn changed(&self) -> bool {
        self.from != self.to
    }

    pub fn left_busy(&self) -> bool {
        self.from == EngineState::Busy && self.to != EngineState::Busy
    }
}

#[derive(Debug, Clone)]
pub struct EngineStateMachine {
    state: EngineState,
    last_error: String,
    activity: Option<Activity>,
}

impl Default for EngineStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineStateMachine {
    pub fn new() -> Self {
        Self {
            state: EngineState::Uninitialized,
            last_error: String::new(),
            activity: None,
        }
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Non-empty exactly when the state is `InError`
    pub fn last_error(&self) -> &str {
        &self.last_error
    }

    pub fn is_busy(&self) -> bool {
        self.state == EngineState::Busy || self.activity.is_some()
    }

    pub fn is_generating(&self) -> bool {
        self.activity == Some(Activity::Generating)
    }

    pub fn is_loading_history(&self) -> bool {
        self.activity == Some(Activity::LoadingHistory)
    }

    /// Input is accepted only while the engine is idle, nothing is in flight
    /// and no conversation history is waiting to be primed.
    pub fn can_accept_input(&self, history_pending: bool) -> bool {
        self.state == EngineState::Idle && self.activity.is_none() && !history_pending
    }

    /// Claim the engine for an operation. Fails if another one holds it.
    pub fn begin(&mut self, activity: Activity) -> bool {
        if self.activity.is_some() {
            return false;
        }
        self.activity = Some(activity);
        true
    }

    /// Release the activity latch without an engine observation.
    pub fn finish(&mut self) {
        self.activity = None;
    }

    /// Apply a polled status (or its decode failure).
    pub fn apply(&mut self, report: Result<StatusReport, CodecError>) -> Transition {
        match report {
            Ok(StatusReport {
                state: EngineState::InError,
                message,
            }) => {
                let message = if message.trim().is_empty() {
                    "Engine reported an error without a message".to_string()
                } else {
                    message
                };
                self.set(EngineState::InError, message)
            }
            Ok(StatusReport { state, .. }) => self.set(state, String::new()),
            Err(e) => self.set(EngineState::InError, format!("Unreadable engine status: {e}")),
        }
    }

    /// Optimistic BUSY right after a QUEUED acknowledgement.
    pub fn assume_busy(&mut self) -> Transition {
        self.set(EngineState::Busy, String::new())
    }

    /// Engine-reported failure (rejected command).
    pub fn fail(&mut self, message: impl Into<String>) -> Transition {
        let message = message.into();
        let message = if message.trim().is_empty() {
            "Engine rejected the command".to_string()
        } else {
            message
        };
        self.set(EngineState::InError, message)
    }

    fn set(&mut self, to: EngineState, message: String) -> Transition {
        let transition = Transition {
            from: self.state,
            to,
        };
        self.state = to;
        self.last_error = message;

        if transition.left_busy() {
            self.activity = None;
        }
        if transition.changed() {
            tracing::debug!("Engine state {} -> {}", transition.from, transition.to);
        }
        transition
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(state: EngineState, message: &str) -> Result<StatusReport, CodecError> {
        Ok(StatusReport {
            state,
            message: message.to_string(),
        })
    }

    #[test]
    fn test_initial_state() {
        let machine = EngineStateMachine::new();
        assert_eq!(machine.state(), EngineState::Uninitialized);
        assert_eq!(machine.last_error(), "");
        assert!(!machine.is_busy());
        assert!(!machine.can_accept_input(false));
    }

    #[test]
    fn test_error_message_discipline() {
        let mut machine = EngineStateMachine::new();
        let observations = [
            report(EngineState::Idle, "ignored"),
            report(EngineState::InError, ""),
            report(EngineState::Busy, ""),
            Err(CodecError::MissingField("state")),
            report(EngineState::InError, "oom"),
            report(EngineState::Uninitialized, ""),
        ];

        for observation in observations {
            machine.apply(observation);
            if machine.state() == EngineState::InError {
                assert!(!machine.last_error().is_empty());
            } else {
                assert!(machine.last_error().is_empty());
            }
        }
    }

    #[test]
    fn test_leaving_busy_clears_activity() {
        let mut machine = EngineStateMachine::new();
        machine.apply(report(EngineState::Idle, ""));
        assert!(machine.can_accept_input(false));
        assert!(!machine.can_accept_input(true));

        assert!(machine.begin(Activity::Generating));
        assert!(!machine.begin(Activity::LoadingHistory));
        assert!(machine.is_generating());
        assert!(!machine.can_accept_input(false));

        machine.assume_busy();
        machine.apply(report(EngineState::Busy, ""));
        assert!(machine.is_generating());

        let transition = machine.apply(report(EngineState::Idle, ""));
        assert!(transition.left_busy());
        assert!(!machine.is_generating());
        assert!(!machine.is_busy());
        assert!(machine.can_accept_input(false));

        assert!(machine.begin(Activity::LoadingHistory));
        assert!(machine.is_loading_history());
        assert!(!machine.is_generating());
        machine.finish();
        assert!(!machine.is_loading_history());
    }

    #[test]
    fn test_fail_sets_message() {
        let mut machine = EngineStateMachine::new();
        machine.fail("");
        assert_eq!(machine.state(), EngineState::InError);
        assert!(!machine.last_error().is_empty());

        machine.apply(report(EngineState::Idle, ""));
        assert_eq!(machine.last_error(), "");
    }
}
