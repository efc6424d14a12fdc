//! Scripted engine used by unit tests

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use crate::inference::port::{EngineCommandPort, TokenCallback};

struct Step {
    state: String,
    message: String,
    tokens: Vec<String>,
}

#[derive(Default)]
struct Inner {
    commands: Vec<String>,
    responses: HashMap<String, VecDeque<String>>,
    script: VecDeque<Step>,
    loaded: bool,
    next_task: u64,
}

/// Answers QUEUED to every command unless told otherwise, and reports the
/// scripted status sequence before settling on IDLE (or UNINITIALIZED when no
/// model is loaded).
#[derive(Default)]
pub struct ScriptedEngine {
    inner: Mutex<Inner>,
    callback: Mutex<Option<TokenCallback>>,
}

pub fn command_name(command: &str) -> &str {
    command
        .split('&')
        .next()
        .and_then(|first| first.strip_prefix("command="))
        .unwrap_or("")
}

impl ScriptedEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue a raw response for the next `name` command.
    pub fn respond(&self, name: &str, response: &str) {
        self.inner
            .lock()
            .unwrap()
            .responses
            .entry(name.to_string())
            .or_default()
            .push_back(response.to_string());
    }

    /// Queue a status report, streaming `tokens` just before it is returned.
    pub fn script(&self, state: &str, tokens: &[&str]) {
        self.script_with_message(state, "", tokens);
    }

    pub fn script_with_message(&self, state: &str, message: &str, tokens: &[&str]) {
        self.inner.lock().unwrap().script.push_back(Step {
            state: state.to_string(),
            message: message.to_string(),
            tokens: tokens.iter().map(|t| t.to_string()).collect(),
        });
    }

    /// Every command except `get_status`, in order.
    pub fn commands(&self) -> Vec<String> {
        self.inner
            .lock()
            .unwrap()
            .commands
            .iter()
            .filter(|c| command_name(c) != "get_status")
            .cloned()
            .collect()
    }

    pub fn count(&self, name: &str) -> usize {
        self.inner
            .lock()
            .unwrap()
            .commands
            .iter()
            .filter(|c| command_name(c) == name)
            .count()
    }

    pub fn emit(&self, token: &str) {
        if let Some(callback) = self.callback.lock().unwrap().as_ref() {
            callback(token);
        }
    }

    fn status(&self) -> String {
        let (step, loaded) = {
            let mut inner = self.inner.lock().unwrap();
            (inner.script.pop_front(), inner.loaded)
        };

        match step {
            Some(step) => {
                for token in &step.tokens {
                    self.emit(token);
                }
                serde_json::json!({ "state": step.state, "message": step.message }).to_string()
            }
            None if loaded => r#"{"state":"IDLE"}"#.to_string(),
            None => r#"{"state":"UNINITIALIZED"}"#.to_string(),
        }
    }
}

impl EngineCommandPort for ScriptedEngine {
    fn invoke(&self, command: &str) -> String {
        let name = command_name(command).to_string();
        let canned = {
            let mut inner = self.inner.lock().unwrap();
            inner.commands.push(command.to_string());
            inner.responses.get_mut(&name).and_then(VecDeque::pop_front)
        };

        if name == "get_status" {
            return canned.unwrap_or_else(|| self.status());
        }
        if let Some(response) = canned {
            return response;
        }

        let mut inner = self.inner.lock().unwrap();
        match name.as_str() {
            "initialize" => inner.loaded = true,
            "free" => inner.loaded = false,
            _ => {}
        }
        inner.next_task += 1;
        serde_json::json!({ "status": "QUEUED", "task_id": inner.next_task }).to_string()
    }

    fn set_token_callback(&self, callback: TokenCallback) {
        *self.callback.lock().unwrap() = Some(callback);
    }
}
