//! Command codec
//!
//! Commands are `key=value` pairs joined with `&`, values percent-encoded.
//! Responses are JSON objects, decoded either into a generic map that never
//! fails or into the typed shapes the chat service branches on.

use serde_json::{Map, Value};
use thiserror::Error;

use crate::inference::state::EngineState;

/// Engine-assigned handle for one queued operation
pub type TaskId = u64;

/// Response decoding failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("Malformed response: {0}")]
    Malformed(String),
    #[error("Response is not a JSON object")]
    NotAnObject,
    #[error("Missing field `{0}`")]
    MissingField(&'static str),
    #[error("Invalid value for `{field}`: {value}")]
    InvalidField { field: &'static str, value: String },
}

/// Encode an ordered parameter set as `k1=v1&k2=v2`.
pub fn encode<K, V>(params: &[(K, V)]) -> String
where
    K: AsRef<str>,
    V: AsRef<str>,
{
    params
        .iter()
        .map(|(key, value)| format!("{}={}", key.as_ref(), urlencoding::encode(value.as_ref())))
        .collect::<Vec<_>>()
        .join("&")
}

/// Ordered command builder, always led by `command=<name>`
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    params: Vec<(String, String)>,
}

impl CommandBuilder {
    pub fn new(command: &str) -> Self {
        Self {
            params: vec![("command".to_string(), command.to_string())],
        }
    }

    pub fn param(mut self, key: &str, value: impl ToString) -> Self {
        self.params.push((key.to_string(), value.to_string()));
        self
    }

    pub fn flag(self, key: &str, value: bool) -> Self {
        self.param(key, if value { "1" } else { "0" })
    }

    pub fn name(&self) -> &str {
        &self.params[0].1
    }

    pub fn build(&self) -> String {
        encode(&self.params)
    }
}

/// Decode a response into a string-keyed map.
///
/// Unparseable input becomes `{status: "ERROR", message: <detail>}`.
pub fn decode(text: &str) -> Map<String, Value> {
    match parse_object(text) {
        Ok(map) => map,
        Err(e) => error_response(&e.to_string()),
    }
}

/// The `{status: "ERROR", message}` shape
pub fn error_response(message: &str) -> Map<String, Value> {
    let mut map = Map::new();
    map.insert("status".to_string(), Value::String("ERROR".to_string()));
    map.insert("message".to_string(), Value::String(message.to_string()));
    map
}

fn parse_object(text: &str) -> Result<Map<String, Value>, CodecError> {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(CodecError::NotAnObject),
        Err(e) => Err(CodecError::Malformed(e.to_string())),
    }
}

/// Reply to any command other than `get_status`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Acknowledgement {
    Queued { task_id: Option<TaskId> },
    Rejected { status: String, message: String },
}

pub fn decode_acknowledgement(text: &str) -> Result<Acknowledgement, CodecError> {
    let map = parse_object(text)?;
    let status = map
        .get("status")
        .and_then(Value::as_str)
        .ok_or(CodecError::MissingField("status"))?;

    if status.eq_ignore_ascii_case("QUEUED") {
        let task_id = match map.get("task_id") {
            None | Some(Value::Null) => None,
            Some(value) => Some(parse_task_id(value)?),
        };
        return Ok(Acknowledgement::Queued { task_id });
    }

    let message = map
        .get("message")
        .and_then(Value::as_str)
        .filter(|m| !m.trim().is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("Engine rejected the command (status {status})"));

    Ok(Acknowledgement::Rejected {
        status: status.to_string(),
        message,
    })
}

fn parse_task_id(value: &Value) -> Result<TaskId, CodecError> {
    let parsed = match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| CodecError::InvalidField {
        field: "task_id",
        value: value.to_string(),
    })
}

/// Reply to `get_status`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub state: EngineState,
    pub message: String,
}

pub fn decode_status(text: &str) -> Result<StatusReport, CodecError> {
    let map = parse_object(text)?;
    let raw = map
        .get("state")
        .and_then(Value::as_str)
        .ok_or(CodecError::MissingField("state"))?;

    let state = match raw.to_ascii_uppercase().as_str() {
        "UNINITIALIZED" => EngineState::Uninitialized,
        "IDLE" => EngineState::Idle,
        "BUSY" => EngineState::Busy,
        "ERROR" => EngineState::InError,
        _ => {
            return Err(CodecError::InvalidField {
                field: "state",
                value: raw.to_string(),
            })
        }
    };

    let message = map
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    Ok(StatusReport { state, message })
}
