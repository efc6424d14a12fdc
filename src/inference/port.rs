//! Engine command port
//!
//! The native engine is reachable through one synchronous `invoke` call and a
//! token callback. [`EngineHandle`] serializes calls (the engine is not
//! reentrant) and moves them off the async executor.

use std::sync::Arc;
use tokio::sync::Mutex;

use crate::inference::codec::{
    decode_acknowledgement, decode_status, error_response, Acknowledgement, CodecError,
    CommandBuilder, StatusReport,
};

/// Streamed when generation finishes normally
pub const END_OF_STREAM: &str = "<EOS>";
/// Streamed when generation stops because of an abort
pub const ABORTED: &str = "<ABORTED>";

pub fn is_sentinel(token: &str) -> bool {
    token == END_OF_STREAM || token == ABORTED
}

pub type TokenCallback = Box<dyn Fn(&str) + Send + Sync>;

/// The narrow boundary to the native engine
pub trait EngineCommandPort: Send + Sync {
    /// Submit one encoded command and return the raw response text.
    ///
    /// Blocks only for command acceptance, never for completion.
    fn invoke(&self, command: &str) -> String;

    /// Register the callback fired for each streamed token.
    fn set_token_callback(&self, callback: TokenCallback);
}

/// Serialized, non-blocking access to an [`EngineCommandPort`]
#[derive(Clone)]
pub struct EngineHandle {
    port: Arc<dyn EngineCommandPort>,
    gate: Arc<Mutex<()>>,
}

impl EngineHandle {
    pub fn new(port: Arc<dyn EngineCommandPort>) -> Self {
        Self {
            port,
            gate: Arc::new(Mutex::new(())),
        }
    }

    pub fn set_token_callback(&self, callback: TokenCallback) {
        self.port.set_token_callback(callback);
    }

    /// Invoke on a blocking worker. A crashed worker yields an ERROR response.
    pub async fn invoke(&self, command: String) -> String {
        let _guard = self.gate.lock().await;
        let port = Arc::clone(&self.port);
        tracing::trace!("invoke: {}", command);

        match tokio::task::spawn_blocking(move || port.invoke(&command)).await {
            Ok(response) => response,
            Err(e) => {
                tracing::error!("Engine invoke worker failed: {}", e);
                serde_json::Value::Object(error_response(&format!("Engine call failed: {e}")))
                    .to_string()
            }
        }
    }

    /// Send a command that answers with an acknowledgement.
    pub async fn submit(&self, command: CommandBuilder) -> Result<Acknowledgement, CodecError> {
        let response = self.invoke(command.build()).await;
        decode_acknowledgement(&response)
    }

    pub async fn status(&self) -> Result<StatusReport, CodecError> {
        let response = self.invoke(CommandBuilder::new("get_status").build()).await;
        decode_status(&response)
    }
}
