//! Application state
//!
//! Owns the chat service and everything it is built from. UI surfaces receive
//! an `AppState` and talk to the service through it.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use crate::chat::{ChatService, LoadOutcome};
use crate::inference::port::EngineCommandPort;
use crate::storage::conversations::JsonConversationStore;
use crate::storage::models::scan_models_directory;
use crate::storage::settings::{load_settings_from, save_settings_to, EngineSettings};
use crate::storage::{get_data_dir, StorageError};
use crate::types::model::ModelDescriptor;

/// Result of [`AppState::load_default_model`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DefaultModelLoad {
    Loaded,
    /// No model has been loaded successfully before
    NoDefault,
    Failed(String),
}

/// Global application state shared across UI surfaces
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<ChatService>,
    data_dir: PathBuf,
    /// Path of the default model, persisted as `last_model_path`
    default_model: Arc<Mutex<Option<String>>>,
}

impl AppState {
    /// Build the application around `port` using the platform data directory.
    pub async fn bootstrap(port: Arc<dyn EngineCommandPort>) -> Result<Self, StorageError> {
        Self::with_data_dir(port, get_data_dir()?).await
    }

    /// Build the application with all persisted state under `data_dir`.
    pub async fn with_data_dir(
        port: Arc<dyn EngineCommandPort>,
        data_dir: impl Into<PathBuf>,
    ) -> Result<Self, StorageError> {
        let data_dir = data_dir.into();
        let settings = load_settings_from(&data_dir.join("settings.json"));
        let default_model = Arc::new(Mutex::new(settings.last_model_path.clone()));
        let store = Arc::new(JsonConversationStore::new(data_dir.join("conversations")));

        let service = ChatService::new(port, store, settings);
        if let Err(e) = service.load_conversations().await {
            tracing::error!("Failed to load conversations: {}", e);
        }

        tracing::info!("AppState initialized in {}", data_dir.display());
        Ok(Self {
            service,
            data_dir,
            default_model,
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn settings(&self) -> &EngineSettings {
        self.service.settings()
    }

    /// Models found in the configured models directory.
    pub fn available_models(&self) -> Vec<ModelDescriptor> {
        let dir = &self.settings().models_directory;
        match scan_models_directory(dir) {
            Ok(models) => models,
            Err(e) => {
                tracing::warn!("Failed to scan {}: {}", dir.display(), e);
                Vec::new()
            }
        }
    }

    pub fn default_model_path(&self) -> Option<String> {
        self.default_model
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The default model, if it is still in the models directory.
    pub fn default_model(&self) -> Option<ModelDescriptor> {
        let path = self.default_model_path()?;
        self.available_models().into_iter().find(|m| m.path == path)
    }

    /// Make `model` the default for [`Self::load_default_model`].
    pub fn remember_model(&self, model: &ModelDescriptor) -> Result<(), StorageError> {
        let mut settings = self.settings().clone();
        settings.last_model_path = Some(model.path.clone());
        save_settings_to(&self.data_dir.join("settings.json"), &settings)?;

        *self
            .default_model
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(model.path.clone());
        Ok(())
    }

    /// Load `model` and make it the default once it is resident.
    pub async fn load_model(&self, model: ModelDescriptor) -> LoadOutcome {
        let outcome = self.service.load_model(model.clone()).await;
        if outcome == LoadOutcome::Loaded {
            if let Err(e) = self.remember_model(&model) {
                tracing::warn!("Failed to remember default model {}: {}", model.name, e);
            }
        }
        outcome
    }

    /// Load the model that was last loaded successfully.
    pub async fn load_default_model(&self) -> DefaultModelLoad {
        let Some(path) = self.default_model_path() else {
            tracing::info!("No default model set");
            return DefaultModelLoad::NoDefault;
        };
        let Some(model) = self.default_model() else {
            tracing::warn!("Default model {} is no longer available", path);
            return DefaultModelLoad::Failed(format!("Default model not found: {path}"));
        };

        match self.service.load_model(model).await {
            LoadOutcome::Loaded => DefaultModelLoad::Loaded,
            LoadOutcome::Failed(message) => DefaultModelLoad::Failed(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::state::EngineState;
    use crate::inference::testing::ScriptedEngine;
    use tempfile::TempDir;

    fn prepare(dir: &TempDir) {
        let models = dir.path().join("models");
        std::fs::create_dir_all(&models).unwrap();
        std::fs::write(models.join("tiny.gguf"), b"").unwrap();

        let settings = EngineSettings {
            models_directory: models,
            poll_interval_ms: 10,
            ..EngineSettings::default()
        };
        save_settings_to(&dir.path().join("settings.json"), &settings).unwrap();
    }

    async fn app_with(dir: &TempDir, engine: Arc<ScriptedEngine>) -> AppState {
        AppState::with_data_dir(engine, dir.path()).await.unwrap()
    }

    async fn app(dir: &TempDir) -> AppState {
        prepare(dir);
        app_with(dir, ScriptedEngine::new()).await
    }

    #[tokio::test]
    async fn test_with_data_dir_reads_settings_and_models() {
        let dir = TempDir::new().unwrap();
        let app = app(&dir).await;

        assert_eq!(app.settings().poll_interval_ms, 10);
        let models = app.available_models();
        assert_eq!(models.len(), 1);
        assert_eq!(models[0].name, "tiny");
        assert!(app.default_model().is_none());
        assert_eq!(app.service.state(), EngineState::Uninitialized);
    }

    #[tokio::test]
    async fn test_conversations_survive_restart() {
        let dir = TempDir::new().unwrap();
        let app = app(&dir).await;
        let model = app.available_models().remove(0);
        assert_eq!(app.load_model(model.clone()).await, LoadOutcome::Loaded);
        app.service.send_message("Hello").await.unwrap();

        let restarted = app_with(&dir, ScriptedEngine::new()).await;
        let conversations = restarted.service.conversations();
        assert_eq!(conversations.len(), 1);
        assert_eq!(conversations[0].name, "Hello");
        assert_eq!(conversations[0].message_count, 2);
        assert_eq!(restarted.default_model().unwrap().path, model.path);
    }

    #[tokio::test]
    async fn test_load_default_model_without_default() {
        let dir = TempDir::new().unwrap();
        let app = app(&dir).await;

        assert_eq!(app.load_default_model().await, DefaultModelLoad::NoDefault);
        assert_eq!(app.service.state(), EngineState::Uninitialized);
    }

    #[tokio::test]
    async fn test_load_default_model_after_restart() {
        let dir = TempDir::new().unwrap();
        let app = app(&dir).await;
        let model = app.available_models().remove(0);
        app.load_model(model.clone()).await;

        let engine = ScriptedEngine::new();
        let restarted = app_with(&dir, engine.clone()).await;

        assert_eq!(restarted.load_default_model().await, DefaultModelLoad::Loaded);
        assert_eq!(restarted.service.loaded_model().unwrap().path, model.path);
        assert_eq!(engine.count("initialize"), 1);
    }

    #[tokio::test]
    async fn test_failed_load_is_not_remembered() {
        let dir = TempDir::new().unwrap();
        prepare(&dir);
        let engine = ScriptedEngine::new();
        engine.respond("initialize", r#"{"status":"ERROR","message":"bad file"}"#);
        let app = app_with(&dir, engine).await;
        let model = app.available_models().remove(0);

        let outcome = app.load_model(model).await;

        assert_eq!(outcome, LoadOutcome::Failed("bad file".to_string()));
        assert!(app.default_model_path().is_none());
        assert_eq!(app.load_default_model().await, DefaultModelLoad::NoDefault);
    }

    #[tokio::test]
    async fn test_load_default_model_failures() {
        let dir = TempDir::new().unwrap();
        let app = app(&dir).await;
        let model = app.available_models().remove(0);
        app.remember_model(&model).unwrap();

        let engine = ScriptedEngine::new();
        engine.respond("initialize", r#"{"status":"ERROR","message":"out of memory"}"#);
        let rejected = app_with(&dir, engine).await;
        assert_eq!(
            rejected.load_default_model().await,
            DefaultModelLoad::Failed("out of memory".to_string())
        );

        std::fs::remove_file(&model.path).unwrap();
        let missing = app_with(&dir, ScriptedEngine::new()).await;
        assert!(matches!(
            missing.load_default_model().await,
            DefaultModelLoad::Failed(message) if message.contains("tiny.gguf")
        ));
    }
}
