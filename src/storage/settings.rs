//! Settings storage
//!
//! Manages persistence of engine defaults and orchestration settings.

use crate::storage::{get_data_dir, StorageError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Engine settings
///
/// Process-wide defaults used whenever a model does not carry its own override.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Temperature parameter for text generation (0.0 - 2.0)
    pub temperature: f32,
    /// Min-p sampling floor (0.0 - 1.0)
    pub min_p: f32,
    /// Sampling seed, -1 for random
    #[serde(default = "default_seed")]
    pub seed: i32,
    /// Maximum number of tokens to generate per message
    pub max_tokens: u32,
    /// Context window size
    pub context_size: u32,
    /// Number of GPU layers to offload (0 = CPU only)
    pub gpu_layers: u32,
    #[serde(default = "default_true")]
    pub use_mmap: bool,
    #[serde(default)]
    pub use_mlock: bool,
    /// Interval between status polls while the engine is busy
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Chat template used when a model has none of its own
    #[serde(default)]
    pub fallback_chat_template: String,
    /// Directory where model files (.gguf) are stored
    pub models_directory: PathBuf,
    /// Last loaded model path
    #[serde(default)]
    pub last_model_path: Option<String>,
}

fn default_seed() -> i32 {
    -1
}

fn default_true() -> bool {
    true
}

fn default_poll_interval_ms() -> u64 {
    200
}

impl Default for EngineSettings {
    fn default() -> Self {
        // Mobile targets get a smaller context and fewer offloaded layers.
        let (context_size, gpu_layers) = if cfg!(any(target_os = "android", target_os = "ios")) {
            (2048, 25)
        } else {
            (4096, 50)
        };

        Self {
            temperature: 0.7,
            min_p: 0.05,
            seed: default_seed(),
            max_tokens: 4096,
            context_size,
            gpu_layers,
            use_mmap: true,
            use_mlock: false,
            poll_interval_ms: default_poll_interval_ms(),
            fallback_chat_template: String::new(),
            models_directory: get_data_dir()
                .ok()
                .map(|d| d.join("models"))
                .unwrap_or_else(|| PathBuf::from("./models")),
            last_model_path: None,
        }
    }
}

impl EngineSettings {
    /// Validate settings values
    ///
    /// Ensures all parameters are within acceptable ranges.
    pub fn validate(&mut self) {
        self.temperature = self.temperature.clamp(0.0, 2.0);
        self.min_p = self.min_p.clamp(0.0, 1.0);

        if self.seed < -1 {
            self.seed = -1;
        }

        self.max_tokens = self.max_tokens.clamp(1, 65536);

        let valid_context_sizes = [512, 1024, 2048, 4096, 8192, 16384, 32768];
        if !valid_context_sizes.contains(&self.context_size) {
            self.context_size = *valid_context_sizes
                .iter()
                .min_by_key(|&&size| (size as i64 - self.context_size as i64).abs())
                .unwrap_or(&4096);
        }

        if self.max_tokens > self.context_size {
            self.max_tokens = self.context_size / 2;
        }

        self.poll_interval_ms = self.poll_interval_ms.clamp(10, 5000);
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Get the settings file path
fn get_settings_path() -> Result<PathBuf, StorageError> {
    Ok(get_data_dir()?.join("settings.json"))
}

/// Load settings from the data directory
///
/// Returns default settings if the file doesn't exist or is corrupted
pub fn load_settings() -> EngineSettings {
    match get_settings_path() {
        Ok(path) => load_settings_from(&path),
        Err(e) => {
            tracing::warn!("Failed to locate settings, using defaults: {}", e);
            EngineSettings::default()
        }
    }
}

/// Load settings from an explicit path, falling back to defaults
pub fn load_settings_from(path: &Path) -> EngineSettings {
    match load_settings_internal(path) {
        Ok(settings) => settings,
        Err(e) => {
            tracing::warn!("Failed to load settings, using defaults: {}", e);
            EngineSettings::default()
        }
    }
}

fn load_settings_internal(path: &Path) -> Result<EngineSettings, StorageError> {
    if !path.exists() {
        tracing::info!("Settings file not found, using defaults");
        return Ok(EngineSettings::default());
    }

    let json = fs::read_to_string(path)?;
    let mut settings: EngineSettings = serde_json::from_str(&json)?;
    settings.validate();

    tracing::debug!("Loaded settings from {}", path.display());
    Ok(settings)
}

/// Save settings to the data directory
pub fn save_settings(settings: &EngineSettings) -> Result<(), StorageError> {
    save_settings_to(&get_settings_path()?, settings)
}

/// Save settings to an explicit path
pub fn save_settings_to(path: &Path, settings: &EngineSettings) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let json = serde_json::to_string_pretty(settings)?;
    fs::write(path, json)?;

    tracing::debug!("Saved settings to {}", path.display());
    Ok(())
}
