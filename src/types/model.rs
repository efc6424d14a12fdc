//! Model types
//!
//! Defines model descriptors and the parameter sets sent to the engine.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::storage::settings::EngineSettings;

/// A model the engine can load, with optional per-model overrides
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub id: Uuid,
    /// Display name of the model
    pub name: String,
    /// Path to the GGUF file
    pub path: String,
    #[serde(default)]
    pub custom_context_size: Option<u32>,
    #[serde(default)]
    pub custom_gpu_layers: Option<u32>,
    #[serde(default)]
    pub custom_temperature: Option<f32>,
    #[serde(default)]
    pub custom_min_p: Option<f32>,
    #[serde(default)]
    pub custom_chat_template: Option<String>,
}

impl ModelDescriptor {
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            path: path.into(),
            custom_context_size: None,
            custom_gpu_layers: None,
            custom_temperature: None,
            custom_min_p: None,
            custom_chat_template: None,
        }
    }

    /// Resolve the load parameters: per-model override first, then settings.
    pub fn load_parameters(&self, settings: &EngineSettings) -> LoadParameters {
        let chat_template = self
            .custom_chat_template
            .clone()
            .filter(|t| !t.trim().is_empty())
            .or_else(|| {
                let fallback = settings.fallback_chat_template.trim();
                (!fallback.is_empty()).then(|| fallback.to_string())
            });

        LoadParameters {
            context_size: self.custom_context_size.unwrap_or(settings.context_size),
            gpu_layers: self.custom_gpu_layers.unwrap_or(settings.gpu_layers),
            use_mmap: settings.use_mmap,
            use_mlock: settings.use_mlock,
            chat_template,
        }
    }

    /// Resolve the sampling parameters the model starts with.
    pub fn sampling_parameters(&self, settings: &EngineSettings) -> SamplingParameters {
        SamplingParameters {
            temperature: self.custom_temperature.unwrap_or(settings.temperature),
            min_p: self.custom_min_p.unwrap_or(settings.min_p),
            seed: settings.seed,
        }
    }
}

/// Parameters carried by the `initialize` command
#[derive(Debug, Clone, PartialEq)]
pub struct LoadParameters {
    pub context_size: u32,
    pub gpu_layers: u32,
    pub use_mmap: bool,
    pub use_mlock: bool,
    pub chat_template: Option<String>,
}

/// Sampling parameters held by the engine
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplingParameters {
    /// Temperature (0.0 - 2.0)
    pub temperature: f32,
    /// Nucleus-probability floor (0.0 - 1.0)
    pub min_p: f32,
    /// Seed, -1 for random
    pub seed: i32,
}

impl Default for SamplingParameters {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            min_p: 0.05,
            seed: -1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides_take_precedence() {
        let settings = EngineSettings::default();
        let mut model = ModelDescriptor::new("qwen", "/models/qwen.gguf");
        model.custom_context_size = Some(2048);
        model.custom_temperature = Some(0.2);

        let load = model.load_parameters(&settings);
        assert_eq!(load.context_size, 2048);
        assert_eq!(load.gpu_layers, settings.gpu_layers);

        let sampling = model.sampling_parameters(&settings);
        assert_eq!(sampling.temperature, 0.2);
        assert_eq!(sampling.min_p, settings.min_p);
    }

    #[test]
    fn test_chat_template_falls_back_to_settings() {
        let mut settings = EngineSettings::default();
        let model = ModelDescriptor::new("qwen", "/models/qwen.gguf");
        assert_eq!(model.load_parameters(&settings).chat_template, None);

        settings.fallback_chat_template = "{{ messages }}".to_string();
        assert_eq!(
            model.load_parameters(&settings).chat_template.as_deref(),
            Some("{{ messages }}")
        );
    }
}
