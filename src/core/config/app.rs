//! Process-level configuration: model location, device, limits, prompts.
//!
//! Loaded once at startup (defaults, then an optional JSON file, then
//! environment overrides) and treated as read-only afterwards.

use super::errors::{ConfigError, ConfigValidator};
use super::generation::GenerationParams;
use crate::prompt::PromptTemplates;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Overrides the model directory.
pub const ENV_MODEL_DIR: &str = "HME_MODEL_DIR";
/// Overrides the checkpoint file name inside the model directory.
pub const ENV_CHECKPOINT: &str = "HME_CHECKPOINT";
/// Overrides the device string.
pub const ENV_DEVICE: &str = "HME_DEVICE";
/// Fallback device variable.
pub const ENV_DEVICE_FALLBACK: &str = "DEVICE";
/// Overrides the default token budget.
pub const ENV_MAX_NEW_TOKENS: &str = "HME_MAX_NEW_TOKENS";

/// Where the model artifact lives on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelLocation {
    /// Directory holding the checkpoint, `config.json` and `tokenizer.json`.
    pub model_dir: PathBuf,
    /// Weight file name inside `model_dir`.
    pub checkpoint_filename: String,
}

impl Default for ModelLocation {
    fn default() -> Self {
        Self {
            model_dir: PathBuf::from("weights"),
            checkpoint_filename: "model.safetensors".to_string(),
        }
    }
}

impl ModelLocation {
    pub fn new(model_dir: impl Into<PathBuf>, checkpoint_filename: impl Into<String>) -> Self {
        Self {
            model_dir: model_dir.into(),
            checkpoint_filename: checkpoint_filename.into(),
        }
    }

    /// Full path of the weight file.
    pub fn checkpoint_path(&self) -> PathBuf {
        self.model_dir.join(&self.checkpoint_filename)
    }

    /// Path of another artifact in the model directory.
    pub fn artifact(&self, file_name: &str) -> PathBuf {
        self.model_dir.join(file_name)
    }
}

/// Maximum input image size; larger uploads are downscaled on read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageLimits {
    pub max_width: u32,
    pub max_height: u32,
}

impl Default for ImageLimits {
    fn default() -> Self {
        Self {
            max_width: 1024,
            max_height: 1024,
        }
    }
}

/// Complete application configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub app_title: String,
    pub model: ModelLocation,
    /// `cpu`, `cuda`, `cuda:N` or `metal`.
    pub device: String,
    pub image_limits: ImageLimits,
    pub generation: GenerationParams,
    pub prompts: PromptTemplates,
    pub default_prompt_key: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            app_title: "HME LaTeX - Handwritten Math Expression Recognition".to_string(),
            model: ModelLocation::default(),
            device: default_device(std::env::var_os("CUDA_VISIBLE_DEVICES").is_some()),
            image_limits: ImageLimits::default(),
            generation: GenerationParams::default(),
            prompts: PromptTemplates::default(),
            default_prompt_key: PromptTemplates::MATH_TO_LATEX.to_string(),
        }
    }
}

fn default_device(cuda_visible: bool) -> String {
    if cuda_visible { "cuda" } else { "cpu" }.to_string()
}

impl AppConfig {
    /// Reads a JSON configuration file. Missing fields take their defaults.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self =
            serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults with process environment overrides applied.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_env_overrides()
    }

    /// Applies overrides from the process environment.
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides_from(|name| std::env::var(name).ok())
    }

    /// Applies overrides from `lookup`, which maps a variable name to its value.
    pub fn with_overrides_from<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(dir) = non_empty(ENV_MODEL_DIR) {
            self.model.model_dir = PathBuf::from(dir);
        }
        if let Some(file) = non_empty(ENV_CHECKPOINT) {
            self.model.checkpoint_filename = file;
        }
        if let Some(device) = non_empty(ENV_DEVICE).or_else(|| non_empty(ENV_DEVICE_FALLBACK)) {
            self.device = device.trim().to_lowercase();
        }
        if let Some(raw) = non_empty(ENV_MAX_NEW_TOKENS) {
            let tokens: usize = raw.trim().parse().map_err(|e: std::num::ParseIntError| {
                ConfigError::InvalidEnv {
                    name: ENV_MAX_NEW_TOKENS,
                    value: raw.clone(),
                    message: e.to_string(),
                }
            })?;
            self.generation = self.generation.with_max_new_tokens(tokens).map_err(|e| {
                ConfigError::InvalidEnv {
                    name: ENV_MAX_NEW_TOKENS,
                    value: raw.clone(),
                    message: e.to_string(),
                }
            })?;
        }

        self.validate()?;
        Ok(self)
    }
}

/// Checks the syntax of a device string without creating the device.
pub fn validate_device_str(device: &str) -> Result<(), ConfigError> {
    let device = device.trim().to_lowercase();
    let ordinal_ok = |prefix: &str| {
        device
            .strip_prefix(prefix)
            .is_some_and(|n| n.parse::<usize>().is_ok())
    };
    if matches!(device.as_str(), "cpu" | "cuda" | "gpu" | "metal")
        || ordinal_ok("cuda:")
        || ordinal_ok("metal:")
    {
        Ok(())
    } else {
        Err(ConfigError::InvalidConfig {
            message: format!("unknown device '{device}'; use 'cpu', 'cuda', 'cuda:N' or 'metal'"),
        })
    }
}

impl ConfigValidator for AppConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        self.validate_file_name(&self.model.checkpoint_filename, "checkpoint_filename")?;
        if self.model.model_dir.as_os_str().is_empty() {
            return Err(ConfigError::InvalidConfig {
                message: "model_dir must not be empty".to_string(),
            });
        }
        validate_device_str(&self.device)?;
        self.validate_image_dimensions(self.image_limits.max_width, self.image_limits.max_height)?;
        self.generation.validate()?;
        if self.prompts.get(&self.default_prompt_key).is_none() {
            return Err(ConfigError::InvalidConfig {
                message: format!(
                    "default_prompt_key '{}' is not among the configured prompts",
                    self.default_prompt_key
                ),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(
            config.model.checkpoint_path(),
            PathBuf::from("weights").join("model.safetensors")
        );
        assert_eq!(config.image_limits.max_width, 1024);
    }

    #[test]
    fn test_default_device_follows_cuda_visibility() {
        assert_eq!(default_device(true), "cuda");
        assert_eq!(default_device(false), "cpu");
    }

    #[test]
    fn test_env_overrides() {
        let config = AppConfig::default()
            .with_overrides_from(lookup(&[
                (ENV_MODEL_DIR, "/opt/models/trocr-math"),
                (ENV_CHECKPOINT, "weights.safetensors"),
                (ENV_DEVICE_FALLBACK, "CUDA:1"),
                (ENV_MAX_NEW_TOKENS, "128"),
            ]))
            .unwrap();
        assert_eq!(config.model.model_dir, PathBuf::from("/opt/models/trocr-math"));
        assert_eq!(config.model.checkpoint_filename, "weights.safetensors");
        assert_eq!(config.device, "cuda:1");
        assert_eq!(config.generation.max_new_tokens(), 128);
    }

    #[test]
    fn test_primary_device_var_wins() {
        let config = AppConfig::default()
            .with_overrides_from(lookup(&[(ENV_DEVICE, "cpu"), (ENV_DEVICE_FALLBACK, "cuda")]))
            .unwrap();
        assert_eq!(config.device, "cpu");
    }

    #[test]
    fn test_invalid_env_values_are_rejected() {
        let err = AppConfig::default()
            .with_overrides_from(lookup(&[(ENV_MAX_NEW_TOKENS, "lots")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { .. }));

        let err = AppConfig::default()
            .with_overrides_from(lookup(&[(ENV_MAX_NEW_TOKENS, "0")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { .. }));

        let err = AppConfig::default()
            .with_overrides_from(lookup(&[(ENV_DEVICE, "tpu")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidConfig { .. }));
    }

    #[test]
    fn test_from_path_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{
                "device": "cpu",
                "model": { "model_dir": "/srv/hme" },
                "generation": { "max_new_tokens": 256 },
                "prompts": { "math_to_latex": "Transcribe to LaTeX.", "matrix": "Transcribe the matrix." }
            }"#,
        )
        .unwrap();

        let config = AppConfig::from_path(&path).unwrap();
        assert_eq!(config.model.model_dir, PathBuf::from("/srv/hme"));
        assert_eq!(config.model.checkpoint_filename, "model.safetensors");
        assert_eq!(config.generation.max_new_tokens(), 256);
        assert_eq!(config.prompts.get("matrix"), Some("Transcribe the matrix."));
    }

    #[test]
    fn test_from_path_rejects_missing_default_prompt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "device": "cpu", "prompts": { "other": "x" } }"#).unwrap();
        assert!(matches!(
            AppConfig::from_path(&path),
            Err(ConfigError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_from_path_reports_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            AppConfig::from_path(&path),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_device_syntax() {
        for ok in ["cpu", "CUDA", "cuda:0", "gpu", "metal", "metal:1"] {
            assert!(validate_device_str(ok).is_ok(), "{ok}");
        }
        for bad in ["", "cuda:", "cuda:x", "tpu"] {
            assert!(validate_device_str(bad).is_err(), "{bad}");
        }
    }
}
