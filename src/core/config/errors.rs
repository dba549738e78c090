//! Configuration error types and validation traits.

use std::path::Path;
use thiserror::Error;

/// Errors that can occur during configuration loading and validation.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A configuration file could not be read.
    #[error("failed to read configuration file {path}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A configuration file could not be parsed.
    #[error("failed to parse configuration file {path}")]
    Parse {
        path: std::path::PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Error indicating that a configuration is invalid.
    #[error("invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// A value is outside its permitted range.
    #[error("{field} must be {expected}, got {actual}")]
    OutOfRange {
        field: &'static str,
        expected: &'static str,
        actual: String,
    },

    /// An environment variable override could not be parsed.
    #[error("environment variable {name}='{value}' is invalid: {message}")]
    InvalidEnv {
        name: &'static str,
        value: String,
        message: String,
    },
}

/// A trait for validating configuration parameters.
///
/// Implementors provide [`validate`](ConfigValidator::validate); the
/// provided methods are small range checks shared by every config type.
pub trait ConfigValidator {
    /// Validates the configuration.
    fn validate(&self) -> Result<(), ConfigError>;

    /// Validates that an integer is at least `min`.
    fn validate_min_usize(
        &self,
        value: usize,
        min: usize,
        field: &'static str,
        expected: &'static str,
    ) -> Result<(), ConfigError> {
        if value < min {
            Err(ConfigError::OutOfRange {
                field,
                expected,
                actual: value.to_string(),
            })
        } else {
            Ok(())
        }
    }

    /// Validates a float value is finite and within `[min, max]`.
    fn validate_f32_range(
        &self,
        value: f32,
        min: f32,
        max: f32,
        field: &'static str,
        expected: &'static str,
    ) -> Result<(), ConfigError> {
        if !value.is_finite() || value < min || value > max {
            Err(ConfigError::OutOfRange {
                field,
                expected,
                actual: value.to_string(),
            })
        } else {
            Ok(())
        }
    }

    /// Validates image dimensions.
    ///
    /// This method checks that image dimensions are positive.
    fn validate_image_dimensions(&self, width: u32, height: u32) -> Result<(), ConfigError> {
        if width == 0 || height == 0 {
            Err(ConfigError::InvalidConfig {
                message: format!("image limits must be positive, got {width}x{height}"),
            })
        } else {
            Ok(())
        }
    }

    /// Validates that a file name is non-empty and names a single path component.
    fn validate_file_name(&self, name: &str, field: &'static str) -> Result<(), ConfigError> {
        let path = Path::new(name);
        if name.trim().is_empty() || path.components().count() != 1 {
            Err(ConfigError::InvalidConfig {
                message: format!("{field} must be a plain file name, got '{name}'"),
            })
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Probe;

    impl ConfigValidator for Probe {
        fn validate(&self) -> Result<(), ConfigError> {
            Ok(())
        }
    }

    #[test]
    fn test_f32_range_rejects_nan() {
        let err = Probe
            .validate_f32_range(f32::NAN, 0.0, 1.0, "temperature", "within [0, 1]")
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::OutOfRange {
                field: "temperature",
                ..
            }
        ));
    }

    #[test]
    fn test_file_name_rejects_paths() {
        assert!(Probe.validate_file_name("model.safetensors", "checkpoint").is_ok());
        assert!(Probe.validate_file_name("nested/model.bin", "checkpoint").is_err());
        assert!(Probe.validate_file_name("  ", "checkpoint").is_err());
    }

    #[test]
    fn test_image_dimensions() {
        assert!(Probe.validate_image_dimensions(1024, 1024).is_ok());
        assert!(Probe.validate_image_dimensions(0, 1024).is_err());
    }
}
