//! Candle device selection and candle error mapping.

use crate::core::config::ConfigError;
use crate::core::errors::CapabilityError;
use candle_core::Device;

#[cfg(not(feature = "cuda"))]
fn cuda_not_enabled() -> ConfigError {
    ConfigError::InvalidConfig {
        message: "CUDA support not enabled. Compile with --features cuda".to_string(),
    }
}

#[cfg(not(feature = "metal"))]
fn metal_not_enabled() -> ConfigError {
    ConfigError::InvalidConfig {
        message: "Metal support not enabled. Compile with --features metal".to_string(),
    }
}

fn parse_ordinal(device: &str, prefix: &str) -> Result<usize, ConfigError> {
    device
        .strip_prefix(prefix)
        .unwrap_or_default()
        .parse()
        .map_err(|_| ConfigError::InvalidConfig {
            message: format!("Invalid device ordinal in '{device}'"),
        })
}

/// Parses a device string and creates a Candle [`Device`].
///
/// # Supported formats
///
/// - `"cpu"` → CPU device
/// - `"cuda"` or `"gpu"` → CUDA device 0
/// - `"cuda:N"` → CUDA device N
/// - `"metal"` / `"metal:N"` → Metal device
pub fn parse_device(device_str: &str) -> Result<Device, ConfigError> {
    let device_str = device_str.trim().to_lowercase();
    match device_str.as_str() {
        "cpu" => Ok(Device::Cpu),
        s if s == "cuda" || s == "gpu" || s.starts_with("cuda:") => {
            #[cfg(feature = "cuda")]
            {
                let ordinal = if s.starts_with("cuda:") {
                    parse_ordinal(s, "cuda:")?
                } else {
                    0
                };
                Device::new_cuda(ordinal).map_err(|e| ConfigError::InvalidConfig {
                    message: format!("Failed to create CUDA device {ordinal}: {e}"),
                })
            }
            #[cfg(not(feature = "cuda"))]
            {
                if s.starts_with("cuda:") {
                    parse_ordinal(s, "cuda:")?;
                }
                Err(cuda_not_enabled())
            }
        }
        s if s == "metal" || s.starts_with("metal:") => {
            #[cfg(feature = "metal")]
            {
                let ordinal = if s.starts_with("metal:") {
                    parse_ordinal(s, "metal:")?
                } else {
                    0
                };
                Device::new_metal(ordinal).map_err(|e| ConfigError::InvalidConfig {
                    message: format!("Failed to create Metal device {ordinal}: {e}"),
                })
            }
            #[cfg(not(feature = "metal"))]
            {
                if s.starts_with("metal:") {
                    parse_ordinal(s, "metal:")?;
                }
                Err(metal_not_enabled())
            }
        }
        _ => Err(ConfigError::InvalidConfig {
            message: format!(
                "Unknown device: '{}'. Use 'cpu', 'cuda', 'cuda:N' or 'metal'",
                device_str
            ),
        }),
    }
}

/// Wraps a Candle error with the model name and failing step.
pub fn candle_context(
    model_name: &str,
    context: impl Into<String>,
    err: candle_core::Error,
) -> CapabilityError {
    CapabilityError::new(model_name, context, err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpu() {
        assert!(matches!(parse_device("CPU"), Ok(Device::Cpu)));
        assert!(matches!(parse_device(" cpu "), Ok(Device::Cpu)));
    }

    #[test]
    fn test_unknown_device() {
        assert!(parse_device("tpu").is_err());
    }

    #[cfg(not(feature = "cuda"))]
    #[test]
    fn test_cuda_without_feature() {
        let err = parse_device("cuda:0").unwrap_err();
        assert!(err.to_string().contains("--features cuda"));
        let err = parse_device("cuda:zero").unwrap_err();
        assert!(err.to_string().contains("ordinal"));
    }
}
