//! Configuration for the recognition pipeline.
//!
//! This module provides the application configuration, generation
//! parameters and the validation trait shared by both.

pub mod app;
pub mod errors;
pub mod generation;

pub use app::{AppConfig, ImageLimits, ModelLocation, validate_device_str};
pub use errors::{ConfigError, ConfigValidator};
pub use generation::GenerationParams;
