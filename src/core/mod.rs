//! Core building blocks: configuration, error handling and logging setup.

pub mod config;
pub mod errors;

pub use config::{AppConfig, ConfigError, ConfigValidator, GenerationParams};
pub use errors::{BoxError, CapabilityError, ErrorKind, HmeError, HmeResult, Locale};

/// Initializes the tracing subscriber for logging.
///
/// Filtering follows `RUST_LOG`. Call once at process start.
pub fn init_tracing() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();
}
