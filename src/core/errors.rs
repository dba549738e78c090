//! Error types for the recognition pipeline.
//!
//! The pipeline exposes a closed taxonomy ([`HmeError`] / [`ErrorKind`]) to its
//! callers. Every fault raised by a collaborator (the model capability, the
//! tokenizer, the image decoder) is converted into one of these kinds at the
//! boundary where it is observed, so nothing else ever reaches the UI.
//!
//! # Usage
//!
//! ```rust
//! use hme_latex::core::errors::{ErrorKind, HmeError, Locale};
//!
//! let error = HmeError::UnknownPromptKey { key: "chart".to_string() };
//! assert_eq!(error.kind(), ErrorKind::UnknownPromptKey);
//!
//! // What the UI renders; the raw text above is only logged.
//! let message = error.kind().user_message(Locale::English);
//! assert!(!message.is_empty());
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Boxed error returned by model capabilities before it is mapped into [`HmeError`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Convenient result alias for pipeline operations.
pub type HmeResult<T> = Result<T, HmeError>;

/// Errors surfaced by the image-to-LaTeX pipeline.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HmeError {
    /// The model directory or checkpoint file is absent at the configured path.
    #[error("model checkpoint not found: {}", path.display())]
    MissingCheckpoint {
        /// Path that was probed.
        path: PathBuf,
    },

    /// The capability raised an error while initializing.
    #[error("model load failed: {message}")]
    LoadError {
        /// Full error chain reported by the capability.
        message: String,
    },

    /// Generation was attempted before a successful load.
    #[error("model is not ready")]
    ModelNotReady,

    /// The prompt key is not present in the configured templates.
    #[error("unknown prompt key: '{key}'")]
    UnknownPromptKey {
        /// The key that was requested.
        key: String,
    },

    /// The capability failed while generating.
    #[error("generation failed: {message}")]
    GenerationError {
        /// Full error chain reported by the capability.
        message: String,
    },

    /// Extraction yielded a blank string.
    #[error("no LaTeX could be extracted from the model output")]
    EmptyResult,

    /// No image was supplied, or the image failed validation.
    #[error("invalid image: {message}")]
    InvalidImage {
        /// Why the image was rejected.
        message: String,
    },
}

/// The closed set of error kinds visible to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    MissingCheckpoint,
    LoadError,
    ModelNotReady,
    UnknownPromptKey,
    GenerationError,
    EmptyResult,
    InvalidImage,
}

/// Languages the UI can render error messages in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Locale {
    #[default]
    English,
    Vietnamese,
}

impl Locale {
    /// Parses a language tag such as `en`, `vi` or `vi-VN`.
    pub fn from_tag(tag: &str) -> Option<Self> {
        let primary = tag.split(['-', '_']).next().unwrap_or_default();
        match primary.to_ascii_lowercase().as_str() {
            "en" | "english" => Some(Self::English),
            "vi" | "vietnamese" => Some(Self::Vietnamese),
            _ => None,
        }
    }
}

impl ErrorKind {
    /// Every kind, in declaration order.
    pub const ALL: [ErrorKind; 7] = [
        ErrorKind::MissingCheckpoint,
        ErrorKind::LoadError,
        ErrorKind::ModelNotReady,
        ErrorKind::UnknownPromptKey,
        ErrorKind::GenerationError,
        ErrorKind::EmptyResult,
        ErrorKind::InvalidImage,
    ];

    /// Stable machine-readable name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MissingCheckpoint => "missing_checkpoint",
            Self::LoadError => "load_error",
            Self::ModelNotReady => "model_not_ready",
            Self::UnknownPromptKey => "unknown_prompt_key",
            Self::GenerationError => "generation_error",
            Self::EmptyResult => "empty_result",
            Self::InvalidImage => "invalid_image",
        }
    }

    /// The message shown to the user for this kind.
    ///
    /// Each kind maps to exactly one message per locale.
    pub fn user_message(self, locale: Locale) -> &'static str {
        match (locale, self) {
            (Locale::English, Self::MissingCheckpoint) => {
                "Model checkpoint not found. Place the checkpoint in the model directory or set HME_MODEL_DIR / HME_CHECKPOINT."
            }
            (Locale::English, Self::LoadError) => "The recognition model failed to load.",
            (Locale::English, Self::ModelNotReady) => "The recognition model is not ready yet.",
            (Locale::English, Self::UnknownPromptKey) => {
                "The requested recognition task is not configured."
            }
            (Locale::English, Self::GenerationError) => {
                "Recognition failed while running the model."
            }
            (Locale::English, Self::EmptyResult) => "No LaTeX could be recognized in this image.",
            (Locale::English, Self::InvalidImage) => "Please upload a valid image first.",
            (Locale::Vietnamese, Self::MissingCheckpoint) => {
                "Chưa tìm thấy checkpoint mô hình. Hãy đặt file checkpoint vào thư mục mô hình hoặc cấu hình HME_MODEL_DIR / HME_CHECKPOINT."
            }
            (Locale::Vietnamese, Self::LoadError) => "Không thể tải mô hình nhận dạng.",
            (Locale::Vietnamese, Self::ModelNotReady) => "Mô hình nhận dạng chưa sẵn sàng.",
            (Locale::Vietnamese, Self::UnknownPromptKey) => {
                "Tác vụ nhận dạng được yêu cầu chưa được cấu hình."
            }
            (Locale::Vietnamese, Self::GenerationError) => {
                "Không nhận dạng được. Kiểm tra model/checkpoint."
            }
            (Locale::Vietnamese, Self::EmptyResult) => {
                "Không nhận dạng được công thức trong ảnh."
            }
            (Locale::Vietnamese, Self::InvalidImage) => "Vui lòng upload ảnh trước.",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl HmeError {
    /// Returns the externally visible kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MissingCheckpoint { .. } => ErrorKind::MissingCheckpoint,
            Self::LoadError { .. } => ErrorKind::LoadError,
            Self::ModelNotReady => ErrorKind::ModelNotReady,
            Self::UnknownPromptKey { .. } => ErrorKind::UnknownPromptKey,
            Self::GenerationError { .. } => ErrorKind::GenerationError,
            Self::EmptyResult => ErrorKind::EmptyResult,
            Self::InvalidImage { .. } => ErrorKind::InvalidImage,
        }
    }

    /// Shorthand for [`ErrorKind::user_message`] on this error's kind.
    pub fn user_message(&self, locale: Locale) -> &'static str {
        self.kind().user_message(locale)
    }

    /// Creates an `InvalidImage` error.
    pub fn invalid_image(message: impl Into<String>) -> Self {
        Self::InvalidImage {
            message: message.into(),
        }
    }

    /// Creates a `GenerationError` carrying the whole source chain of `err`.
    pub fn generation(err: &(dyn std::error::Error + 'static)) -> Self {
        Self::GenerationError {
            message: error_chain(err),
        }
    }
}

/// Error raised inside a capability, tagged with the model and the step that failed.
///
/// Mirrors how inference errors are annotated before being boxed, so the
/// message recorded in `LoadError` / `GenerationError` names the failing step.
#[derive(Error, Debug)]
#[error("{model_name}: {context}")]
pub struct CapabilityError {
    /// Backend that raised the error.
    pub model_name: String,
    /// The step that failed.
    pub context: String,
    /// Underlying cause.
    #[source]
    pub source: BoxError,
}

impl CapabilityError {
    pub fn new(
        model_name: impl Into<String>,
        context: impl Into<String>,
        source: impl Into<BoxError>,
    ) -> Self {
        Self {
            model_name: model_name.into(),
            context: context.into(),
            source: source.into(),
        }
    }
}

/// Flattens an error and its sources into `outer: inner: root`.
pub fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !message.ends_with(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    message
}

/// Renders a panic payload captured by `catch_unwind`.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}
