//! The seam between the pipeline and a recognition model.
//!
//! A backend provides a [`ModelLoader`] that acquires the model once and a
//! [`RecognitionModel`] that turns a prompt into tokens. Backends report
//! failures as [`BoxError`]; the handle and the invoker map them into the
//! pipeline's error kinds.

use crate::core::config::{GenerationParams, ModelLocation};
use crate::core::errors::BoxError;
use crate::prompt::PromptContext;

/// A prompt serialized into a model's input encoding.
pub trait EncodedPrompt {
    /// Number of leading tokens in a generated sequence that echo the prompt.
    fn prompt_len(&self) -> usize;
}

/// A loaded recognition model.
pub trait RecognitionModel: Send + Sync {
    /// The model's input encoding.
    type Input: EncodedPrompt;

    /// Backend name for logs.
    fn name(&self) -> &str;

    /// Serializes the image and instruction into the model's input encoding.
    fn encode(&self, prompt: &PromptContext<'_>) -> Result<Self::Input, BoxError>;

    /// Runs generation.
    ///
    /// Returns the whole sequence: the echoed prompt (`input.prompt_len()`
    /// tokens) followed by at most `params.max_new_tokens()` new tokens.
    fn generate(&self, input: &Self::Input, params: &GenerationParams)
    -> Result<Vec<u32>, BoxError>;

    /// Decodes token ids to text.
    fn decode(&self, tokens: &[u32]) -> Result<String, BoxError>;
}

/// Acquires a [`RecognitionModel`] from its on-disk artifacts.
pub trait ModelLoader: Send + Sync {
    type Model: RecognitionModel;

    /// Backend name for logs and [`ModelInfo`](super::ModelInfo).
    fn backend_name(&self) -> &str;

    /// Loads the model. `location` has already been checked to exist.
    fn load(&self, location: &ModelLocation, device: &str) -> Result<Self::Model, BoxError>;
}
