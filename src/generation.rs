//! Runs one generation against a ready model and returns the decoded continuation.

use crate::core::config::GenerationParams;
use crate::core::errors::{BoxError, HmeError, panic_message};
use crate::model::{EncodedPrompt, ModelHandle, ModelLoader, RecognitionModel};
use crate::prompt::PromptContext;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::Instant;
use tracing::{debug, warn};

/// Decoded text produced by one generation call, echo excluded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawGeneration {
    pub text: String,
    /// Number of tokens generated after the prompt.
    pub new_tokens: usize,
}

/// Invokes generation on a [`ModelHandle`] that has already been loaded.
#[derive(Debug, Clone, Copy, Default)]
pub struct GenerationInvoker;

impl GenerationInvoker {
    pub fn new() -> Self {
        Self
    }

    /// Generates the continuation for `prompt`.
    ///
    /// Fails with `ModelNotReady` without touching the model unless the
    /// handle is `Ready`. Every error or panic raised by the backend is
    /// reported as `GenerationError`.
    pub fn run<L: ModelLoader>(
        &self,
        prompt: &PromptContext<'_>,
        params: &GenerationParams,
        handle: &ModelHandle<L>,
    ) -> Result<RawGeneration, HmeError> {
        let model = handle.ready_model().ok_or(HmeError::ModelNotReady)?;

        let started = Instant::now();
        let outcome = catch_unwind(AssertUnwindSafe(|| generate(&*model, prompt, params)));
        let raw = match outcome {
            Ok(Ok(raw)) => raw,
            Ok(Err(err)) => {
                let err = HmeError::generation(&*err);
                warn!("{} generation failed: {err}", model.name());
                return Err(err);
            }
            Err(payload) => {
                let message = format!("generation panicked: {}", panic_message(&*payload));
                warn!("{} {message}", model.name());
                return Err(HmeError::GenerationError { message });
            }
        };

        debug!(
            "{} generated {} tokens in {:.2}ms (prompt key {})",
            model.name(),
            raw.new_tokens,
            started.elapsed().as_secs_f64() * 1000.0,
            prompt.prompt_key()
        );
        Ok(raw)
    }
}

fn generate<M: RecognitionModel>(
    model: &M,
    prompt: &PromptContext<'_>,
    params: &GenerationParams,
) -> Result<RawGeneration, BoxError> {
    let input = model.encode(prompt)?;
    let sequence = model.generate(&input, params)?;
    let echo = input.prompt_len().min(sequence.len());
    let continuation = &sequence[echo..];
    Ok(RawGeneration {
        text: model.decode(continuation)?,
        new_tokens: continuation.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::ModelLocation;
    use crate::model::StubLoader;
    use crate::prompt::PromptBuilder;
    use image::RgbImage;

    fn ready_handle(loader: StubLoader) -> (tempfile::TempDir, ModelHandle<StubLoader>) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("model.safetensors"), b"").unwrap();
        let location = ModelLocation::new(dir.path(), "model.safetensors");
        let handle = ModelHandle::new(loader, location, "cpu");
        handle.ensure_loaded().unwrap();
        (dir, handle)
    }

    #[test]
    fn test_model_not_ready_is_fail_fast() {
        let loader = StubLoader::new();
        let counters = loader.counters();
        let handle = ModelHandle::new(loader, ModelLocation::default(), "cpu");
        let builder = PromptBuilder::default();
        let image = RgbImage::new(4, 4);
        let prompt = builder.build("math_to_latex", &image).unwrap();

        let err = GenerationInvoker::new()
            .run(&prompt, &GenerationParams::default(), &handle)
            .unwrap_err();
        assert_eq!(err, HmeError::ModelNotReady);
        assert_eq!(counters.loads(), 0);
        assert_eq!(counters.encodes(), 0);
        assert_eq!(counters.generations(), 0);
    }

    #[test]
    fn test_echo_is_trimmed() {
        let (_dir, handle) = ready_handle(StubLoader::new().with_reply("$x^2$"));
        let builder = PromptBuilder::default();
        let image = RgbImage::new(4, 4);
        let prompt = builder.build("math_to_latex", &image).unwrap();

        let raw = GenerationInvoker::new()
            .run(&prompt, &GenerationParams::default(), &handle)
            .unwrap();
        assert_eq!(raw.text, "$x^2$");
        assert_eq!(raw.new_tokens, 5);
    }

    #[test]
    fn test_backend_error_becomes_generation_error() {
        let (_dir, handle) = ready_handle(StubLoader::new().failing_generation("out of memory"));
        let builder = PromptBuilder::default();
        let image = RgbImage::new(4, 4);
        let prompt = builder.build("math_to_latex", &image).unwrap();

        let err = GenerationInvoker::new()
            .run(&prompt, &GenerationParams::default(), &handle)
            .unwrap_err();
        assert!(matches!(&err, HmeError::GenerationError { message } if message.contains("out of memory")));
    }

    #[test]
    fn test_backend_panic_becomes_generation_error() {
        let (_dir, handle) = ready_handle(StubLoader::new().panicking_generation());
        let builder = PromptBuilder::default();
        let image = RgbImage::new(4, 4);
        let prompt = builder.build("math_to_latex", &image).unwrap();

        let err = GenerationInvoker::new()
            .run(&prompt, &GenerationParams::default(), &handle)
            .unwrap_err();
        assert!(matches!(&err, HmeError::GenerationError { message } if message.contains("panicked")));
    }
}
