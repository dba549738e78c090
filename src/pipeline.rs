//! Image to LaTeX, end to end.
//!
//! [`Pipeline::image_to_latex`] is the single entry point a UI calls. It
//! sequences validation, model loading, prompt construction, generation and
//! extraction, stopping at the first failure. Results are never cached;
//! only the model handle is shared between calls.

use crate::core::config::{AppConfig, GenerationParams, ImageLimits};
use crate::core::errors::HmeError;
use crate::extract::LatexExtractor;
use crate::generation::GenerationInvoker;
use crate::model::{ModelHandle, ModelLoader};
use crate::prompt::PromptBuilder;
use crate::utils::{fit_within, validate_image};
use image::RgbImage;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Successful pipeline result with provenance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LatexOutput {
    /// Non-empty, trimmed LaTeX.
    pub latex: String,
    /// Extraction tier that produced `latex`.
    pub tier: String,
    pub elapsed: Duration,
}

/// Composes the model handle, prompt builder, invoker and extractor.
pub struct Pipeline<L: ModelLoader> {
    handle: Arc<ModelHandle<L>>,
    prompts: PromptBuilder,
    invoker: GenerationInvoker,
    extractor: LatexExtractor,
    image_limits: ImageLimits,
    default_prompt_key: String,
    default_params: GenerationParams,
}

impl<L: ModelLoader> Pipeline<L> {
    /// Creates a pipeline over a shared model handle.
    ///
    /// # Arguments
    ///
    /// * `handle` - Model handle, possibly shared with other pipelines.
    /// * `config` - Source of the prompt templates, image limits and defaults.
    pub fn new(handle: Arc<ModelHandle<L>>, config: &AppConfig) -> Self {
        Self {
            handle,
            prompts: PromptBuilder::new(config.prompts.clone()),
            invoker: GenerationInvoker::new(),
            extractor: LatexExtractor::default(),
            image_limits: config.image_limits,
            default_prompt_key: config.default_prompt_key.clone(),
            default_params: config.generation,
        }
    }

    /// Replaces the default extraction tiers.
    pub fn with_extractor(mut self, extractor: LatexExtractor) -> Self {
        self.extractor = extractor;
        self
    }

    /// Shared model handle, for status queries and retries.
    pub fn handle(&self) -> &Arc<ModelHandle<L>> {
        &self.handle
    }

    /// Prompt builder resolving template keys for this pipeline.
    pub fn prompts(&self) -> &PromptBuilder {
        &self.prompts
    }

    /// Generation parameters used by [`image_to_latex_default`](Self::image_to_latex_default).
    pub fn default_params(&self) -> &GenerationParams {
        &self.default_params
    }

    /// Converts `image` to LaTeX using the instruction registered under `prompt_key`.
    pub fn image_to_latex(
        &self,
        image: Option<&RgbImage>,
        prompt_key: &str,
        params: &GenerationParams,
    ) -> Result<String, HmeError> {
        self.image_to_latex_detailed(image, prompt_key, params)
            .map(|output| output.latex)
    }

    /// [`image_to_latex`](Self::image_to_latex) with the configured prompt key and parameters.
    pub fn image_to_latex_default(&self, image: Option<&RgbImage>) -> Result<String, HmeError> {
        self.image_to_latex(image, &self.default_prompt_key, &self.default_params)
    }

    /// Like [`image_to_latex`](Self::image_to_latex), keeping the matched
    /// extraction tier and the elapsed time.
    ///
    /// # Arguments
    ///
    /// * `image` - Image to recognize. `None` or a zero-sized image fails
    ///   with `InvalidImage` before the model is touched.
    /// * `prompt_key` - Template key, checked before loading.
    /// * `params` - Token budget and sampling for this call.
    ///
    /// # Returns
    ///
    /// The extracted LaTeX with its provenance, or the first error raised
    /// along the way. Failures are logged at `warn` before returning.
    pub fn image_to_latex_detailed(
        &self,
        image: Option<&RgbImage>,
        prompt_key: &str,
        params: &GenerationParams,
    ) -> Result<LatexOutput, HmeError> {
        let started = Instant::now();
        let result = self.run(image, prompt_key, params, started);
        if let Err(err) = &result {
            warn!("image_to_latex failed ({}): {err}", err.kind());
        }
        result
    }

    fn run(
        &self,
        image: Option<&RgbImage>,
        prompt_key: &str,
        params: &GenerationParams,
        started: Instant,
    ) -> Result<LatexOutput, HmeError> {
        let image = validate_image(image)?;
        self.prompts.instruction(prompt_key)?;

        self.handle.ensure_loaded().map_err(HmeError::from)?;

        let image = fit_within(image, &self.image_limits);
        let prompt = self.prompts.build(prompt_key, &image)?;
        let raw = self.invoker.run(&prompt, params, &self.handle)?;
        debug!("raw model output: {:?}", raw.text);

        let extraction = self.extractor.extract_with_tier(&raw.text);
        if extraction.latex.is_empty() {
            return Err(HmeError::EmptyResult);
        }

        let elapsed = started.elapsed();
        info!(
            "extracted {} chars via {} in {:.2}ms",
            extraction.latex.len(),
            extraction.tier,
            elapsed.as_secs_f64() * 1000.0
        );
        Ok(LatexOutput {
            latex: extraction.latex,
            tier: extraction.tier,
            elapsed,
        })
    }
}
