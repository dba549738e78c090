//! TrOCR vision encoder-decoder backend built on candle-transformers.
//!
//! The model directory holds `config.json` (with `encoder` and `decoder`
//! sections), `tokenizer.json` and the safetensors checkpoint named by
//! [`ModelLocation::checkpoint_filename`].

use super::capability::{EncodedPrompt, ModelLoader, RecognitionModel};
use crate::core::config::{ConfigError, GenerationParams, ModelLocation};
use crate::core::errors::{BoxError, CapabilityError};
use crate::prompt::PromptContext;
use crate::utils::{candle_context, parse_device};
use candle_core::{DType, Device, Tensor};
use candle_nn::{Module, VarBuilder};
use candle_transformers::generation::{LogitsProcessor, Sampling};
use candle_transformers::models::{trocr, vit};
use image::RgbImage;
use rayon::prelude::*;
use serde::Deserialize;
use std::path::Path;
use std::sync::{Mutex, PoisonError};
use tokenizers::Tokenizer;
use tokenizers::decoders::byte_level::ByteLevel;
use tracing::debug;

const MODEL_NAME: &str = "TrOCR";

#[derive(Debug, Deserialize)]
struct EncoderGeometry {
    image_size: usize,
}

#[derive(Debug, Deserialize)]
struct DecoderTokens {
    decoder_start_token_id: u32,
    eos_token_id: u32,
}

/// Parsed `config.json` of a TrOCR checkpoint.
struct TrOcrConfig {
    encoder: vit::Config,
    decoder: trocr::TrOCRConfig,
    image_size: usize,
    tokens: DecoderTokens,
}

impl TrOcrConfig {
    fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let value: serde_json::Value =
            serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        let section = |name: &str| {
            value
                .get(name)
                .cloned()
                .ok_or_else(|| ConfigError::InvalidConfig {
                    message: format!("{} is missing the '{name}' section", path.display()),
                })
        };
        let parse = |source: serde_json::Error| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        };

        let encoder_value = section("encoder")?;
        let decoder_value = section("decoder")?;
        let geometry: EncoderGeometry =
            serde_json::from_value(encoder_value.clone()).map_err(parse)?;
        if geometry.image_size == 0 {
            return Err(ConfigError::InvalidConfig {
                message: "encoder image_size must be greater than 0".to_string(),
            });
        }
        Ok(Self {
            encoder: serde_json::from_value(encoder_value).map_err(parse)?,
            tokens: serde_json::from_value(decoder_value.clone()).map_err(parse)?,
            decoder: serde_json::from_value(decoder_value).map_err(parse)?,
            image_size: geometry.image_size,
        })
    }
}

/// Loads TrOCR checkpoints.
#[derive(Debug, Clone, Default)]
pub struct TrOcrLoader {
    instruction_prefix: bool,
}

impl TrOcrLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds the tokenized instruction to the decoder after the start token.
    ///
    /// Stock TrOCR checkpoints are unconditioned, so this is off by default.
    pub fn with_instruction_prefix(mut self, enabled: bool) -> Self {
        self.instruction_prefix = enabled;
        self
    }
}

impl ModelLoader for TrOcrLoader {
    type Model = TrOcr;

    fn backend_name(&self) -> &str {
        "trocr"
    }

    fn load(&self, location: &ModelLocation, device: &str) -> Result<TrOcr, BoxError> {
        TrOcr::from_location(location, device, self.instruction_prefix)
    }
}

/// A loaded TrOCR model.
pub struct TrOcr {
    device: Device,
    image_size: usize,
    decoder_start_token_id: u32,
    eos_token_id: u32,
    instruction_prefix: bool,
    tokenizer: Tokenizer,
    // decode() mutates the KV cache
    model: Mutex<trocr::TrOCRModel>,
}

impl TrOcr {
    fn from_location(
        location: &ModelLocation,
        device: &str,
        instruction_prefix: bool,
    ) -> Result<Self, BoxError> {
        let device = parse_device(device)?;
        let cfg = TrOcrConfig::from_path(location.artifact("config.json"))?;

        let mut tokenizer = Tokenizer::from_file(location.artifact("tokenizer.json"))
            .map_err(|e| CapabilityError::new(MODEL_NAME, "load tokenizer.json", e))?;
        if tokenizer.get_decoder().is_none() {
            tokenizer.with_decoder(Some(ByteLevel::default()));
        }

        let checkpoint = location.checkpoint_path();
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[&checkpoint], DType::F32, &device).map_err(
                |e| {
                    candle_context(
                        MODEL_NAME,
                        format!("load {}", checkpoint.display()),
                        e,
                    )
                },
            )?
        };
        let model = trocr::TrOCRModel::new(&cfg.encoder, &cfg.decoder, vb)
            .map_err(|e| candle_context(MODEL_NAME, "build model", e))?;

        Ok(Self {
            device,
            image_size: cfg.image_size,
            decoder_start_token_id: cfg.tokens.decoder_start_token_id,
            eos_token_id: cfg.tokens.eos_token_id,
            instruction_prefix,
            tokenizer,
            model: Mutex::new(model),
        })
    }

    pub fn device(&self) -> &Device {
        &self.device
    }
}

/// Encoded TrOCR prompt: pixel tensor plus the decoder prefix.
pub struct TrOcrInput {
    pixel_values: Tensor,
    prefix: Vec<u32>,
}

impl EncodedPrompt for TrOcrInput {
    fn prompt_len(&self) -> usize {
        self.prefix.len()
    }
}

impl RecognitionModel for TrOcr {
    type Input = TrOcrInput;

    fn name(&self) -> &str {
        MODEL_NAME
    }

    fn encode(&self, prompt: &PromptContext<'_>) -> Result<TrOcrInput, BoxError> {
        let pixel_values = preprocess_image(prompt.image(), self.image_size, &self.device)?;
        let mut prefix = vec![self.decoder_start_token_id];
        if self.instruction_prefix {
            let encoding = self
                .tokenizer
                .encode(prompt.instruction(), false)
                .map_err(|e| CapabilityError::new(MODEL_NAME, "tokenize instruction", e))?;
            prefix.extend_from_slice(encoding.get_ids());
        }
        Ok(TrOcrInput {
            pixel_values,
            prefix,
        })
    }

    fn generate(
        &self,
        input: &TrOcrInput,
        params: &GenerationParams,
    ) -> Result<Vec<u32>, BoxError> {
        let mut model = self.model.lock().unwrap_or_else(PoisonError::into_inner);
        model.reset_kv_cache();

        let encoder_xs = model
            .encoder()
            .forward(&input.pixel_values)
            .map_err(|e| candle_context(MODEL_NAME, "encoder forward", e))?;

        let mut processor = LogitsProcessor::from_sampling(params.seed(), sampling_for(params));
        let mut tokens = input.prefix.clone();

        for index in 0..params.max_new_tokens() {
            let context_size = if index == 0 { tokens.len() } else { 1 };
            let start_pos = tokens.len() - context_size;
            let input_ids = Tensor::new(&tokens[start_pos..], &self.device)
                .and_then(|t| t.unsqueeze(0))
                .map_err(|e| candle_context(MODEL_NAME, "create input_ids", e))?;

            let logits = model
                .decode(&input_ids, &encoder_xs, start_pos)
                .map_err(|e| candle_context(MODEL_NAME, "decoder forward", e))?;
            let logits = logits
                .squeeze(0)
                .and_then(|l| {
                    let last = l.dim(0)? - 1;
                    l.get(last)
                })
                .and_then(|l| l.to_dtype(DType::F32))
                .map_err(|e| candle_context(MODEL_NAME, "select last logits", e))?;

            let logits = if params.repetition_penalty() == 1.0 {
                logits
            } else {
                candle_transformers::utils::apply_repeat_penalty(
                    &logits,
                    params.repetition_penalty(),
                    &tokens,
                )
                .map_err(|e| candle_context(MODEL_NAME, "repeat penalty", e))?
            };

            let next_token = processor
                .sample(&logits)
                .map_err(|e| candle_context(MODEL_NAME, "sample", e))?;
            if next_token == self.eos_token_id {
                debug!("eos after {index} tokens");
                break;
            }
            tokens.push(next_token);
        }
        Ok(tokens)
    }

    fn decode(&self, tokens: &[u32]) -> Result<String, BoxError> {
        self.tokenizer
            .decode(tokens, true)
            .map_err(|e| CapabilityError::new(MODEL_NAME, "decode tokens", e).into())
    }
}

/// Maps generation parameters onto a candle sampling strategy.
fn sampling_for(params: &GenerationParams) -> Sampling {
    let temperature = f64::from(params.temperature());
    let top_p = f64::from(params.top_p());
    if !params.sampling() || temperature <= 0.0 {
        Sampling::ArgMax
    } else if top_p >= 1.0 {
        Sampling::All { temperature }
    } else {
        Sampling::TopP {
            p: top_p,
            temperature,
        }
    }
}

/// Resizes to the encoder's square input and normalizes to `[-1, 1]` in CHW order.
fn preprocess_image(
    image: &RgbImage,
    image_size: usize,
    device: &Device,
) -> Result<Tensor, CapabilityError> {
    let side = image_size as u32;
    let resized =
        image::imageops::resize(image, side, side, image::imageops::FilterType::CatmullRom);

    let plane = image_size * image_size;
    let raw = resized.as_raw();
    let mut data = vec![0f32; 3 * plane];
    data.par_chunks_mut(plane)
        .enumerate()
        .for_each(|(channel, out)| {
            for (i, value) in out.iter_mut().enumerate() {
                let pixel = f32::from(raw[i * 3 + channel]) / 255.0;
                *value = (pixel - 0.5) / 0.5;
            }
        });

    Tensor::from_vec(data, (1, 3, image_size, image_size), device)
        .map_err(|e| candle_context(MODEL_NAME, "create image tensor", e))
}
