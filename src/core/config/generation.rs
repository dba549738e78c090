//! Generation parameters passed to the recognition model.

use super::errors::{ConfigError, ConfigValidator};
use serde::{Deserialize, Serialize};

/// Decoding parameters for one generation call.
///
/// Values are validated when constructed (including deserialization), so a
/// `GenerationParams` in hand is always within range. Decoding is greedy
/// unless `sampling` is enabled; `temperature` and `top_p` are ignored
/// otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawGenerationParams")]
pub struct GenerationParams {
    max_new_tokens: usize,
    sampling: bool,
    temperature: f32,
    top_p: f32,
    repetition_penalty: f32,
    seed: u64,
}

#[derive(Deserialize)]
#[serde(default)]
struct RawGenerationParams {
    max_new_tokens: usize,
    sampling: bool,
    temperature: f32,
    top_p: f32,
    repetition_penalty: f32,
    seed: u64,
}

impl Default for RawGenerationParams {
    fn default() -> Self {
        let d = GenerationParams::default();
        Self {
            max_new_tokens: d.max_new_tokens,
            sampling: d.sampling,
            temperature: d.temperature,
            top_p: d.top_p,
            repetition_penalty: d.repetition_penalty,
            seed: d.seed,
        }
    }
}

impl TryFrom<RawGenerationParams> for GenerationParams {
    type Error = ConfigError;

    fn try_from(raw: RawGenerationParams) -> Result<Self, Self::Error> {
        let params = Self {
            max_new_tokens: raw.max_new_tokens,
            sampling: raw.sampling,
            temperature: raw.temperature,
            top_p: raw.top_p,
            repetition_penalty: raw.repetition_penalty,
            seed: raw.seed,
        };
        params.validate()?;
        Ok(params)
    }
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_new_tokens: 512,
            sampling: false,
            temperature: 0.7,
            top_p: 0.9,
            repetition_penalty: 1.05,
            seed: 299_792_458,
        }
    }
}

impl GenerationParams {
    /// Creates validated parameters with the default seed.
    pub fn new(
        max_new_tokens: usize,
        sampling: bool,
        temperature: f32,
        top_p: f32,
        repetition_penalty: f32,
    ) -> Result<Self, ConfigError> {
        let params = Self {
            max_new_tokens,
            sampling,
            temperature,
            top_p,
            repetition_penalty,
            ..Self::default()
        };
        params.validate()?;
        Ok(params)
    }

    /// Greedy decoding with the given token budget.
    pub fn greedy(max_new_tokens: usize) -> Result<Self, ConfigError> {
        Self::default().with_max_new_tokens(max_new_tokens)
    }

    pub fn with_max_new_tokens(mut self, max_new_tokens: usize) -> Result<Self, ConfigError> {
        self.max_new_tokens = max_new_tokens;
        self.validate()?;
        Ok(self)
    }

    /// Enables sampling with the given temperature and nucleus mass.
    pub fn with_sampling(mut self, temperature: f32, top_p: f32) -> Result<Self, ConfigError> {
        self.sampling = true;
        self.temperature = temperature;
        self.top_p = top_p;
        self.validate()?;
        Ok(self)
    }

    pub fn with_repetition_penalty(mut self, penalty: f32) -> Result<Self, ConfigError> {
        self.repetition_penalty = penalty;
        self.validate()?;
        Ok(self)
    }

    /// Sets the RNG seed used when sampling. Any seed is valid.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn max_new_tokens(&self) -> usize {
        self.max_new_tokens
    }

    pub fn sampling(&self) -> bool {
        self.sampling
    }

    pub fn temperature(&self) -> f32 {
        self.temperature
    }

    pub fn top_p(&self) -> f32 {
        self.top_p
    }

    pub fn repetition_penalty(&self) -> f32 {
        self.repetition_penalty
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }
}

impl ConfigValidator for GenerationParams {
    fn validate(&self) -> Result<(), ConfigError> {
        self.validate_min_usize(self.max_new_tokens, 1, "max_new_tokens", "greater than 0")?;
        self.validate_f32_range(self.temperature, 0.0, 1.0, "temperature", "within [0, 1]")?;
        if !(self.top_p.is_finite() && self.top_p > 0.0 && self.top_p <= 1.0) {
            return Err(ConfigError::OutOfRange {
                field: "top_p",
                expected: "within (0, 1]",
                actual: self.top_p.to_string(),
            });
        }
        self.validate_f32_range(
            self.repetition_penalty,
            1.0,
            f32::MAX,
            "repetition_penalty",
            "at least 1",
        )
    }
}
