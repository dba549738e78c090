//! Deterministic stand-in for a real recognition model.
//!
//! The stub echoes the instruction as its "prompt tokens" (one token per
//! character) and appends a fixed reply, so the same trimming and decoding
//! path as a real model is exercised. Failures, panics and slow loads can be
//! injected for tests.

use super::capability::{EncodedPrompt, ModelLoader, RecognitionModel};
use crate::core::config::{GenerationParams, ModelLocation};
use crate::core::errors::BoxError;
use crate::prompt::PromptContext;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Call counters shared between a [`StubLoader`], its models and the test.
#[derive(Debug, Default)]
pub struct StubCounters {
    loads: AtomicUsize,
    encodes: AtomicUsize,
    generations: AtomicUsize,
}

impl StubCounters {
    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn encodes(&self) -> usize {
        self.encodes.load(Ordering::SeqCst)
    }

    pub fn generations(&self) -> usize {
        self.generations.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct StubLoader {
    reply: String,
    load_failure: Option<String>,
    generation_failure: Option<String>,
    panic_on_load: bool,
    panic_on_generate: bool,
    load_delay: Duration,
    counters: Arc<StubCounters>,
}

impl StubLoader {
    /// Reply produced when none is configured.
    pub const DEFAULT_REPLY: &'static str = r"\frac{a}{b} + c";

    pub fn new() -> Self {
        Self {
            reply: Self::DEFAULT_REPLY.to_string(),
            load_failure: None,
            generation_failure: None,
            panic_on_load: false,
            panic_on_generate: false,
            load_delay: Duration::ZERO,
            counters: Arc::new(StubCounters::default()),
        }
    }

    /// Raw text the model "generates".
    pub fn with_reply(mut self, reply: impl Into<String>) -> Self {
        self.reply = reply.into();
        self
    }

    pub fn failing_load(mut self, message: impl Into<String>) -> Self {
        self.load_failure = Some(message.into());
        self
    }

    pub fn failing_generation(mut self, message: impl Into<String>) -> Self {
        self.generation_failure = Some(message.into());
        self
    }

    pub fn panicking_load(mut self) -> Self {
        self.panic_on_load = true;
        self
    }

    pub fn panicking_generation(mut self) -> Self {
        self.panic_on_generate = true;
        self
    }

    pub fn with_load_delay(mut self, delay: Duration) -> Self {
        self.load_delay = delay;
        self
    }

    pub fn counters(&self) -> Arc<StubCounters> {
        Arc::clone(&self.counters)
    }
}

impl Default for StubLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelLoader for StubLoader {
    type Model = StubModel;

    fn backend_name(&self) -> &str {
        "stub"
    }

    fn load(&self, _location: &ModelLocation, _device: &str) -> Result<StubModel, BoxError> {
        self.counters.loads.fetch_add(1, Ordering::SeqCst);
        if !self.load_delay.is_zero() {
            std::thread::sleep(self.load_delay);
        }
        if self.panic_on_load {
            panic!("stub loader panic");
        }
        if let Some(message) = &self.load_failure {
            return Err(message.clone().into());
        }
        Ok(StubModel {
            reply: self.reply.clone(),
            generation_failure: self.generation_failure.clone(),
            panic_on_generate: self.panic_on_generate,
            counters: Arc::clone(&self.counters),
        })
    }
}

#[derive(Debug)]
pub struct StubModel {
    reply: String,
    generation_failure: Option<String>,
    panic_on_generate: bool,
    counters: Arc<StubCounters>,
}

/// Prompt encoding of the stub: one token per instruction character.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StubInput {
    pub tokens: Vec<u32>,
    pub image_size: (u32, u32),
}

impl EncodedPrompt for StubInput {
    fn prompt_len(&self) -> usize {
        self.tokens.len()
    }
}

impl RecognitionModel for StubModel {
    type Input = StubInput;

    fn name(&self) -> &str {
        "stub"
    }

    fn encode(&self, prompt: &PromptContext<'_>) -> Result<StubInput, BoxError> {
        self.counters.encodes.fetch_add(1, Ordering::SeqCst);
        Ok(StubInput {
            tokens: prompt.instruction().chars().map(u32::from).collect(),
            image_size: prompt.image().dimensions(),
        })
    }

    fn generate(&self, input: &StubInput, params: &GenerationParams) -> Result<Vec<u32>, BoxError> {
        self.counters.generations.fetch_add(1, Ordering::SeqCst);
        if self.panic_on_generate {
            panic!("stub generation panic");
        }
        if let Some(message) = &self.generation_failure {
            return Err(message.clone().into());
        }
        let mut sequence = input.tokens.clone();
        sequence.extend(
            self.reply
                .chars()
                .map(u32::from)
                .take(params.max_new_tokens()),
        );
        Ok(sequence)
    }

    fn decode(&self, tokens: &[u32]) -> Result<String, BoxError> {
        tokens
            .iter()
            .map(|&id| {
                char::from_u32(id)
                    .ok_or_else(|| -> BoxError { format!("invalid token id {id}").into() })
            })
            .collect()
    }
}
