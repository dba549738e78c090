//! Handwritten Math Expression Recognition Example
//!
//! Runs each input image through the image-to-LaTeX pipeline and prints the
//! result as a fenced `latex` block, or a localized error message.
//!
//! # Usage
//!
//! ```bash
//! cargo run --example recognize -- [OPTIONS] <IMAGES>...
//! ```
//!
//! # Arguments
//!
//! * `-c, --config` - JSON configuration file (defaults apply otherwise)
//! * `-m, --model-dir` - Directory with `config.json`, `tokenizer.json` and the checkpoint
//! * `-d, --device` - Device to use for inference (e.g., 'cpu', 'cuda', 'cuda:0')
//! * `--prompt` - Prompt template key (default: the configured default key)
//! * `--max-tokens` - Maximum number of generated tokens
//! * `--sample` - Enable sampling (with `--temperature` and `--top-p`)
//! * `--instruction-prefix` - Feed the instruction to the decoder as a prefix
//! * `--stub` - Use the deterministic stub backend (the checkpoint file must still exist)
//! * `--lang` - Language of error messages: `en` or `vi`
//! * `<IMAGES>...` - Paths to input images
//!
//! Environment overrides: `HME_MODEL_DIR`, `HME_CHECKPOINT`, `HME_DEVICE`
//! (or `DEVICE`) and `HME_MAX_NEW_TOKENS`. Set `RUST_LOG=info` for logs.
//!
//! # Examples
//!
//! ```bash
//! cargo run --release --example recognize -- \
//!     -m weights/trocr-base-handwritten \
//!     formula1.png formula2.jpg
//! ```

use clap::Parser;
use hme_latex::core::config::{AppConfig, ConfigValidator};
use hme_latex::core::{Locale, init_tracing};
use hme_latex::model::{ModelHandle, ModelLoader, StubLoader, TrOcrLoader};
use hme_latex::pipeline::Pipeline;
use hme_latex::utils::load_image;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

/// Command-line arguments for the recognition example
#[derive(Parser)]
#[command(name = "recognize")]
#[command(about = "Converts images of mathematical expressions to LaTeX")]
struct Args {
    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory with config.json, tokenizer.json and the checkpoint
    #[arg(short, long)]
    model_dir: Option<PathBuf>,

    /// Device to use for inference (e.g., 'cpu', 'cuda', 'cuda:0')
    #[arg(short, long)]
    device: Option<String>,

    /// Prompt template key
    #[arg(long)]
    prompt: Option<String>,

    /// Maximum number of generated tokens
    #[arg(long)]
    max_tokens: Option<usize>,

    /// Sample instead of greedy decoding
    #[arg(long)]
    sample: bool,

    /// Sampling temperature
    #[arg(long, default_value = "0.7", requires = "sample")]
    temperature: f32,

    /// Nucleus sampling threshold
    #[arg(long, default_value = "0.9", requires = "sample")]
    top_p: f32,

    /// Feed the instruction to the decoder after the start token
    #[arg(long)]
    instruction_prefix: bool,

    /// Use the deterministic stub backend
    #[arg(long)]
    stub: bool,

    /// Language of error messages (en, vi)
    #[arg(long, default_value = "en")]
    lang: String,

    /// Paths to input images
    #[arg(required = true)]
    images: Vec<PathBuf>,
}

fn build_config(args: &Args) -> Result<AppConfig, Box<dyn std::error::Error>> {
    let mut config = match &args.config {
        Some(path) => AppConfig::from_path(path)?,
        None => AppConfig::default(),
    }
    .with_env_overrides()?;

    if let Some(dir) = &args.model_dir {
        config.model.model_dir = dir.clone();
    }
    if let Some(device) = &args.device {
        config.device = device.clone();
    }
    if let Some(tokens) = args.max_tokens {
        config.generation = config.generation.with_max_new_tokens(tokens)?;
    }
    if args.sample {
        config.generation = config
            .generation
            .with_sampling(args.temperature, args.top_p)?;
    }
    if let Some(key) = &args.prompt {
        config.default_prompt_key = key.clone();
    }
    config.validate()?;
    Ok(config)
}

fn run<L: ModelLoader>(loader: L, config: &AppConfig, args: &Args, locale: Locale) -> usize {
    let handle = Arc::new(ModelHandle::from_config(loader, config));
    let pipeline = Pipeline::new(Arc::clone(&handle), config);
    let mut failures = 0;

    for path in &args.images {
        println!("== {}", path.display());
        let result = load_image(path).and_then(|image| {
            pipeline.image_to_latex_detailed(
                Some(&image),
                &config.default_prompt_key,
                &config.generation,
            )
        });
        match result {
            Ok(output) => {
                info!(
                    "{}: {} via {} in {:.2?}",
                    path.display(),
                    output.latex.len(),
                    output.tier,
                    output.elapsed
                );
                println!("```latex\n{}\n```", output.latex);
            }
            Err(err) => {
                failures += 1;
                error!("{}: {err}", path.display());
                println!("{}", err.user_message(locale));
            }
        }
    }

    let info = handle.info();
    info!(
        "model {} on {}: {} ({} load attempts)",
        info.backend, info.device, info.state, info.load_attempts
    );
    failures
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let args = Args::parse();

    let locale = Locale::from_tag(&args.lang)
        .ok_or_else(|| format!("unsupported language '{}'; use en or vi", args.lang))?;
    let config = build_config(&args)?;
    info!("{}", config.app_title);
    info!(
        "model dir {}, device {}",
        config.model.model_dir.display(),
        config.device
    );

    let failures = if args.stub {
        run(StubLoader::new(), &config, &args, locale)
    } else {
        let loader = TrOcrLoader::new().with_instruction_prefix(args.instruction_prefix);
        run(loader, &config, &args, locale)
    };

    if failures > 0 {
        return Err(format!("{failures} of {} images failed", args.images.len()).into());
    }
    Ok(())
}
