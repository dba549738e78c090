//! # HME LaTeX
//!
//! Converts images of handwritten or printed mathematical expressions into
//! LaTeX using a vision encoder-decoder model run with Candle.
//!
//! ## Modules
//!
//! * [`core`] - Error taxonomy, configuration and tracing setup
//! * [`model`] - Recognition backends and the load-once [`model::ModelHandle`]
//! * [`prompt`] - Prompt templates and request construction
//! * [`generation`] - One generation call against a ready model
//! * [`extract`] - Tiered LaTeX extraction from free-form model output
//! * [`pipeline`] - The image-to-LaTeX entry point
//! * [`utils`] - Image intake and device helpers
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use hme_latex::prelude::*;
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AppConfig::from_env()?;
//! let handle = Arc::new(ModelHandle::from_config(TrOcrLoader::new(), &config));
//! let pipeline = Pipeline::new(handle, &config);
//!
//! let image = load_image(Path::new("formula.png"))?;
//! match pipeline.image_to_latex_default(Some(&image)) {
//!     Ok(latex) => println!("{latex}"),
//!     Err(err) => eprintln!("{}", err.user_message(Locale::English)),
//! }
//! # Ok(())
//! # }
//! ```

pub mod core;
pub mod extract;
pub mod generation;
pub mod model;
pub mod pipeline;
pub mod prompt;
pub mod utils;

/// Prelude module for convenient imports.
///
/// ```rust
/// use hme_latex::prelude::*;
/// ```
pub mod prelude {
    pub use crate::core::config::{AppConfig, GenerationParams, ModelLocation};
    pub use crate::core::{ErrorKind, HmeError, HmeResult, Locale, init_tracing};
    pub use crate::extract::LatexExtractor;
    pub use crate::model::{ModelHandle, ModelState, StubLoader, TrOcrLoader};
    pub use crate::pipeline::{LatexOutput, Pipeline};
    pub use crate::prompt::PromptTemplates;
    pub use crate::utils::load_image;
}
