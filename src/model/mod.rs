//! Recognition model backends and the load-once handle that owns them.
//!
//! * [`capability`] - the traits a backend implements
//! * [`handle`] - [`ModelHandle`], the lazily loaded shared model
//! * [`trocr`] - TrOCR encoder-decoder via candle-transformers
//! * [`stub`] - deterministic backend for tests and dry runs

pub mod capability;
pub mod handle;
pub mod stub;
pub mod trocr;

pub use capability::{EncodedPrompt, ModelLoader, RecognitionModel};
pub use handle::{LoadFailure, ModelHandle, ModelInfo, ModelState};
pub use stub::{StubCounters, StubLoader, StubModel};
pub use trocr::{TrOcr, TrOcrLoader};
