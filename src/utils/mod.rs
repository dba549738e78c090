//! Utility functions for the recognition pipeline.
//!
//! This module provides image intake helpers and Candle device handling.

pub mod device;
pub mod image;

pub use device::{candle_context, parse_device};
pub use image::{
    dynamic_to_rgb, fit_dimensions, fit_within, load_image, load_image_from_bytes,
    validate_image,
};
