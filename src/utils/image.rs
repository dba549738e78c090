//! Image intake: decoding, validation and downscale-on-read.

use crate::core::config::ImageLimits;
use crate::core::errors::HmeError;
use image::imageops::FilterType;
use image::{DynamicImage, RgbImage};
use std::borrow::Cow;
use std::path::Path;

/// Converts a DynamicImage to an RgbImage.
pub fn dynamic_to_rgb(img: DynamicImage) -> RgbImage {
    match img {
        DynamicImage::ImageRgb8(rgb) => rgb,
        other => other.to_rgb8(),
    }
}

/// Loads an image from a file path and converts it to RGB.
///
/// Any decode failure is reported as `InvalidImage`.
pub fn load_image(path: &Path) -> Result<RgbImage, HmeError> {
    let img = image::open(path).map_err(|e| {
        HmeError::invalid_image(format!("failed to decode {}: {e}", path.display()))
    })?;
    Ok(dynamic_to_rgb(img))
}

/// Decodes an in-memory upload (PNG, JPEG, BMP, TIFF, ...).
pub fn load_image_from_bytes(bytes: &[u8]) -> Result<RgbImage, HmeError> {
    let img = image::load_from_memory(bytes)
        .map_err(|e| HmeError::invalid_image(format!("failed to decode upload: {e}")))?;
    Ok(dynamic_to_rgb(img))
}

/// Rejects a missing or zero-area image.
pub fn validate_image(image: Option<&RgbImage>) -> Result<&RgbImage, HmeError> {
    let image = image.ok_or_else(|| HmeError::invalid_image("no image supplied"))?;
    let (w, h) = image.dimensions();
    if w == 0 || h == 0 {
        return Err(HmeError::invalid_image(format!(
            "image has zero area ({w}x{h})"
        )));
    }
    Ok(image)
}

/// Target size that fits `(width, height)` inside `limits`, preserving aspect
/// ratio. Never upscales; each side is at least 1.
pub fn fit_dimensions(width: u32, height: u32, limits: &ImageLimits) -> (u32, u32) {
    if width <= limits.max_width && height <= limits.max_height {
        return (width, height);
    }
    let scale = (limits.max_width as f64 / width as f64).min(limits.max_height as f64 / height as f64);
    let new_w = ((width as f64 * scale).round() as u32).clamp(1, limits.max_width);
    let new_h = ((height as f64 * scale).round() as u32).clamp(1, limits.max_height);
    (new_w, new_h)
}

/// Downscales `image` to fit inside `limits`; borrows it unchanged when it
/// already fits.
pub fn fit_within<'a>(image: &'a RgbImage, limits: &ImageLimits) -> Cow<'a, RgbImage> {
    let (w, h) = image.dimensions();
    let (new_w, new_h) = fit_dimensions(w, h, limits);
    if (new_w, new_h) == (w, h) {
        Cow::Borrowed(image)
    } else {
        tracing::debug!("downscaling input image {w}x{h} -> {new_w}x{new_h}");
        Cow::Owned(image::imageops::resize(
            image,
            new_w,
            new_h,
            FilterType::Lanczos3,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits(w: u32, h: u32) -> ImageLimits {
        ImageLimits {
            max_width: w,
            max_height: h,
        }
    }

    #[test]
    fn test_validate_image() {
        let ok = RgbImage::new(3, 3);
        assert!(validate_image(Some(&ok)).is_ok());

        let err = validate_image(None).unwrap_err();
        assert_eq!(err, HmeError::invalid_image("no image supplied"));

        let empty = RgbImage::new(0, 5);
        assert!(matches!(
            validate_image(Some(&empty)),
            Err(HmeError::InvalidImage { .. })
        ));
    }

    #[test]
    fn test_fit_dimensions_preserves_aspect() {
        assert_eq!(fit_dimensions(2048, 1024, &limits(1024, 1024)), (1024, 512));
        assert_eq!(fit_dimensions(1000, 3000, &limits(1024, 1024)), (341, 1024));
        assert_eq!(fit_dimensions(800, 600, &limits(1024, 1024)), (800, 600));
        assert_eq!(fit_dimensions(5000, 2, &limits(100, 100)), (100, 1));
    }

    #[test]
    fn test_fit_within_borrows_small_images() {
        let image = RgbImage::new(10, 10);
        assert!(matches!(fit_within(&image, &limits(16, 16)), Cow::Borrowed(_)));

        let large = RgbImage::new(40, 20);
        let fitted = fit_within(&large, &limits(16, 16));
        assert_eq!(fitted.dimensions(), (16, 8));
    }

    #[test]
    fn test_load_image_from_bytes_roundtrip_and_garbage() {
        let mut image = RgbImage::new(2, 2);
        image.put_pixel(1, 1, image::Rgb([255, 0, 0]));
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(image.clone())
            .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        assert_eq!(load_image_from_bytes(&bytes).unwrap(), image);

        assert!(matches!(
            load_image_from_bytes(b"not an image"),
            Err(HmeError::InvalidImage { .. })
        ));
    }

    #[test]
    fn test_load_image_missing_file() {
        let err = load_image(Path::new("/nonexistent/formula.png")).unwrap_err();
        assert!(matches!(err, HmeError::InvalidImage { .. }));
    }
}
