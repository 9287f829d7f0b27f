use std::io::Cursor;

use image::imageops::{self, FilterType};
use image::{ImageFormat, RgbImage};
use tracing::debug;

use crate::error::ImageDecodeError;

#[derive(Debug, Clone)]
pub struct NormalizedImage {
    pub image: RgbImage,
    pub width: u32,
    pub height: u32,
}

// The generative endpoints reject dimensions that are not multiples of 8.
fn snap_down_to_multiple_of_8(value: u32) -> u32 {
    ((value / 8) * 8).max(8)
}

/// Scales (width, height) uniformly so the larger dimension equals `target`,
/// then truncates both to the nearest lower multiple of 8. Degenerate aspect
/// ratios clamp the short side to 8 instead of collapsing to zero.
pub fn fit_dimensions(width: u32, height: u32, target: u32) -> (u32, u32) {
    let (scaled_w, scaled_h) = if width > height {
        (
            u64::from(target),
            u64::from(height) * u64::from(target) / u64::from(width),
        )
    } else {
        (
            u64::from(width) * u64::from(target) / u64::from(height),
            u64::from(target),
        )
    };
    (
        snap_down_to_multiple_of_8(scaled_w as u32),
        snap_down_to_multiple_of_8(scaled_h as u32),
    )
}

pub fn normalize_image(bytes: &[u8], target: u32) -> Result<NormalizedImage, ImageDecodeError> {
    let decoded = image::load_from_memory(bytes)?;
    let source = decoded.to_rgb8();
    let (source_w, source_h) = source.dimensions();
    let (width, height) = fit_dimensions(source_w, source_h, target);

    let mime_type = infer::get(bytes).map(|kind| kind.mime_type());
    debug!(
        "Normalized input image: {}x{} ({}) -> {}x{}",
        source_w,
        source_h,
        mime_type.unwrap_or("unknown"),
        width,
        height
    );

    let image = imageops::resize(&source, width, height, FilterType::Lanczos3);
    Ok(NormalizedImage {
        image,
        width,
        height,
    })
}

/// Resamples an already-decoded working image so its larger dimension fits
/// `target`; used to upsample the composite before refinement.
pub fn resample_to_fit(image: &RgbImage, target: u32) -> RgbImage {
    let (width, height) = image.dimensions();
    let (new_w, new_h) = fit_dimensions(width, height, target);
    if (new_w, new_h) == (width, height) {
        return image.clone();
    }
    imageops::resize(image, new_w, new_h, FilterType::Lanczos3)
}

pub fn encode_png(image: &RgbImage) -> image::ImageResult<Vec<u8>> {
    let mut cursor = Cursor::new(Vec::new());
    image.write_to(&mut cursor, ImageFormat::Png)?;
    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn fits_portrait_input_to_synthesis_size() {
        // 256x384 scales to 341x512 and truncates to 336x512.
        assert_eq!(fit_dimensions(256, 384, 512), (336, 512));
    }

    #[test]
    fn fits_landscape_input_and_upscales_small_images() {
        assert_eq!(fit_dimensions(100, 50, 512), (512, 256));
    }

    #[test]
    fn clamps_degenerate_aspect_ratios_to_the_minimum_tile() {
        let (w, h) = fit_dimensions(2000, 31, 512);
        assert_eq!(w, 512);
        assert_eq!(h, 8);
    }

    #[test]
    fn normalized_output_is_bounded_and_divisible_by_8() {
        let source = RgbImage::from_pixel(300, 500, Rgb([10, 20, 30]));
        let bytes = encode_png(&source).unwrap();

        let normalized = normalize_image(&bytes, 512).unwrap();
        assert_eq!(normalized.image.dimensions(), (normalized.width, normalized.height));
        assert!(normalized.width % 8 == 0 && normalized.height % 8 == 0);
        assert!(normalized.width.max(normalized.height) <= 512);

        // Aspect ratio preserved within one rounding step of 8 pixels.
        let source_ratio = 300.0 / 500.0;
        let normalized_ratio = normalized.width as f64 / normalized.height as f64;
        assert!((source_ratio - normalized_ratio).abs() < 8.0 / 512.0 * 2.0);
    }

    #[test]
    fn rejects_undecodable_bytes() {
        let result = normalize_image(b"definitely not an image", 512);
        assert!(result.is_err());
    }

    #[test]
    fn resample_upscales_composites_for_refinement() {
        let composite = RgbImage::from_pixel(336, 512, Rgb([1, 2, 3]));
        let upscaled = resample_to_fit(&composite, 768);
        assert_eq!(upscaled.dimensions(), (504, 768));
    }

    #[test]
    fn resample_keeps_images_already_at_target() {
        let composite = RgbImage::from_pixel(512, 768, Rgb([1, 2, 3]));
        let upscaled = resample_to_fit(&composite, 768);
        assert_eq!(upscaled.dimensions(), (512, 768));
    }
}
