use image::{GrayImage, RgbImage};

/// Blends `generated` over `original` using `mask` as the per-pixel weight.
/// Weight 0 keeps the original pixel bit-identical, 255 takes the generated
/// pixel exactly, intermediate values produce the feathered seam blend. This
/// is what guarantees face and background preservation no matter how much the
/// generative model altered the frame.
pub fn composite(original: &RgbImage, generated: &RgbImage, mask: &GrayImage) -> RgbImage {
    assert_eq!(
        original.dimensions(),
        generated.dimensions(),
        "generated frame must match the working dimensions"
    );
    assert_eq!(
        original.dimensions(),
        mask.dimensions(),
        "mask must match the working dimensions"
    );

    let (width, height) = original.dimensions();
    let mut result = RgbImage::new(width, height);
    for (x, y, pixel) in result.enumerate_pixels_mut() {
        let weight = u32::from(mask.get_pixel(x, y)[0]);
        let original_px = original.get_pixel(x, y);
        let generated_px = generated.get_pixel(x, y);
        for channel in 0..3 {
            let kept = u32::from(original_px[channel]) * (255 - weight);
            let replaced = u32::from(generated_px[channel]) * weight;
            // Round half up so the endpoints stay exact.
            pixel[channel] = ((kept + replaced + 127) / 255) as u8;
        }
    }
    result
}
