use image::{GrayImage, Luma, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_polygon_mut};
use imageproc::filter::gaussian_blur_f32;
use imageproc::point::Point;
use imageproc::rect::Rect;

/// Produces the clothing region mask for a working image: 0 preserves the
/// original pixel, 255 takes the generated pixel, intermediate values blend.
/// Swappable so a content-aware generator can replace the geometric one
/// without touching the compositor or the orchestrator.
pub trait MaskGenerator {
    fn clothing_mask(&self, image: &RgbImage) -> GrayImage;
}

// Fractional frame coordinates of the clothing regions. Empirically chosen;
// they assume a single, roughly centered, upright, front-facing subject and
// do not adapt to pose. That is a known limitation of this generator.
#[derive(Debug, Clone)]
pub struct MaskLayout {
    pub torso_top: f32,
    pub shoulder_half_width: f32,
    pub waist_y: f32,
    pub waist_half_width: f32,
    pub sleeve_top: f32,
    pub sleeve_elbow: f32,
    pub sleeve_bottom: f32,
    pub sleeve_reach: f32,
    pub hip_half_width: f32,
    pub ankle_y: f32,
    pub ankle_half_width: f32,
    pub shoe_bottom: f32,
    pub feather_sigma: f32,
}

impl Default for MaskLayout {
    fn default() -> Self {
        MaskLayout {
            torso_top: 0.33,
            shoulder_half_width: 0.26,
            waist_y: 0.52,
            waist_half_width: 0.18,
            sleeve_top: 0.34,
            sleeve_elbow: 0.40,
            sleeve_bottom: 0.55,
            sleeve_reach: 0.38,
            hip_half_width: 0.20,
            ankle_y: 0.87,
            ankle_half_width: 0.08,
            shoe_bottom: 0.95,
            feather_sigma: 6.0,
        }
    }
}

const LEG_GAP_PX: i32 = 4;
const SHOE_OVERLAP_PX: i32 = 10;

#[derive(Debug, Clone, Default)]
pub struct GeometricMaskGenerator {
    layout: MaskLayout,
}

impl GeometricMaskGenerator {
    pub fn new(layout: MaskLayout) -> Self {
        GeometricMaskGenerator { layout }
    }

    /// Pure function of the frame dimensions; never content-derived.
    pub fn rasterize(&self, width: u32, height: u32) -> GrayImage {
        let layout = &self.layout;
        let mut mask = GrayImage::new(width, height);
        let fill = Luma([255u8]);
        let w = width as f32;
        let h = height as f32;
        let cx = (width / 2) as i32;

        let torso_top = (h * layout.torso_top) as i32;
        let shoulder = (w * layout.shoulder_half_width) as i32;
        let waist_y = (h * layout.waist_y) as i32;
        let waist = (w * layout.waist_half_width) as i32;
        draw_polygon_mut(
            &mut mask,
            &[
                Point::new(cx - shoulder, torso_top),
                Point::new(cx + shoulder, torso_top),
                Point::new(cx + waist, waist_y),
                Point::new(cx - waist, waist_y),
            ],
            fill,
        );

        let sleeve_top = (h * layout.sleeve_top) as i32;
        let sleeve_elbow = (h * layout.sleeve_elbow) as i32;
        let sleeve_bottom = (h * layout.sleeve_bottom) as i32;
        let reach = (w * layout.sleeve_reach) as i32;
        draw_polygon_mut(
            &mut mask,
            &[
                Point::new(cx - shoulder, sleeve_top),
                Point::new(cx - reach, sleeve_elbow),
                Point::new(cx - reach, sleeve_bottom),
                Point::new(cx - shoulder, waist_y),
            ],
            fill,
        );
        draw_polygon_mut(
            &mut mask,
            &[
                Point::new(cx + shoulder, sleeve_top),
                Point::new(cx + reach, sleeve_elbow),
                Point::new(cx + reach, sleeve_bottom),
                Point::new(cx + shoulder, waist_y),
            ],
            fill,
        );

        let hip = (w * layout.hip_half_width) as i32;
        let ankle_y = (h * layout.ankle_y) as i32;
        let ankle = (w * layout.ankle_half_width) as i32;
        draw_polygon_mut(
            &mut mask,
            &[
                Point::new(cx - hip, waist_y),
                Point::new(cx - LEG_GAP_PX, waist_y),
                Point::new(cx - LEG_GAP_PX, ankle_y),
                Point::new(cx - ankle - LEG_GAP_PX, ankle_y),
            ],
            fill,
        );
        draw_polygon_mut(
            &mut mask,
            &[
                Point::new(cx + LEG_GAP_PX, waist_y),
                Point::new(cx + hip, waist_y),
                Point::new(cx + ankle + LEG_GAP_PX, ankle_y),
                Point::new(cx + LEG_GAP_PX, ankle_y),
            ],
            fill,
        );

        let shoe_bottom = (h * layout.shoe_bottom) as i32;
        let shoe_width = hip - ankle + SHOE_OVERLAP_PX;
        let shoe_height = shoe_bottom - ankle_y;
        if shoe_width > 0 && shoe_height > 0 {
            draw_filled_rect_mut(
                &mut mask,
                Rect::at(cx - hip, ankle_y).of_size(shoe_width as u32, shoe_height as u32),
                fill,
            );
            draw_filled_rect_mut(
                &mut mask,
                Rect::at(cx + ankle - SHOE_OVERLAP_PX, ankle_y)
                    .of_size(shoe_width as u32, shoe_height as u32),
                fill,
            );
        }

        // Feather the hard region edges into a 0..255 ramp so the composite
        // has no visible seams.
        if layout.feather_sigma > 0.0 {
            mask = gaussian_blur_f32(&mask, layout.feather_sigma);
        }
        mask
    }
}

impl MaskGenerator for GeometricMaskGenerator {
    fn clothing_mask(&self, image: &RgbImage) -> GrayImage {
        let (width, height) = image.dimensions();
        self.rasterize(width, height)
    }
}
