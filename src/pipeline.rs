use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::diffusion::{
    BodyAttributes, Img2ImgClient, RefineClient, RefinementBackend, SynthesisBackend,
};
use crate::error::PipelineError;
use crate::imaging::composite::composite;
use crate::imaging::mask::{GeometricMaskGenerator, MaskGenerator, MaskLayout};
use crate::imaging::normalize::{encode_png, normalize_image};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Normalizing,
    Masking,
    Synthesizing,
    Compositing,
    Refining,
    Done,
    Failed,
}

impl PipelineStage {
    pub fn as_str(self) -> &'static str {
        match self {
            PipelineStage::Normalizing => "normalizing",
            PipelineStage::Masking => "masking",
            PipelineStage::Synthesizing => "synthesizing",
            PipelineStage::Compositing => "compositing",
            PipelineStage::Refining => "refining",
            PipelineStage::Done => "done",
            PipelineStage::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineResult {
    pub image_png: Vec<u8>,
    pub refined: bool,
}

/// Sequences normalize -> mask -> synthesize -> composite -> refine. Decode
/// and Pass 1 failures abort the run; refinement failure degrades to the
/// Pass 1 composite. Runs hold no shared state, so independent requests can
/// drive their own pipeline values concurrently.
pub struct OutfitPipeline<M, S, R> {
    mask_generator: M,
    synthesizer: S,
    refiner: R,
    synthesis_max_size: u32,
}

impl OutfitPipeline<GeometricMaskGenerator, Img2ImgClient, RefineClient> {
    pub fn from_config(config: &Config) -> Self {
        OutfitPipeline::new(
            GeometricMaskGenerator::new(MaskLayout {
                feather_sigma: config.mask_feather_sigma,
                ..MaskLayout::default()
            }),
            Img2ImgClient::from_config(config),
            RefineClient::from_config(config),
            config.synthesis_max_size,
        )
    }
}

fn enter(stage: PipelineStage) {
    debug!("Pipeline stage: {}", stage.as_str());
}

fn fail(stage: PipelineStage, err: PipelineError) -> PipelineError {
    error!(
        "Pipeline stage {} failed, aborting run: {err}",
        stage.as_str()
    );
    enter(PipelineStage::Failed);
    err
}

impl<M, S, R> OutfitPipeline<M, S, R>
where
    M: MaskGenerator,
    S: SynthesisBackend,
    R: RefinementBackend,
{
    pub fn new(mask_generator: M, synthesizer: S, refiner: R, synthesis_max_size: u32) -> Self {
        OutfitPipeline {
            mask_generator,
            synthesizer,
            refiner,
            synthesis_max_size,
        }
    }

    pub async fn synthesize(
        &self,
        original_image: &[u8],
        outfit_description: &str,
        body: Option<&BodyAttributes>,
    ) -> Result<PipelineResult, PipelineError> {
        enter(PipelineStage::Normalizing);
        let normalized = normalize_image(original_image, self.synthesis_max_size)
            .map_err(|err| fail(PipelineStage::Normalizing, err.into()))?;

        enter(PipelineStage::Masking);
        let mask = self.mask_generator.clothing_mask(&normalized.image);

        enter(PipelineStage::Synthesizing);
        let frame = self
            .synthesizer
            .generate_frame(&normalized.image, outfit_description, body)
            .await
            .map_err(|err| fail(PipelineStage::Synthesizing, err.into()))?;

        enter(PipelineStage::Compositing);
        let composed = composite(&normalized.image, &frame, &mask);
        debug!(
            "Pass 1 complete: composite created ({}x{})",
            normalized.width, normalized.height
        );

        enter(PipelineStage::Refining);
        let (final_image, refined) = match self
            .refiner
            .refine(&composed, outfit_description, body)
            .await
        {
            Ok(refined_image) => (refined_image, true),
            Err(err) => {
                warn!("Refinement unavailable, keeping the composite: {err}");
                (composed, false)
            }
        };

        enter(PipelineStage::Done);
        let image_png = encode_png(&final_image).map_err(PipelineError::Encode)?;
        info!(
            "Outfit pipeline complete: {}x{}, refined={}",
            final_image.width(),
            final_image.height(),
            refined
        );
        Ok(PipelineResult { image_png, refined })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{RefinementUnavailable, SynthesisFailure};
    use image::{Rgb, RgbImage};
    use reqwest::StatusCode;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    // Emits an endpoint-sized solid frame and scales it back to the working
    // dimensions, the way the real client does.
    struct SolidSynthesizer {
        color: Rgb<u8>,
        endpoint_size: (u32, u32),
    }

    impl SynthesisBackend for SolidSynthesizer {
        async fn generate_frame(
            &self,
            original: &RgbImage,
            _outfit_description: &str,
            _body: Option<&BodyAttributes>,
        ) -> Result<RgbImage, SynthesisFailure> {
            let frame =
                RgbImage::from_pixel(self.endpoint_size.0, self.endpoint_size.1, self.color);
            let (width, height) = original.dimensions();
            if frame.dimensions() == (width, height) {
                Ok(frame)
            } else {
                Ok(image::imageops::resize(
                    &frame,
                    width,
                    height,
                    image::imageops::FilterType::Lanczos3,
                ))
            }
        }
    }

    struct FailingSynthesizer;

    impl SynthesisBackend for FailingSynthesizer {
        async fn generate_frame(
            &self,
            _original: &RgbImage,
            _outfit_description: &str,
            _body: Option<&BodyAttributes>,
        ) -> Result<RgbImage, SynthesisFailure> {
            Err(SynthesisFailure::Endpoint {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                detail: "model overloaded".to_string(),
            })
        }
    }

    struct CountingRefiner {
        calls: Arc<AtomicUsize>,
        result: Option<RgbImage>,
    }

    impl RefinementBackend for CountingRefiner {
        async fn refine(
            &self,
            _composite: &RgbImage,
            _outfit_description: &str,
            _body: Option<&BodyAttributes>,
        ) -> Result<RgbImage, RefinementUnavailable> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result
                .clone()
                .ok_or(RefinementUnavailable { attempted: 2 })
        }
    }

    fn input_png(width: u32, height: u32, color: Rgb<u8>) -> Vec<u8> {
        encode_png(&RgbImage::from_pixel(width, height, color)).unwrap()
    }

    #[tokio::test]
    async fn synthesis_failure_aborts_before_refinement() {
        let refiner_calls = Arc::new(AtomicUsize::new(0));
        let pipeline = OutfitPipeline::new(
            GeometricMaskGenerator::default(),
            FailingSynthesizer,
            CountingRefiner {
                calls: refiner_calls.clone(),
                result: None,
            },
            512,
        );

        let err = pipeline
            .synthesize(&input_png(256, 384, Rgb([0, 0, 255])), "a velvet blazer", None)
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::Synthesis(_)));
        assert_eq!(refiner_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn undecodable_input_fails_before_any_backend_runs() {
        let refiner_calls = Arc::new(AtomicUsize::new(0));
        let pipeline = OutfitPipeline::new(
            GeometricMaskGenerator::default(),
            FailingSynthesizer,
            CountingRefiner {
                calls: refiner_calls.clone(),
                result: None,
            },
            512,
        );

        let err = pipeline
            .synthesize(b"not an image at all", "a velvet blazer", None)
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::Decode(_)));
        assert_eq!(refiner_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn refinement_failure_degrades_to_the_composite() {
        let pipeline = OutfitPipeline::new(
            GeometricMaskGenerator::default(),
            SolidSynthesizer {
                color: Rgb([255, 0, 0]),
                endpoint_size: (512, 512),
            },
            CountingRefiner {
                calls: Arc::new(AtomicUsize::new(0)),
                result: None,
            },
            512,
        );

        let result = pipeline
            .synthesize(&input_png(256, 384, Rgb([0, 0, 255])), "a red jumpsuit", None)
            .await
            .unwrap();

        assert!(!result.refined);
        let output = image::load_from_memory(&result.image_png).unwrap().to_rgb8();
        // 256x384 normalizes to 336x512 for the synthesis stage.
        assert_eq!(output.dimensions(), (336, 512));
    }

    #[tokio::test]
    async fn refined_frame_is_returned_when_a_candidate_succeeds() {
        let refined_frame = RgbImage::from_pixel(504, 768, Rgb([9, 9, 9]));
        let pipeline = OutfitPipeline::new(
            GeometricMaskGenerator::default(),
            SolidSynthesizer {
                color: Rgb([255, 0, 0]),
                endpoint_size: (512, 512),
            },
            CountingRefiner {
                calls: Arc::new(AtomicUsize::new(0)),
                result: Some(refined_frame),
            },
            512,
        );

        let result = pipeline
            .synthesize(&input_png(256, 384, Rgb([0, 0, 255])), "a trench coat", None)
            .await
            .unwrap();

        assert!(result.refined);
        let output = image::load_from_memory(&result.image_png).unwrap().to_rgb8();
        assert_eq!(output.dimensions(), (504, 768));
    }

    #[tokio::test]
    async fn composite_replaces_exactly_the_masked_fraction() {
        // Blue original, red synthesis frame: the red fraction of the
        // composite must match the mask's mean weight up to feathering
        // rounding.
        let pipeline = OutfitPipeline::new(
            GeometricMaskGenerator::default(),
            SolidSynthesizer {
                color: Rgb([255, 0, 0]),
                endpoint_size: (512, 512),
            },
            CountingRefiner {
                calls: Arc::new(AtomicUsize::new(0)),
                result: None,
            },
            512,
        );

        let result = pipeline
            .synthesize(&input_png(256, 384, Rgb([0, 0, 255])), "a scarlet gown", None)
            .await
            .unwrap();

        let output = image::load_from_memory(&result.image_png).unwrap().to_rgb8();
        let mask = GeometricMaskGenerator::default().rasterize(336, 512);

        let mask_mean: f64 = mask.pixels().map(|p| f64::from(p[0])).sum::<f64>()
            / (255.0 * f64::from(336 * 512u32));
        let red_mean: f64 = output.pixels().map(|p| f64::from(p[0])).sum::<f64>()
            / (255.0 * f64::from(336 * 512u32));

        assert!(
            (mask_mean - red_mean).abs() < 0.02,
            "mask fraction {mask_mean:.4} vs composite red fraction {red_mean:.4}"
        );
    }
}
