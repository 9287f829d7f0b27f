use std::time::Duration;

use base64::{engine::general_purpose, Engine as _};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::RgbImage;
use reqwest::header::CONTENT_TYPE;
use serde_json::{json, Value};
use tracing::{debug, error};

use crate::config::Config;
use crate::diffusion::{
    model_label, summarize_error_body, truncate_for_log, BodyAttributes, SynthesisBackend,
};
use crate::error::SynthesisFailure;
use crate::utils::http::get_http_client;
use crate::utils::timing::log_model_timing;

// Common generative artifacts the endpoint is told to avoid.
const SYNTHESIS_NEGATIVE_PROMPT: &str =
    "deformed, blurry, bad quality, cartoon, anime, distorted, extra limbs, disfigured face";

const SOURCE_JPEG_QUALITY: u8 = 92;

/// Pass 1 client for the image-to-image endpoint. Deviation strength is kept
/// high on purpose: the model may rework the whole frame because only masked
/// pixels survive compositing.
#[derive(Debug, Clone)]
pub struct Img2ImgClient {
    run_url: String,
    model_name: String,
    api_token: String,
    strength: f32,
    guidance: f32,
    num_steps: u32,
    timeout: Duration,
    min_image_bytes: usize,
}

impl Img2ImgClient {
    pub fn from_config(config: &Config) -> Self {
        let model_id = config.model_id(&config.synthesis_model);
        Img2ImgClient {
            run_url: config.run_url(model_id),
            model_name: model_label(model_id).to_string(),
            api_token: config.api_token.clone(),
            strength: config.synthesis_strength,
            guidance: config.synthesis_guidance,
            num_steps: config.synthesis_steps,
            timeout: Duration::from_secs(config.synthesis_timeout_secs),
            min_image_bytes: config.min_image_response_bytes,
        }
    }

    async fn request_frame(
        &self,
        payload: &Value,
        width: u32,
        height: u32,
    ) -> Result<RgbImage, SynthesisFailure> {
        let response = get_http_client()
            .post(&self.run_url)
            .header("Authorization", format!("Bearer {}", self.api_token))
            .timeout(self.timeout)
            .json(payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let (message, body_summary) = summarize_error_body(&body);
            error!("Pass 1 endpoint error: status={}, body={}", status, body_summary);
            return Err(SynthesisFailure::Endpoint {
                status,
                detail: message.unwrap_or(body_summary),
            });
        }

        // A success status can still carry a JSON error payload; the content
        // type decides, not the status code.
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let bytes = response.bytes().await?;

        if content_type.contains("application/json") {
            let body = String::from_utf8_lossy(&bytes);
            let (message, body_summary) = summarize_error_body(&body);
            error!("Pass 1 returned JSON instead of image data: {}", body_summary);
            return Err(SynthesisFailure::ErrorPayload(
                message.unwrap_or(body_summary),
            ));
        }
        if bytes.len() < self.min_image_bytes {
            error!("Pass 1 response too small: {} bytes", bytes.len());
            return Err(SynthesisFailure::UndersizedResponse(bytes.len()));
        }

        let mut frame = image::load_from_memory(&bytes)?.to_rgb8();
        if frame.dimensions() != (width, height) {
            debug!(
                "Pass 1 frame resampled from {:?} back to {}x{}",
                frame.dimensions(),
                width,
                height
            );
            frame = imageops::resize(&frame, width, height, FilterType::Lanczos3);
        }
        Ok(frame)
    }
}

impl SynthesisBackend for Img2ImgClient {
    async fn generate_frame(
        &self,
        original: &RgbImage,
        outfit_description: &str,
        body: Option<&BodyAttributes>,
    ) -> Result<RgbImage, SynthesisFailure> {
        let (width, height) = original.dimensions();
        let prompt = outfit_prompt(outfit_description, body);
        debug!("Pass 1 prompt: {}", truncate_for_log(&prompt, 200));

        let source_b64 = general_purpose::STANDARD.encode(encode_source_jpeg(original)?);
        let payload = json!({
            "prompt": prompt,
            "negative_prompt": SYNTHESIS_NEGATIVE_PROMPT,
            "image_b64": source_b64,
            "strength": self.strength,
            "guidance": self.guidance,
            "num_steps": self.num_steps,
        });

        log_model_timing("cloudflare", &self.model_name, "outfit-img2img", || {
            self.request_frame(&payload, width, height)
        })
        .await
    }
}

fn encode_source_jpeg(image: &RgbImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buffer = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut buffer, SOURCE_JPEG_QUALITY);
    image.write_with_encoder(encoder)?;
    Ok(buffer)
}

fn outfit_prompt(outfit_description: &str, body: Option<&BodyAttributes>) -> String {
    let body_desc = body
        .map(|body| {
            format!(
                "same {} with {} build and {} skin, ",
                body.gender, body.body_type, body.skin_tone
            )
        })
        .unwrap_or_default();
    format!(
        "{body_desc}wearing {outfit_description}, professional business clothing, \
         high quality, detailed fabric textures, natural lighting"
    )
}
