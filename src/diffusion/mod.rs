pub mod avatar;
pub mod img2img;
pub mod refine;

pub use avatar::AvatarClient;
pub use img2img::Img2ImgClient;
pub use refine::RefineClient;

use image::RgbImage;
use serde_json::Value;

use crate::error::{RefinementUnavailable, SynthesisFailure};

/// Body descriptors woven into the generation prompts so the endpoint keeps
/// the subject plausible while the outfit changes.
#[derive(Debug, Clone)]
pub struct BodyAttributes {
    pub body_type: String,
    pub skin_tone: String,
    pub gender: String,
}

impl Default for BodyAttributes {
    fn default() -> Self {
        BodyAttributes {
            body_type: "average".to_string(),
            skin_tone: "medium".to_string(),
            gender: "person".to_string(),
        }
    }
}

/// Pass 1: produce a full candidate frame for the working image. The
/// returned frame matches the working dimensions even when the endpoint
/// answered at another size. Failure is fatal to the pipeline run.
#[allow(async_fn_in_trait)]
pub trait SynthesisBackend {
    async fn generate_frame(
        &self,
        original: &RgbImage,
        outfit_description: &str,
        body: Option<&BodyAttributes>,
    ) -> Result<RgbImage, SynthesisFailure>;
}

/// Pass 2: polish the composite. Exhaustion of every candidate is reported
/// as `RefinementUnavailable`, which callers treat as a graceful fallback.
#[allow(async_fn_in_trait)]
pub trait RefinementBackend {
    async fn refine(
        &self,
        composite: &RgbImage,
        outfit_description: &str,
        body: Option<&BodyAttributes>,
    ) -> Result<RgbImage, RefinementUnavailable>;
}

pub(crate) fn truncate_for_log(value: &str, limit: usize) -> String {
    if value.chars().count() <= limit {
        return value.to_string();
    }
    let truncated: String = value.chars().take(limit).collect();
    format!("{truncated}... (truncated)")
}

pub(crate) fn summarize_error_body(body: &str) -> (Option<String>, String) {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return (None, "empty response body".to_string());
    }

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        let message = value
            .pointer("/error/message")
            .and_then(|v| v.as_str())
            .map(|v| v.to_string())
            .or_else(|| {
                value
                    .get("message")
                    .and_then(|v| v.as_str())
                    .map(|v| v.to_string())
            });
        return (message, truncate_for_log(&value.to_string(), 2000));
    }

    (None, truncate_for_log(trimmed, 2000))
}

pub(crate) fn model_label(model_id: &str) -> &str {
    model_id.rsplit('/').next().unwrap_or(model_id)
}
