use std::future::Future;
use std::time::Duration;

use anyhow::{anyhow, Result};
use base64::{engine::general_purpose, Engine as _};
use image::RgbImage;
use reqwest::header::CONTENT_TYPE;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::diffusion::{
    model_label, summarize_error_body, truncate_for_log, BodyAttributes, RefinementBackend,
};
use crate::error::RefinementUnavailable;
use crate::imaging::normalize::{encode_png, resample_to_fit};
use crate::utils::http::get_http_client;
use crate::utils::timing::log_model_timing;

#[derive(Debug, Clone)]
pub struct RefineCandidate {
    pub name: String,
    pub run_url: String,
}

/// Pass 2 client: submits the composite to each candidate image-edit
/// endpoint in priority order and keeps the first decodable result. Best
/// effort only; exhaustion is not a pipeline error.
#[derive(Debug, Clone)]
pub struct RefineClient {
    candidates: Vec<RefineCandidate>,
    api_token: String,
    timeout: Duration,
    max_size: u32,
    min_image_bytes: usize,
}

impl RefineClient {
    pub fn from_config(config: &Config) -> Self {
        let candidates = config
            .refinement_models
            .iter()
            .map(|name| {
                let model_id = config.model_id(name);
                RefineCandidate {
                    name: model_label(model_id).to_string(),
                    run_url: config.run_url(model_id),
                }
            })
            .collect();
        RefineClient {
            candidates,
            api_token: config.api_token.clone(),
            timeout: Duration::from_secs(config.refinement_timeout_secs),
            max_size: config.refinement_max_size,
            min_image_bytes: config.min_image_response_bytes,
        }
    }

    pub fn candidates(&self) -> &[RefineCandidate] {
        &self.candidates
    }

    async fn try_candidate(
        &self,
        candidate: RefineCandidate,
        prompt: &str,
        composite_png: &[u8],
    ) -> Result<RgbImage> {
        log_model_timing("cloudflare", &candidate.name, "outfit-refine", || async {
            let part = Part::bytes(composite_png.to_vec())
                .file_name("composite.png")
                .mime_str("image/png")?;
            let form = Form::new()
                .text("prompt", prompt.to_string())
                .part("image", part);

            let response = get_http_client()
                .post(&candidate.run_url)
                .header("Authorization", format!("Bearer {}", self.api_token))
                .timeout(self.timeout)
                .multipart(form)
                .send()
                .await?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                let (message, body_summary) = summarize_error_body(&body);
                return Err(anyhow!("status {}: {}", status, message.unwrap_or(body_summary)));
            }

            let content_type = response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|value| value.to_str().ok())
                .unwrap_or_default()
                .to_string();
            let bytes = response.bytes().await?;
            extract_refined_image(&content_type, &bytes, self.min_image_bytes)
        })
        .await
    }
}

impl RefinementBackend for RefineClient {
    async fn refine(
        &self,
        composite: &RgbImage,
        outfit_description: &str,
        body: Option<&BodyAttributes>,
    ) -> Result<RgbImage, RefinementUnavailable> {
        // Upsample before editing; the higher-capacity models produce better
        // seam removal at 768 than at the synthesis resolution.
        let upscaled = resample_to_fit(composite, self.max_size);
        let composite_png = match encode_png(&upscaled) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!("Could not encode composite for refinement: {err}");
                return Err(RefinementUnavailable { attempted: 0 });
            }
        };

        let prompt = refinement_prompt(outfit_description, body);
        debug!("Pass 2 prompt: {}", truncate_for_log(&prompt, 200));

        first_successful(&self.candidates, |candidate| {
            self.try_candidate(candidate, &prompt, &composite_png)
        })
        .await
    }
}

/// Sequential early-exit iteration over an ordered candidate list; no state
/// is shared between attempts and later candidates are never contacted once
/// one succeeds.
pub(crate) async fn first_successful<T, F, Fut>(
    candidates: &[RefineCandidate],
    mut attempt: F,
) -> Result<T, RefinementUnavailable>
where
    F: FnMut(RefineCandidate) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    for (index, candidate) in candidates.iter().enumerate() {
        let name = candidate.name.clone();
        match attempt(candidate.clone()).await {
            Ok(value) => {
                if index > 0 {
                    info!("Refinement fell back to candidate {} ({name})", index + 1);
                }
                return Ok(value);
            }
            Err(err) => warn!("Refinement candidate {name} failed: {err:#}"),
        }
    }
    Err(RefinementUnavailable {
        attempted: candidates.len(),
    })
}

#[derive(Debug, Deserialize)]
struct RefineEnvelope {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    result: Option<RefineResult>,
}

#[derive(Debug, Deserialize)]
struct RefineResult {
    #[serde(default)]
    image: Option<String>,
}

fn extract_refined_image(
    content_type: &str,
    bytes: &[u8],
    min_image_bytes: usize,
) -> Result<RgbImage> {
    if content_type.contains("json") {
        let envelope: RefineEnvelope = serde_json::from_slice(bytes)?;
        if !envelope.success {
            return Err(anyhow!("endpoint reported success=false"));
        }
        let encoded = envelope
            .result
            .and_then(|result| result.image)
            .filter(|image| !image.is_empty())
            .ok_or_else(|| anyhow!("no image field in JSON response"))?;
        let data = general_purpose::STANDARD.decode(encoded.as_bytes())?;
        return Ok(image::load_from_memory(&data)?.to_rgb8());
    }

    if bytes.len() <= min_image_bytes {
        return Err(anyhow!("binary response too small ({} bytes)", bytes.len()));
    }
    Ok(image::load_from_memory(bytes)?.to_rgb8())
}

fn refinement_prompt(outfit_description: &str, body: Option<&BodyAttributes>) -> String {
    let body_desc = body
        .map(|body| format!("of the same {}, ", body.gender))
        .unwrap_or_default();
    format!(
        "A photorealistic portrait photo {body_desc}wearing {outfit_description}. \
         Professional fashion photography, crisp clothing details, natural fabric \
         textures, smooth transitions, studio quality lighting, 8k detail, sharp \
         focus, photorealistic"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use std::sync::Mutex;

    fn named_candidates(names: &[&str]) -> Vec<RefineCandidate> {
        names
            .iter()
            .map(|name| RefineCandidate {
                name: name.to_string(),
                run_url: format!("https://example.test/run/{name}"),
            })
            .collect()
    }

    #[tokio::test]
    async fn falls_through_to_the_first_working_candidate() {
        let candidates = named_candidates(&["first", "second", "third", "fourth"]);
        let attempted = Mutex::new(Vec::new());

        let result = first_successful(&candidates, |candidate| {
            attempted.lock().unwrap().push(candidate.name.clone());
            let outcome = if candidate.name == "third" {
                Ok(42)
            } else {
                Err(anyhow!("status 500 Internal Server Error"))
            };
            async move { outcome }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(
            *attempted.lock().unwrap(),
            vec!["first".to_string(), "second".to_string(), "third".to_string()]
        );
    }

    #[tokio::test]
    async fn reports_unavailable_after_exhausting_every_candidate() {
        let candidates = named_candidates(&["first", "second"]);
        let err = first_successful::<u32, _, _>(&candidates, |_| async {
            Err(anyhow!("timed out"))
        })
        .await
        .unwrap_err();
        assert_eq!(err.attempted, 2);
    }

    #[test]
    fn decodes_an_image_embedded_in_a_json_envelope() {
        let frame = RgbImage::from_pixel(6, 6, Rgb([200, 10, 10]));
        let encoded = general_purpose::STANDARD.encode(encode_png(&frame).unwrap());
        let body = format!(r#"{{"success": true, "result": {{"image": "{encoded}"}}}}"#);

        let decoded = extract_refined_image("application/json", body.as_bytes(), 1000).unwrap();
        assert_eq!(decoded.dimensions(), (6, 6));
        assert_eq!(decoded.get_pixel(3, 3), &Rgb([200, 10, 10]));
    }

    #[test]
    fn rejects_json_envelopes_without_an_image() {
        let err = extract_refined_image(
            "application/json",
            br#"{"success": true, "result": {}}"#,
            1000,
        )
        .unwrap_err();
        assert!(err.to_string().contains("no image field"));

        let err = extract_refined_image("application/json", br#"{"success": false}"#, 1000)
            .unwrap_err();
        assert!(err.to_string().contains("success=false"));
    }

    #[test]
    fn rejects_undersized_binary_responses() {
        let err = extract_refined_image("image/png", &[0u8; 12], 1000).unwrap_err();
        assert!(err.to_string().contains("too small"));
    }

    #[test]
    fn accepts_binary_image_responses_over_the_size_floor() {
        let frame = RgbImage::from_pixel(6, 6, Rgb([1, 2, 3]));
        let bytes = encode_png(&frame).unwrap();
        let decoded = extract_refined_image("image/png", &bytes, 16).unwrap();
        assert_eq!(decoded.dimensions(), (6, 6));
    }

    #[test]
    fn refinement_prompt_mentions_the_subject_and_outfit() {
        let prompt = refinement_prompt("a charcoal wool coat", Some(&BodyAttributes::default()));
        assert!(prompt.contains("of the same person, wearing a charcoal wool coat"));
        assert!(prompt.contains("photorealistic"));
    }

    #[test]
    fn candidates_are_built_in_priority_order() {
        let client = RefineClient::from_config(&Config::for_tests());
        let names: Vec<&str> = client
            .candidates()
            .iter()
            .map(|candidate| candidate.name.as_str())
            .collect();
        assert_eq!(names, vec!["flux-2-klein-9b", "flux-2-klein-4b"]);
        assert!(client.candidates()[0]
            .run_url
            .ends_with("/ai/run/@cf/black-forest-labs/flux-2-klein-9b"));
    }
}
