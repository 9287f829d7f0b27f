use std::collections::HashMap;
use std::time::Duration;

use anyhow::{anyhow, Result};
use reqwest::header::CONTENT_TYPE;
use serde_json::{json, Map, Value};
use tracing::{debug, error};

use crate::config::Config;
use crate::diffusion::{model_label, summarize_error_body, truncate_for_log};
use crate::utils::http::get_http_client;
use crate::utils::timing::log_model_timing;

// Workers AI caps diffusion at 20 steps; larger budgets are rejected.
const MAX_DIFFUSION_STEPS: u32 = 20;

const VISUALIZATION_NEGATIVE_PROMPT: &str =
    "blurry, distorted, low quality, cartoon, anime, multiple people, nudity, inappropriate";

/// Plain text-to-image generation of a fashion avatar, without a source
/// photo. Not part of the two-pass pipeline; shares the endpoint family and
/// model table with it.
#[derive(Debug, Clone)]
pub struct AvatarClient {
    run_base: String,
    api_token: String,
    default_model: String,
    models: HashMap<String, String>,
    guidance: f32,
    num_steps: u32,
    timeout: Duration,
}

impl AvatarClient {
    pub fn from_config(config: &Config) -> Self {
        let run_base = config.run_url("");
        AvatarClient {
            run_base: run_base.trim_end_matches('/').to_string(),
            api_token: config.api_token.clone(),
            default_model: config.avatar_model.clone(),
            models: config.model_table().clone(),
            guidance: config.avatar_guidance,
            num_steps: config.avatar_steps.min(MAX_DIFFUSION_STEPS),
            timeout: Duration::from_secs(config.avatar_timeout_secs),
        }
    }

    fn resolve_model(&self, model: Option<&str>) -> String {
        let name = model.unwrap_or(&self.default_model);
        self.models
            .get(name)
            .cloned()
            .unwrap_or_else(|| name.to_string())
    }

    pub async fn generate_avatar(
        &self,
        prompt: &str,
        width: u32,
        height: u32,
        model: Option<&str>,
        negative_prompt: Option<&str>,
        guidance: Option<f32>,
    ) -> Result<Vec<u8>> {
        let model_id = self.resolve_model(model);
        let url = format!("{}/{}", self.run_base, model_id);

        let mut payload = Map::new();
        payload.insert("prompt".to_string(), json!(prompt));
        payload.insert("width".to_string(), json!(width));
        payload.insert("height".to_string(), json!(height));
        payload.insert(
            "num_steps".to_string(),
            json!(self.num_steps.min(MAX_DIFFUSION_STEPS)),
        );
        payload.insert(
            "guidance".to_string(),
            json!(guidance.unwrap_or(self.guidance)),
        );
        if let Some(negative) = negative_prompt {
            payload.insert("negative_prompt".to_string(), json!(negative));
        }
        let payload = Value::Object(payload);

        debug!("Generating avatar: {}", truncate_for_log(prompt, 200));

        log_model_timing("cloudflare", model_label(&model_id), "avatar", || async {
            let response = get_http_client()
                .post(&url)
                .header("Authorization", format!("Bearer {}", self.api_token))
                .timeout(self.timeout)
                .json(&payload)
                .send()
                .await?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                let (message, body_summary) = summarize_error_body(&body);
                error!("Avatar endpoint error: status={}, body={}", status, body_summary);
                return Err(anyhow!(
                    "avatar generation failed with status {}: {}",
                    status,
                    message.unwrap_or(body_summary)
                ));
            }

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
                return Err(anyhow!(
                    "avatar endpoint returned JSON instead of image data: {}",
                    message.unwrap_or(body_summary)
                ));
            }

            Ok(bytes.to_vec())
        })
        .await
    }

    pub async fn generate_outfit_visualization(
        &self,
        outfit_description: &str,
        body_type: &str,
        skin_tone: &str,
        style: &str,
    ) -> Result<Vec<u8>> {
        let prompt = visualization_prompt(outfit_description, body_type, skin_tone, style);
        self.generate_avatar(
            &prompt,
            512,
            768,
            None,
            Some(VISUALIZATION_NEGATIVE_PROMPT),
            Some(8.0),
        )
        .await
    }
}

fn visualization_prompt(
    outfit_description: &str,
    body_type: &str,
    skin_tone: &str,
    style: &str,
) -> String {
    format!(
        "A fashion illustration of a {body_type} build person with {skin_tone} skin tone, \
         wearing {outfit_description}. {style} style, professional fashion photography, \
         clean white background, full body shot, standing pose, high quality, detailed \
         clothing textures."
    )
}
