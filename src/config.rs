use std::collections::HashMap;
use std::env;

use anyhow::Result;
use tracing::info;

const DEFAULT_API_BASE_URL: &str = "https://api.cloudflare.com/client/v4";

// Model name -> Workers AI provider identifier. Built once, never mutated.
fn builtin_model_table() -> HashMap<String, String> {
    [
        ("sdxl", "@cf/stabilityai/stable-diffusion-xl-base-1.0"),
        ("img2img", "@cf/runwayml/stable-diffusion-v1-5-img2img"),
        ("dreamshaper", "@cf/lykon/dreamshaper-8-lcm"),
        ("flux2-klein-9b", "@cf/black-forest-labs/flux-2-klein-9b"),
        ("flux2-klein-4b", "@cf/black-forest-labs/flux-2-klein-4b"),
    ]
    .into_iter()
    .map(|(name, model)| (name.to_string(), model.to_string()))
    .collect()
}

#[derive(Debug, Clone)]
pub struct Config {
    pub account_id: String,
    pub api_token: String,
    pub api_base_url: String,
    pub log_level: String,
    pub synthesis_model: String,
    pub refinement_models: Vec<String>,
    pub avatar_model: String,
    pub synthesis_strength: f32,
    pub synthesis_guidance: f32,
    pub synthesis_steps: u32,
    pub avatar_guidance: f32,
    pub avatar_steps: u32,
    pub synthesis_timeout_secs: u64,
    pub refinement_timeout_secs: u64,
    pub avatar_timeout_secs: u64,
    pub synthesis_max_size: u32,
    pub refinement_max_size: u32,
    pub min_image_response_bytes: usize,
    pub mask_feather_sigma: f32,
    models: HashMap<String, String>,
}

fn env_string(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_f32(name: &str, default: f32) -> f32 {
    env::var(name)
        .ok()
        .and_then(|value| value.parse::<f32>().ok())
        .unwrap_or(default)
}

fn env_u32(name: &str, default: u32) -> u32 {
    env::var(name)
        .ok()
        .and_then(|value| value.parse::<u32>().ok())
        .unwrap_or(default)
}

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_usize(name: &str, default: usize) -> usize {
    env::var(name)
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .unwrap_or(default)
}

fn parse_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim().to_string())
        .filter(|entry| !entry.is_empty())
        .collect()
}

fn env_csv(name: &str, default: &str) -> Vec<String> {
    parse_csv(&env::var(name).unwrap_or_else(|_| default.to_string()))
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let account_id = env_string("CLOUDFLARE_ACCOUNT_ID", "");
        if account_id.trim().is_empty() {
            return Err(anyhow::anyhow!("CLOUDFLARE_ACCOUNT_ID is required"));
        }
        let api_token = env_string("CLOUDFLARE_API_TOKEN", "");
        if api_token.trim().is_empty() {
            return Err(anyhow::anyhow!("CLOUDFLARE_API_TOKEN is required"));
        }

        let mut refinement_models = env_csv("REFINEMENT_MODELS", "flux2-klein-9b,flux2-klein-4b");
        if refinement_models.is_empty() {
            refinement_models = vec!["flux2-klein-9b".to_string(), "flux2-klein-4b".to_string()];
        }

        let config = Config {
            account_id,
            api_token,
            api_base_url: env_string("CLOUDFLARE_API_BASE_URL", DEFAULT_API_BASE_URL),
            log_level: env_string("LOG_LEVEL", "info").to_lowercase(),
            synthesis_model: env_string("SYNTHESIS_MODEL", "img2img"),
            refinement_models,
            avatar_model: env_string("AVATAR_MODEL", "sdxl"),
            synthesis_strength: env_f32("SYNTHESIS_STRENGTH", 0.75),
            synthesis_guidance: env_f32("SYNTHESIS_GUIDANCE", 9.5),
            synthesis_steps: env_u32("SYNTHESIS_STEPS", 20),
            avatar_guidance: env_f32("AVATAR_GUIDANCE", 7.5),
            avatar_steps: env_u32("AVATAR_STEPS", 20),
            synthesis_timeout_secs: env_u64("SYNTHESIS_TIMEOUT_SECONDS", 120),
            refinement_timeout_secs: env_u64("REFINEMENT_TIMEOUT_SECONDS", 180),
            avatar_timeout_secs: env_u64("AVATAR_TIMEOUT_SECONDS", 60),
            synthesis_max_size: env_u32("SYNTHESIS_MAX_SIZE", 512),
            refinement_max_size: env_u32("REFINEMENT_MAX_SIZE", 768),
            min_image_response_bytes: env_usize("MIN_IMAGE_RESPONSE_BYTES", 1000),
            mask_feather_sigma: env_f32("MASK_FEATHER_SIGMA", 6.0),
            models: builtin_model_table(),
        };

        info!(
            "Loaded configuration: synthesis={}, refinement=[{}], avatar={}",
            config.synthesis_model,
            config.refinement_models.join(","),
            config.avatar_model
        );
        Ok(config)
    }

    /// Resolves a model name through the table; a name not in the table is
    /// treated as a raw provider identifier so env overrides can point at
    /// models the table does not know about.
    pub fn model_id<'a>(&'a self, name: &'a str) -> &'a str {
        self.models.get(name).map(String::as_str).unwrap_or(name)
    }

    pub fn model_table(&self) -> &HashMap<String, String> {
        &self.models
    }

    pub fn run_url(&self, model_id: &str) -> String {
        format!(
            "{}/accounts/{}/ai/run/{}",
            self.api_base_url.trim_end_matches('/'),
            self.account_id,
            model_id
        )
    }

    #[cfg(test)]
    pub(crate) fn for_tests() -> Self {
        Config {
            account_id: "acct".to_string(),
            api_token: "token".to_string(),
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            log_level: "info".to_string(),
            synthesis_model: "img2img".to_string(),
            refinement_models: vec!["flux2-klein-9b".to_string(), "flux2-klein-4b".to_string()],
            avatar_model: "sdxl".to_string(),
            synthesis_strength: 0.75,
            synthesis_guidance: 9.5,
            synthesis_steps: 20,
            avatar_guidance: 7.5,
            avatar_steps: 20,
            synthesis_timeout_secs: 120,
            refinement_timeout_secs: 180,
            avatar_timeout_secs: 60,
            synthesis_max_size: 512,
            refinement_max_size: 768,
            min_image_response_bytes: 1000,
            mask_feather_sigma: 6.0,
            models: builtin_model_table(),
        }
    }
}
