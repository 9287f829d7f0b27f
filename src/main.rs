use std::env;
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{anyhow, Context, Result};
use tracing::{error, info};

use outfit_visualizer::config::Config;
use outfit_visualizer::diffusion::BodyAttributes;
use outfit_visualizer::pipeline::OutfitPipeline;
use outfit_visualizer::utils::logging::init_logging;

fn usage() -> &'static str {
    "Usage: outfit_visualizer --image <path> --outfit <description> [--output <path>] \
     [--body-type <type>] [--skin-tone <tone>] [--gender <gender>]"
}

struct CliArgs {
    image: PathBuf,
    outfit: String,
    output: PathBuf,
    body: BodyAttributes,
}

fn parse_args(args: &[String]) -> Result<CliArgs> {
    let mut image: Option<PathBuf> = None;
    let mut outfit: Option<String> = None;
    let mut output = PathBuf::from("outfit_result.png");
    let mut body = BodyAttributes::default();

    let mut index = 1;
    while index < args.len() {
        match args[index].as_str() {
            "--image" => {
                index += 1;
                let value = args
                    .get(index)
                    .ok_or_else(|| anyhow!("Missing value for --image"))?;
                image = Some(PathBuf::from(value));
            }
            "--outfit" => {
                index += 1;
                let value = args
                    .get(index)
                    .ok_or_else(|| anyhow!("Missing value for --outfit"))?;
                outfit = Some(value.clone());
            }
            "--output" => {
                index += 1;
                let value = args
                    .get(index)
                    .ok_or_else(|| anyhow!("Missing value for --output"))?;
                output = PathBuf::from(value);
            }
            "--body-type" => {
                index += 1;
                let value = args
                    .get(index)
                    .ok_or_else(|| anyhow!("Missing value for --body-type"))?;
                body.body_type = value.clone();
            }
            "--skin-tone" => {
                index += 1;
                let value = args
                    .get(index)
                    .ok_or_else(|| anyhow!("Missing value for --skin-tone"))?;
                body.skin_tone = value.clone();
            }
            "--gender" => {
                index += 1;
                let value = args
                    .get(index)
                    .ok_or_else(|| anyhow!("Missing value for --gender"))?;
                body.gender = value.clone();
            }
            other => {
                return Err(anyhow!("Unknown argument: {other}\n{}", usage()));
            }
        }
        index += 1;
    }

    let image = image.ok_or_else(|| anyhow!("--image is required\n{}", usage()))?;
    let outfit = outfit.ok_or_else(|| anyhow!("--outfit is required\n{}", usage()))?;
    Ok(CliArgs {
        image,
        outfit,
        output,
        body,
    })
}

async fn run(args: CliArgs, config: Config) -> Result<()> {
    let image_bytes = fs::read(&args.image)
        .with_context(|| format!("could not read {}", args.image.display()))?;

    let pipeline = OutfitPipeline::from_config(&config);
    let result = pipeline
        .synthesize(&image_bytes, &args.outfit, Some(&args.body))
        .await?;

    fs::write(&args.output, &result.image_png)
        .with_context(|| format!("could not write {}", args.output.display()))?;
    info!(
        "Wrote {} (refined={})",
        args.output.display(),
        result.refined
    );
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Configuration error: {err}");
            return ExitCode::FAILURE;
        }
    };
    let _guards = init_logging(&config.log_level);

    let args: Vec<String> = env::args().collect();
    let cli = match parse_args(&args) {
        Ok(cli) => cli,
        Err(err) => {
            eprintln!("{err}");
            return ExitCode::FAILURE;
        }
    };

    match run(cli, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("Outfit synthesis failed: {err:#}");
            ExitCode::FAILURE
        }
    }
}
