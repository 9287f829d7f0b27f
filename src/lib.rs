pub mod config;
pub mod diffusion;
pub mod error;
pub mod imaging;
pub mod pipeline;
pub mod utils;

pub use config::Config;
pub use diffusion::{AvatarClient, BodyAttributes, Img2ImgClient, RefineClient};
pub use error::{ImageDecodeError, PipelineError, RefinementUnavailable, SynthesisFailure};
pub use imaging::{GeometricMaskGenerator, MaskGenerator, MaskLayout};
pub use pipeline::{OutfitPipeline, PipelineResult, PipelineStage};
