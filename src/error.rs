use reqwest::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("could not decode input image: {0}")]
pub struct ImageDecodeError(#[from] image::ImageError);

/// A Pass 1 failure. Always fatal to the pipeline run; no retry happens here.
#[derive(Debug, Error)]
pub enum SynthesisFailure {
    #[error("synthesis endpoint returned status {status}: {detail}")]
    Endpoint { status: StatusCode, detail: String },
    #[error("synthesis endpoint returned an error payload instead of image data: {0}")]
    ErrorPayload(String),
    #[error("synthesis response too small to be an image ({0} bytes)")]
    UndersizedResponse(usize),
    #[error("synthesis request timed out")]
    Timeout,
    #[error("synthesis transport failure: {0}")]
    Transport(reqwest::Error),
    #[error("image codec failure during synthesis: {0}")]
    Codec(#[from] image::ImageError),
}

impl From<reqwest::Error> for SynthesisFailure {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SynthesisFailure::Timeout
        } else {
            SynthesisFailure::Transport(err)
        }
    }
}

/// Every refinement candidate was tried and none produced an image. The
/// pipeline degrades to the Pass 1 composite instead of failing.
#[derive(Debug, Error)]
#[error("no refinement candidate produced an image ({attempted} attempted)")]
pub struct RefinementUnavailable {
    pub attempted: usize,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Decode(#[from] ImageDecodeError),
    #[error(transparent)]
    Synthesis(#[from] SynthesisFailure),
    #[error("could not encode final image: {0}")]
    Encode(#[source] image::ImageError),
}
