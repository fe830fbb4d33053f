//! Error taxonomy for the noise reduction pipeline.
//!
//! Only the control path ever sees these as `Err` values. Inside
//! `NoiseReductionPipeline::process` every failure is absorbed and reported
//! through statistics and `PipelineEvent`s instead.

use thiserror::Error;

/// Rejected stream or parameter configuration.
///
/// Returned by `initialize`, `reconfigure` and `set_config`; the pipeline
/// keeps its previous state when one of these is produced.
#[derive(Error, Debug, Clone, Copy, PartialEq)]
pub enum ConfigurationError {
    #[error("unsupported sample rate {0} Hz (expected 8000..=192000)")]
    InvalidSampleRate(u32),

    #[error("unsupported channel count {0} (expected 1..=32)")]
    InvalidChannelCount(usize),

    #[error("unsupported maximum block size {0} (expected 1..=65536)")]
    InvalidBlockSize(usize),

    #[error("voice threshold {0} is outside 0.0..=1.0")]
    InvalidThreshold(f32),

    #[error("engine reports an invalid frame size {0}")]
    InvalidFrameSize(usize),

    #[error("engines disagree on stream format ({expected_rate} Hz / {expected_frame} vs {actual_rate} Hz / {actual_frame})")]
    EngineFormatMismatch {
        expected_rate: u32,
        expected_frame: usize,
        actual_rate: u32,
        actual_frame: usize,
    },
}

/// Failure reported by a denoising engine or by the invoker guarding it.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("frame has {actual} samples, engine requires exactly {expected}")]
    FrameSizeMismatch { expected: usize, actual: usize },

    #[error("denoising engine failed to construct: {0}")]
    Construction(String),

    #[error("denoising engine rejected the frame: {0}")]
    Rejected(&'static str),
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error("denoising engine unavailable: {0}")]
    EngineUnavailable(#[from] EngineError),

    #[error("failed to read pipeline settings: {0}")]
    SettingsIo(#[from] std::io::Error),

    #[error("failed to parse pipeline settings: {0}")]
    SettingsFormat(#[from] serde_json::Error),
}
