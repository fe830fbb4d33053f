//! Denoising engine abstraction.
//!
//! An engine consumes exactly one frame of `frame_size()` samples at
//! `sample_rate()` in its native numeric range and returns the processed frame
//! plus a voice-activity probability. Engines are owned handles: one per
//! channel stream, moved into the audio thread, never shared.
//!
//! Format conversion and contract checks live in `DenoiseInvoker`; engines may
//! assume they are called correctly but still report misuse as `EngineError`.

use nnnoiseless::DenoiseState;

use crate::error::EngineError;

/// RNNoise frame size (10 ms at 48 kHz)
pub const RNNOISE_FRAME_SIZE: usize = nnnoiseless::FRAME_SIZE;

/// RNNoise native sample rate
pub const RNNOISE_SAMPLE_RATE: u32 = 48_000;

pub trait DenoiseEngine: Send {
    /// Samples per frame. Constant for the engine's lifetime.
    fn frame_size(&self) -> usize;

    /// Native sample rate in Hz.
    fn sample_rate(&self) -> u32;

    /// Process one frame of native-range samples. Returns the voice
    /// probability for the frame.
    fn process_frame(&mut self, output: &mut [f32], input: &[f32]) -> Result<f32, EngineError>;

    /// Forget all internal history.
    fn reset(&mut self);
}

/// Builds one engine per channel stream.
pub trait EngineFactory: Send + Sync {
    fn create(&self) -> Result<Box<dyn DenoiseEngine>, EngineError>;
}

impl<F> EngineFactory for F
where
    F: Fn() -> Result<Box<dyn DenoiseEngine>, EngineError> + Send + Sync,
{
    fn create(&self) -> Result<Box<dyn DenoiseEngine>, EngineError> {
        self()
    }
}

// =============================================================================
// RNNoise
// =============================================================================

pub struct RnnoiseEngine {
    state: Box<DenoiseState<'static>>,
}

impl RnnoiseEngine {
    pub fn new() -> Self {
        Self {
            state: DenoiseState::new(),
        }
    }
}

impl Default for RnnoiseEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl DenoiseEngine for RnnoiseEngine {
    fn frame_size(&self) -> usize {
        RNNOISE_FRAME_SIZE
    }

    fn sample_rate(&self) -> u32 {
        RNNOISE_SAMPLE_RATE
    }

    fn process_frame(&mut self, output: &mut [f32], input: &[f32]) -> Result<f32, EngineError> {
        if input.len() != RNNOISE_FRAME_SIZE || output.len() != RNNOISE_FRAME_SIZE {
            return Err(EngineError::FrameSizeMismatch {
                expected: RNNOISE_FRAME_SIZE,
                actual: input.len().min(output.len()),
            });
        }
        Ok(self.state.process_frame(output, input))
    }

    /// Rebuilds the model state, which allocates. Control path only.
    fn reset(&mut self) {
        self.state = DenoiseState::new();
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RnnoiseFactory;

impl EngineFactory for RnnoiseFactory {
    fn create(&self) -> Result<Box<dyn DenoiseEngine>, EngineError> {
        Ok(Box::new(RnnoiseEngine::new()))
    }
}

// =============================================================================
// Bypass
// =============================================================================

/// Identity engine. Copies the frame and reports a fixed voice probability.
#[derive(Debug, Clone)]
pub struct BypassEngine {
    frame_size: usize,
    sample_rate: u32,
    voice_probability: f32,
}

impl BypassEngine {
    pub fn new(frame_size: usize, sample_rate: u32, voice_probability: f32) -> Self {
        Self {
            frame_size,
            sample_rate,
            voice_probability,
        }
    }

    /// Same frame format as RNNoise.
    pub fn rnnoise_compatible(voice_probability: f32) -> Self {
        Self::new(RNNOISE_FRAME_SIZE, RNNOISE_SAMPLE_RATE, voice_probability)
    }
}

impl DenoiseEngine for BypassEngine {
    fn frame_size(&self) -> usize {
        self.frame_size
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn process_frame(&mut self, output: &mut [f32], input: &[f32]) -> Result<f32, EngineError> {
        if input.len() != self.frame_size || output.len() != self.frame_size {
            return Err(EngineError::FrameSizeMismatch {
                expected: self.frame_size,
                actual: input.len().min(output.len()),
            });
        }
        output.copy_from_slice(input);
        Ok(self.voice_probability)
    }

    fn reset(&mut self) {}
}
