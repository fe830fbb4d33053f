//! One guarded call into a denoising engine.
//!
//! Converts normalized `[-1, 1]` floats into the engine's 16-bit native range
//! and back, enforces the exact frame length, and sanitizes the reported voice
//! probability. Engine errors fail the frame; they never panic.

use super::denoise_engine::DenoiseEngine;
use crate::error::EngineError;

/// Maps `[-1.0, 1.0]` to the 16-bit range the engine works in
const PCM_SCALE: f32 = 32768.0;
const PCM_MIN: f32 = -32768.0;
const PCM_MAX: f32 = 32767.0;

/// Normalized float to native 16-bit scale, rounded and saturated.
#[inline]
pub fn convert_in(x: f32) -> f32 {
    if x.is_nan() {
        return 0.0;
    }
    (x * PCM_SCALE).round().clamp(PCM_MIN, PCM_MAX)
}

/// Native 16-bit scale back to normalized float.
#[inline]
pub fn convert_out(x: f32) -> f32 {
    x / PCM_SCALE
}

/// Clamp to `[0, 1]`; NaN becomes 0.
#[inline]
pub fn sanitize_probability(p: f32) -> f32 {
    if p.is_nan() {
        0.0
    } else {
        p.clamp(0.0, 1.0)
    }
}

pub struct DenoiseInvoker {
    engine: Box<dyn DenoiseEngine>,
    native_in: Vec<f32>,
    native_out: Vec<f32>,
}

impl DenoiseInvoker {
    pub fn new(engine: Box<dyn DenoiseEngine>) -> Self {
        let f = engine.frame_size();
        Self {
            engine,
            native_in: vec![0.0; f],
            native_out: vec![0.0; f],
        }
    }

    pub fn frame_size(&self) -> usize {
        self.engine.frame_size()
    }

    pub fn sample_rate(&self) -> u32 {
        self.engine.sample_rate()
    }

    /// Denoise one frame of normalized samples into `output`.
    ///
    /// `output` is left untouched on failure.
    pub fn process(&mut self, input: &[f32], output: &mut [f32]) -> Result<f32, EngineError> {
        let f = self.native_in.len();
        if input.len() != f || output.len() != f {
            return Err(EngineError::FrameSizeMismatch {
                expected: f,
                actual: input.len(),
            });
        }

        for (n, &x) in self.native_in.iter_mut().zip(input) {
            *n = convert_in(x);
        }

        let probability = self
            .engine
            .process_frame(&mut self.native_out, &self.native_in)?;

        for (o, &n) in output.iter_mut().zip(&self.native_out) {
            *o = convert_out(n);
        }
        Ok(sanitize_probability(probability))
    }

    pub fn reset(&mut self) {
        self.engine.reset();
        self.native_in.fill(0.0);
        self.native_out.fill(0.0);
    }
}
