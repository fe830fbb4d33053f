//! Linear-interpolation rate conversion between host and engine rates.
//!
//! Stateless: every call maps one block independently, so there is no priming
//! delay. Only used when the host rate differs from the engine's native rate.

/// Host-rate length of an engine frame: `round(frame * host_rate / engine_rate)`.
pub fn host_frame_size(engine_frame: usize, host_rate: u32, engine_rate: u32) -> usize {
    if host_rate == engine_rate || engine_rate == 0 {
        return engine_frame;
    }
    (engine_frame as f64 * host_rate as f64 / engine_rate as f64).round() as usize
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearResampler {
    input_rate: u32,
    output_rate: u32,
}

impl LinearResampler {
    pub fn new(input_rate: u32, output_rate: u32) -> Self {
        Self {
            input_rate,
            output_rate,
        }
    }

    /// The reverse direction at the same pair of rates.
    pub fn inverse(&self) -> Self {
        Self::new(self.output_rate, self.input_rate)
    }

    pub fn is_passthrough(&self) -> bool {
        self.input_rate == self.output_rate
    }

    /// `output_rate / input_rate`
    pub fn ratio(&self) -> f64 {
        if self.input_rate == 0 {
            return 1.0;
        }
        self.output_rate as f64 / self.input_rate as f64
    }

    /// Resample into a new vector of `round(len * ratio)` samples.
    pub fn resample(&self, samples: &[f32]) -> Vec<f32> {
        if self.is_passthrough() || samples.is_empty() {
            return samples.to_vec();
        }
        let output_len = (samples.len() as f64 * self.ratio()).round() as usize;
        let mut output = vec![0.0; output_len];
        self.resample_into(samples, &mut output);
        output
    }

    /// Fill all of `output` from `input`.
    ///
    /// Reads past the end of `input` hold the last source sample, so a length
    /// that was rounded up never produces a discontinuity. Does not allocate.
    pub fn resample_into(&self, input: &[f32], output: &mut [f32]) {
        let Some(&last) = input.last() else {
            output.fill(0.0);
            return;
        };

        if self.is_passthrough() && input.len() == output.len() {
            output.copy_from_slice(input);
            return;
        }

        let step = 1.0 / self.ratio();
        for (n, out) in output.iter_mut().enumerate() {
            let position = n as f64 * step;
            let base = position.floor() as usize;
            let frac = (position - base as f64) as f32;
            let a = input.get(base).copied().unwrap_or(last);
            let b = input.get(base + 1).copied().unwrap_or(last);
            *out = a + (b - a) * frac;
        }
    }
}
