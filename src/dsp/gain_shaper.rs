//! Post-engine attenuation driven by voice-activity confidence.
//!
//! Frames the engine rates as non-voice (`p < voice_threshold`) are pulled down
//! by `1 - strength * 0.3`, where `strength` comes from the reduction level and,
//! in adaptive mode, is relaxed in proportion to the voice probability.
//! Voice frames pass unchanged.
//!
//! The smoothed `voice_detected` flag is for metrics only; it never changes the
//! gain.

use crate::config::{NoiseReductionConfig, ReductionLevel};

/// Frames of voice probability kept for the hysteresis mean
pub const VOICE_HISTORY_LEN: usize = 10;

/// Half-width of the hysteresis band around the voice threshold
const HYSTERESIS_MARGIN: f32 = 0.1;

/// Fraction of `strength` removed from non-voice frames
const NON_VOICE_DEPTH: f32 = 0.3;

/// How much full voice confidence relaxes the strength in adaptive mode
const ADAPTIVE_RELAX: f32 = 0.5;

// =============================================================================
// Voice activity history
// =============================================================================

/// Fixed ring of the most recent voice probabilities.
#[derive(Debug, Clone)]
pub struct VoiceActivityHistory {
    values: [f32; VOICE_HISTORY_LEN],
    next: usize,
    len: usize,
}

impl Default for VoiceActivityHistory {
    fn default() -> Self {
        Self {
            values: [0.0; VOICE_HISTORY_LEN],
            next: 0,
            len: 0,
        }
    }
}

impl VoiceActivityHistory {
    /// Record a probability, evicting the oldest once full.
    pub fn push(&mut self, probability: f32) {
        self.values[self.next] = probability;
        self.next = (self.next + 1) % VOICE_HISTORY_LEN;
        self.len = (self.len + 1).min(VOICE_HISTORY_LEN);
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Mean of the stored probabilities, 0.0 when empty.
    pub fn mean(&self) -> f32 {
        if self.len == 0 {
            return 0.0;
        }
        // Until full, the stored values are exactly the first `len` slots
        self.values[..self.len].iter().sum::<f32>() / self.len as f32
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

// =============================================================================
// Shaper
// =============================================================================

/// Level strength, relaxed by voice probability in adaptive mode.
pub fn reduction_strength(level: ReductionLevel, adaptive: bool, voice_probability: f32) -> f32 {
    let base = level.strength();
    if adaptive {
        base * (1.0 - voice_probability * ADAPTIVE_RELAX)
    } else {
        base
    }
}

/// Linear gain applied to a frame with the given voice probability.
pub fn frame_gain(config: &NoiseReductionConfig, voice_probability: f32) -> f32 {
    if voice_probability < config.voice_threshold {
        let strength = reduction_strength(config.level, config.adaptive_mode, voice_probability);
        1.0 - strength * NON_VOICE_DEPTH
    } else {
        1.0
    }
}

#[derive(Debug, Clone, Default)]
pub struct AdaptiveGainShaper {
    history: VoiceActivityHistory,
    voice_detected: bool,
}

impl AdaptiveGainShaper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attenuate `frame` in place according to `config` and return the gain used.
    ///
    /// Also feeds the probability into the hysteresis tracker.
    pub fn process(
        &mut self,
        config: &NoiseReductionConfig,
        voice_probability: f32,
        frame: &mut [f32],
    ) -> f32 {
        self.track_voice_activity(voice_probability, config.voice_threshold);

        let gain = frame_gain(config, voice_probability);
        if gain != 1.0 {
            for s in frame.iter_mut() {
                *s *= gain;
            }
        }
        gain
    }

    /// Update the smoothed voice flag. Returns the new state.
    pub fn track_voice_activity(&mut self, voice_probability: f32, threshold: f32) -> bool {
        self.history.push(voice_probability);
        let mean = self.history.mean();
        if mean > threshold + HYSTERESIS_MARGIN {
            self.voice_detected = true;
        } else if mean < threshold - HYSTERESIS_MARGIN {
            self.voice_detected = false;
        }
        self.voice_detected
    }

    pub fn voice_detected(&self) -> bool {
        self.voice_detected
    }

    pub fn reset(&mut self) {
        self.history.clear();
        self.voice_detected = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(level: ReductionLevel, adaptive: bool) -> NoiseReductionConfig {
        NoiseReductionConfig {
            level,
            enabled: true,
            voice_threshold: 0.5,
            adaptive_mode: adaptive,
        }
    }

    #[test]
    fn test_history_evicts_oldest() {
        let mut h = VoiceActivityHistory::default();
        assert_eq!(h.mean(), 0.0);
        for _ in 0..VOICE_HISTORY_LEN {
            h.push(1.0);
        }
        assert_eq!(h.mean(), 1.0);
        for _ in 0..5 {
            h.push(0.0);
        }
        assert_eq!(h.len(), VOICE_HISTORY_LEN);
        assert!((h.mean() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_non_voice_gain_values() {
        let g = frame_gain(&config(ReductionLevel::Medium, false), 0.2);
        assert!((g - (1.0 - 0.7 * 0.3)).abs() < 1e-6);
        // Voice frames are untouched
        assert_eq!(frame_gain(&config(ReductionLevel::High, false), 0.9), 1.0);
        // Exactly at threshold counts as voice
        assert_eq!(frame_gain(&config(ReductionLevel::High, false), 0.5), 1.0);
    }

    #[test]
    fn test_gain_monotonic_in_level() {
        for adaptive in [false, true] {
            for p in [0.0, 0.2, 0.49] {
                let low = frame_gain(&config(ReductionLevel::Low, adaptive), p);
                let med = frame_gain(&config(ReductionLevel::Medium, adaptive), p);
                let high = frame_gain(&config(ReductionLevel::High, adaptive), p);
                assert!(low > med && med > high, "p={} adaptive={}", p, adaptive);
            }
        }
    }

    #[test]
    fn test_adaptive_relaxes_with_probability() {
        let plain = frame_gain(&config(ReductionLevel::High, false), 0.4);
        let adaptive = frame_gain(&config(ReductionLevel::High, true), 0.4);
        assert!(adaptive > plain);
        // Zero probability leaves the strength unchanged
        assert_eq!(
            frame_gain(&config(ReductionLevel::High, true), 0.0),
            frame_gain(&config(ReductionLevel::High, false), 0.0)
        );
    }

    #[test]
    fn test_process_scales_frame() {
        let mut shaper = AdaptiveGainShaper::new();
        let mut frame = [1.0f32; 8];
        let gain = shaper.process(&config(ReductionLevel::Low, false), 0.0, &mut frame);
        assert!((gain - 0.85).abs() < 1e-6);
        assert!(frame.iter().all(|&v| (v - 0.85).abs() < 1e-6));
    }

    #[test]
    fn test_hysteresis() {
        let mut shaper = AdaptiveGainShaper::new();
        let threshold = 0.5;

        // Inside the band: stays false
        for _ in 0..VOICE_HISTORY_LEN {
            assert!(!shaper.track_voice_activity(0.55, threshold));
        }
        // Above the band: switches on
        for _ in 0..VOICE_HISTORY_LEN {
            shaper.track_voice_activity(0.9, threshold);
        }
        assert!(shaper.voice_detected());

        // Back inside the band: holds
        for _ in 0..VOICE_HISTORY_LEN {
            shaper.track_voice_activity(0.45, threshold);
        }
        assert!(shaper.voice_detected());

        // Below the band: switches off
        for _ in 0..VOICE_HISTORY_LEN {
            shaper.track_voice_activity(0.1, threshold);
        }
        assert!(!shaper.voice_detected());
    }

    #[test]
    fn test_reset_clears_history() {
        let mut shaper = AdaptiveGainShaper::new();
        for _ in 0..VOICE_HISTORY_LEN {
            shaper.track_voice_activity(1.0, 0.5);
        }
        assert!(shaper.voice_detected());
        shaper.reset();
        assert!(!shaper.voice_detected());
        assert!(shaper.history.is_empty());
    }
}
