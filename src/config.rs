//! Runtime configuration: the control-plane snapshot and the pipeline settings.
//!
//! # Design Notes
//! - `NoiseReductionConfig` is a small `Copy` snapshot. The real-time side reads
//!   it once per frame from `AtomicConfig`, which packs it into one `u64`, so a
//!   read can never observe half of an update
//! - `PipelineSettings` is the construction-time layer (queue sizing, channel
//!   handling, event capacity), loadable from JSON

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use nih_plug::prelude::Enum;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigurationError, PipelineError};

// =============================================================================
// Validation limits
// =============================================================================

pub const MIN_SAMPLE_RATE: u32 = 8_000;
pub const MAX_SAMPLE_RATE: u32 = 192_000;
pub const MAX_CHANNELS: usize = 32;
pub const MAX_BLOCK_SIZE: usize = 65_536;

pub const DEFAULT_MAX_BLOCK_SIZE: usize = 4096;
pub const DEFAULT_EVENT_CAPACITY: usize = 64;
pub const DEFAULT_VOICE_THRESHOLD: f32 = 0.5;

/// Check a stream format against the supported ranges.
pub fn validate_stream(
    sample_rate: u32,
    channels: usize,
    max_block: usize,
) -> Result<(), ConfigurationError> {
    if !(MIN_SAMPLE_RATE..=MAX_SAMPLE_RATE).contains(&sample_rate) {
        return Err(ConfigurationError::InvalidSampleRate(sample_rate));
    }
    if channels == 0 || channels > MAX_CHANNELS {
        return Err(ConfigurationError::InvalidChannelCount(channels));
    }
    if max_block == 0 || max_block > MAX_BLOCK_SIZE {
        return Err(ConfigurationError::InvalidBlockSize(max_block));
    }
    Ok(())
}

// =============================================================================
// REDUCTION LEVEL
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Enum)]
#[repr(usize)]
pub enum ReductionLevel {
    #[serde(rename = "low")]
    #[name = "Low"]
    Low,
    #[serde(rename = "medium")]
    #[name = "Medium"]
    Medium,
    #[serde(rename = "high")]
    #[name = "High"]
    High,
}

impl ReductionLevel {
    /// Base attenuation strength before adaptive relaxation.
    pub fn strength(&self) -> f32 {
        match self {
            ReductionLevel::Low => 0.5,
            ReductionLevel::Medium => 0.7,
            ReductionLevel::High => 0.9,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ReductionLevel::Low => "Low",
            ReductionLevel::Medium => "Medium",
            ReductionLevel::High => "High",
        }
    }

    /// Case-insensitive lookup by name, as typed on a command line.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "low" => Some(ReductionLevel::Low),
            "medium" => Some(ReductionLevel::Medium),
            "high" => Some(ReductionLevel::High),
            _ => None,
        }
    }

    fn bits(self) -> u64 {
        match self {
            ReductionLevel::Low => 0,
            ReductionLevel::Medium => 1,
            ReductionLevel::High => 2,
        }
    }

    fn from_bits(bits: u64) -> Self {
        match bits {
            0 => ReductionLevel::Low,
            2 => ReductionLevel::High,
            _ => ReductionLevel::Medium,
        }
    }
}

impl Default for ReductionLevel {
    fn default() -> Self {
        ReductionLevel::Medium
    }
}

// =============================================================================
// CONFIG SNAPSHOT
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NoiseReductionConfig {
    pub level: ReductionLevel,
    pub enabled: bool,
    /// Voice probability below which a frame is treated as noise
    pub voice_threshold: f32,
    pub adaptive_mode: bool,
}

impl Default for NoiseReductionConfig {
    fn default() -> Self {
        Self {
            level: ReductionLevel::Medium,
            enabled: true,
            voice_threshold: DEFAULT_VOICE_THRESHOLD,
            adaptive_mode: true,
        }
    }
}

impl NoiseReductionConfig {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        validate_threshold(self.voice_threshold)
    }
}

pub fn validate_threshold(threshold: f32) -> Result<(), ConfigurationError> {
    if threshold.is_finite() && (0.0..=1.0).contains(&threshold) {
        Ok(())
    } else {
        Err(ConfigurationError::InvalidThreshold(threshold))
    }
}

// Bit layout of the packed snapshot
const THRESHOLD_MASK: u64 = 0xFFFF_FFFF;
const ENABLED_BIT: u64 = 1 << 32;
const ADAPTIVE_BIT: u64 = 1 << 33;
const LEVEL_SHIFT: u32 = 34;
const LEVEL_MASK: u64 = 0b11;

fn pack(config: &NoiseReductionConfig) -> u64 {
    let mut word = config.voice_threshold.to_bits() as u64;
    if config.enabled {
        word |= ENABLED_BIT;
    }
    if config.adaptive_mode {
        word |= ADAPTIVE_BIT;
    }
    word | (config.level.bits() << LEVEL_SHIFT)
}

fn unpack(word: u64) -> NoiseReductionConfig {
    NoiseReductionConfig {
        level: ReductionLevel::from_bits((word >> LEVEL_SHIFT) & LEVEL_MASK),
        enabled: word & ENABLED_BIT != 0,
        voice_threshold: f32::from_bits((word & THRESHOLD_MASK) as u32),
        adaptive_mode: word & ADAPTIVE_BIT != 0,
    }
}

/// Lock-free holder for the current `NoiseReductionConfig`.
#[derive(Debug)]
pub struct AtomicConfig {
    word: AtomicU64,
}

impl AtomicConfig {
    pub fn new(config: NoiseReductionConfig) -> Self {
        Self {
            word: AtomicU64::new(pack(&config)),
        }
    }

    pub fn load(&self) -> NoiseReductionConfig {
        unpack(self.word.load(Ordering::Acquire))
    }

    /// Replace the whole snapshot. Callers validate first.
    pub fn store(&self, config: NoiseReductionConfig) {
        self.word.store(pack(&config), Ordering::Release);
    }

    /// Read-modify-write one or more fields. Returns the previous snapshot.
    pub fn update<F>(&self, mut f: F) -> NoiseReductionConfig
    where
        F: FnMut(&mut NoiseReductionConfig),
    {
        let previous = self
            .word
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |word| {
                let mut config = unpack(word);
                f(&mut config);
                Some(pack(&config))
            })
            .unwrap_or_else(|word| word);
        unpack(previous)
    }
}

impl Default for AtomicConfig {
    fn default() -> Self {
        Self::new(NoiseReductionConfig::default())
    }
}

// =============================================================================
// PIPELINE SETTINGS
// =============================================================================

/// How multi-channel input is fed to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelMode {
    /// One engine per channel.
    #[serde(rename = "independent")]
    Independent,
    /// Channels averaged into one engine stream; the result is written to
    /// every output channel.
    #[serde(rename = "mix_to_mono")]
    MixToMono,
}

impl Default for ChannelMode {
    fn default() -> Self {
        ChannelMode::Independent
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Largest host buffer that will be passed to `process`. Larger buffers
    /// are processed in chunks of this size.
    pub max_block_size: usize,
    pub channel_mode: ChannelMode,
    /// Events beyond this many undrained ones are dropped
    pub event_capacity: usize,
    pub initial_config: NoiseReductionConfig,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            max_block_size: DEFAULT_MAX_BLOCK_SIZE,
            channel_mode: ChannelMode::Independent,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            initial_config: NoiseReductionConfig::default(),
        }
    }
}

impl PipelineSettings {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.max_block_size == 0 || self.max_block_size > MAX_BLOCK_SIZE {
            return Err(ConfigurationError::InvalidBlockSize(self.max_block_size));
        }
        self.initial_config.validate()
    }

    /// Parse and validate settings from JSON. Missing fields take defaults.
    pub fn from_json_str(json: &str) -> Result<Self, PipelineError> {
        let settings: Self = serde_json::from_str(json)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, PipelineError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn to_json_string(&self) -> Result<String, PipelineError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let c = NoiseReductionConfig::default();
        assert_eq!(c.level, ReductionLevel::Medium);
        assert!(c.enabled);
        assert_eq!(c.voice_threshold, 0.5);
        assert!(c.adaptive_mode);
    }

    #[test]
    fn test_pack_unpack_preserves_every_field() {
        for level in [ReductionLevel::Low, ReductionLevel::Medium, ReductionLevel::High] {
            for enabled in [false, true] {
                for adaptive_mode in [false, true] {
                    let c = NoiseReductionConfig {
                        level,
                        enabled,
                        voice_threshold: 0.37,
                        adaptive_mode,
                    };
                    assert_eq!(unpack(pack(&c)), c);
                }
            }
        }
    }

    #[test]
    fn test_atomic_update_returns_previous() {
        let config = AtomicConfig::default();
        let previous = config.update(|c| {
            c.enabled = false;
            c.level = ReductionLevel::High;
        });
        assert!(previous.enabled);
        let now = config.load();
        assert!(!now.enabled);
        assert_eq!(now.level, ReductionLevel::High);
        assert_eq!(now.voice_threshold, 0.5);
    }

    #[test]
    fn test_threshold_validation() {
        assert!(validate_threshold(0.0).is_ok());
        assert!(validate_threshold(1.0).is_ok());
        assert!(validate_threshold(1.01).is_err());
        assert!(validate_threshold(-0.1).is_err());
        assert!(validate_threshold(f32::NAN).is_err());
        assert!(validate_threshold(f32::INFINITY).is_err());
    }

    #[test]
    fn test_stream_validation() {
        assert!(validate_stream(48_000, 2, 512).is_ok());
        assert_eq!(
            validate_stream(7_999, 2, 512),
            Err(ConfigurationError::InvalidSampleRate(7_999))
        );
        assert_eq!(
            validate_stream(48_000, 33, 512),
            Err(ConfigurationError::InvalidChannelCount(33))
        );
        assert_eq!(
            validate_stream(48_000, 1, 65_537),
            Err(ConfigurationError::InvalidBlockSize(65_537))
        );
    }

    #[test]
    fn test_level_names() {
        assert_eq!(ReductionLevel::from_name("HIGH"), Some(ReductionLevel::High));
        assert_eq!(ReductionLevel::from_name("loud"), None);
        assert_eq!(ReductionLevel::Low.name(), "Low");
    }

    #[test]
    fn test_settings_json_fills_defaults() {
        let s = PipelineSettings::from_json_str(
            r#"{ "channel_mode": "mix_to_mono", "initial_config": { "level": "high" } }"#,
        )
        .unwrap();
        assert_eq!(s.channel_mode, ChannelMode::MixToMono);
        assert_eq!(s.max_block_size, DEFAULT_MAX_BLOCK_SIZE);
        assert_eq!(s.initial_config.level, ReductionLevel::High);
        assert!(s.initial_config.enabled);
    }

    #[test]
    fn test_settings_json_is_validated() {
        let err = PipelineSettings::from_json_str(r#"{ "max_block_size": 0 }"#).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Configuration(ConfigurationError::InvalidBlockSize(0))
        ));

        let err =
            PipelineSettings::from_json_str(r#"{ "initial_config": { "voice_threshold": 3.0 } }"#)
                .unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(_)));

        assert!(matches!(
            PipelineSettings::from_json_str("{ not json"),
            Err(PipelineError::SettingsFormat(_))
        ));
    }

    #[test]
    fn test_settings_serialize_round_trip() {
        let s = PipelineSettings::default();
        let json = s.to_json_string().unwrap();
        assert_eq!(PipelineSettings::from_json_str(&json).unwrap(), s);
    }
}
