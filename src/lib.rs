//! Real-time microphone noise reduction.
//!
//! The library core is [`NoiseReductionPipeline`]: host-sized buffers in,
//! fixed engine frames through RNNoise and an adaptive gain stage, host-sized
//! buffers out. The same pipeline is exported as a CLAP/VST3 effect.

pub mod config;
pub mod dsp;
pub mod error;
pub mod events;
pub mod pipeline;
pub mod stats;

pub use config::{ChannelMode, NoiseReductionConfig, PipelineSettings, ReductionLevel};
pub use dsp::{AudioBlock, AudioBlockMut, DenoiseEngine, EngineFactory, SampleBuffer};
pub use error::{ConfigurationError, EngineError, PipelineError};
pub use events::{EventDrainTimer, PipelineEvent};
pub use pipeline::{NoiseReductionPipeline, PipelineHandle, PipelineState, ProcessOutcome};
pub use stats::NoiseReductionStats;

use assert_no_alloc::permit_alloc;
use log::error;
use nih_plug::prelude::*;
use std::sync::Arc;

use crate::config::MAX_BLOCK_SIZE;

/// Audio time between scheduled event drains.
const EVENT_DRAIN_PERIOD_MS: u32 = 250;

// -----------------------------------------------------------------------------
// PARAMETERS
// -----------------------------------------------------------------------------
#[derive(Params)]
pub struct QuietvoxParams {
    #[id = "enabled"]
    pub enabled: BoolParam,

    #[id = "level"]
    pub level: EnumParam<ReductionLevel>,

    /// Voice probability below which a frame is attenuated
    #[id = "voice_threshold"]
    pub voice_threshold: FloatParam,

    #[id = "adaptive"]
    pub adaptive: BoolParam,
}

impl QuietvoxParams {
    fn snapshot(&self) -> NoiseReductionConfig {
        NoiseReductionConfig {
            level: self.level.value(),
            enabled: self.enabled.value(),
            voice_threshold: self.voice_threshold.value(),
            adaptive_mode: self.adaptive.value(),
        }
    }
}

impl Default for QuietvoxParams {
    fn default() -> Self {
        let defaults = NoiseReductionConfig::default();
        Self {
            enabled: BoolParam::new("Enabled", defaults.enabled),
            level: EnumParam::new("Level", defaults.level),
            voice_threshold: FloatParam::new(
                "Voice Threshold",
                defaults.voice_threshold,
                FloatRange::Linear { min: 0.0, max: 1.0 },
            )
            .with_value_to_string(Arc::new(|v| format!("{:.2}", v))),
            adaptive: BoolParam::new("Adaptive", defaults.adaptive_mode),
        }
    }
}

/// Work handed from the audio thread to nih_plug's background thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuietvoxTask {
    /// Forward queued pipeline events to the log
    DrainEvents,
}

// -----------------------------------------------------------------------------
// PLUGIN
// -----------------------------------------------------------------------------
pub struct QuietvoxPlugin {
    params: Arc<QuietvoxParams>,
    pipeline: Option<NoiseReductionPipeline>,
    handle: Option<PipelineHandle>,
    drain_timer: EventDrainTimer,
}

impl Default for QuietvoxPlugin {
    fn default() -> Self {
        let params = Arc::new(QuietvoxParams::default());
        let settings = PipelineSettings {
            initial_config: params.snapshot(),
            ..PipelineSettings::default()
        };
        // Engines are built later by `initialize`; this only creates channels
        let pipeline = match NoiseReductionPipeline::with_rnnoise(settings) {
            Ok(pipeline) => Some(pipeline),
            Err(e) => {
                error!("Failed to create noise reduction pipeline: {}", e);
                None
            }
        };
        let handle = pipeline.as_ref().map(NoiseReductionPipeline::handle);

        Self {
            params,
            pipeline,
            handle,
            drain_timer: EventDrainTimer::new(48_000, EVENT_DRAIN_PERIOD_MS),
        }
    }
}

impl QuietvoxPlugin {
    fn drain_events(&self) {
        if let Some(handle) = &self.handle {
            handle.drain_events_to_log();
        }
    }

    fn process_internal(
        &mut self,
        buffer: &mut Buffer,
        context: &mut impl ProcessContext<Self>,
    ) -> ProcessStatus {
        let (Some(pipeline), Some(handle)) = (self.pipeline.as_mut(), self.handle.as_ref()) else {
            return ProcessStatus::Normal;
        };

        // Parameter ranges keep the threshold valid, so this never fails
        let config = self.params.snapshot();
        if config != handle.config() {
            let _ = handle.set_config(config);
        }

        pipeline.process_block(buffer.as_slice());

        if self.drain_timer.tick(buffer.samples()) {
            context.execute_background(QuietvoxTask::DrainEvents);
        }
        ProcessStatus::Normal
    }
}

impl Plugin for QuietvoxPlugin {
    const NAME: &'static str = "Quietvox";
    const VENDOR: &'static str = "Quietvox Developers";
    const URL: &'static str = "";
    const EMAIL: &'static str = "";
    const VERSION: &'static str = env!("CARGO_PKG_VERSION");

    const AUDIO_IO_LAYOUTS: &'static [AudioIOLayout] = &[
        AudioIOLayout {
            main_input_channels: NonZeroU32::new(2),
            main_output_channels: NonZeroU32::new(2),
            ..AudioIOLayout::const_default()
        },
        AudioIOLayout {
            main_input_channels: NonZeroU32::new(1),
            main_output_channels: NonZeroU32::new(1),
            ..AudioIOLayout::const_default()
        },
    ];

    const MIDI_INPUT: MidiConfig = MidiConfig::None;
    const SAMPLE_ACCURATE_AUTOMATION: bool = false;

    type SysExMessage = ();
    type BackgroundTask = QuietvoxTask;

    fn params(&self) -> Arc<dyn Params> {
        self.params.clone()
    }

    fn initialize(
        &mut self,
        audio_io_layout: &AudioIOLayout,
        buffer_config: &BufferConfig,
        context: &mut impl InitContext<Self>,
    ) -> bool {
        std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let sample_rate = buffer_config.sample_rate.round() as u32;
            let channels = audio_io_layout
                .main_input_channels
                .map(NonZeroU32::get)
                .unwrap_or(2) as usize;
            // Larger host buffers are processed in chunks
            let max_block = (buffer_config.max_buffer_size as usize).clamp(1, MAX_BLOCK_SIZE);

            self.drain_timer = EventDrainTimer::new(sample_rate, EVENT_DRAIN_PERIOD_MS);

            permit_alloc(|| {
                let Some(pipeline) = self.pipeline.as_mut() else {
                    return false;
                };
                if let Err(e) = pipeline.reconfigure(sample_rate, channels, max_block) {
                    error!("Failed to initialize noise reduction: {}", e);
                    return false;
                }

                context.set_latency_samples(pipeline.latency_samples() as u32);
                self.drain_events();
                true
            })
        }))
        .unwrap_or(false)
    }

    fn task_executor(&mut self) -> TaskExecutor<Self> {
        let handle = self.handle.clone();
        Box::new(move |task| match task {
            QuietvoxTask::DrainEvents => {
                if let Some(handle) = &handle {
                    handle.drain_events_to_log();
                }
            }
        })
    }

    fn process(
        &mut self,
        buffer: &mut Buffer,
        _aux: &mut AuxiliaryBuffers,
        context: &mut impl ProcessContext<Self>,
    ) -> ProcessStatus {
        std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            self.process_internal(buffer, context)
        }))
        .unwrap_or(ProcessStatus::Normal)
    }

    fn reset(&mut self) {
        std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            // Rebuilding engine state allocates
            permit_alloc(|| {
                if let Some(pipeline) = self.pipeline.as_mut() {
                    pipeline.reset();
                }
            });
        }))
        .unwrap_or(());
    }

    fn deactivate(&mut self) {
        self.drain_events();
    }
}

impl ClapPlugin for QuietvoxPlugin {
    const CLAP_ID: &'static str = "com.quietvox.denoise";
    const CLAP_DESCRIPTION: Option<&'static str> = Some("Real-time voice noise reduction");
    const CLAP_MANUAL_URL: Option<&'static str> = None;
    const CLAP_SUPPORT_URL: Option<&'static str> = None;
    const CLAP_FEATURES: &'static [ClapFeature] = &[
        ClapFeature::AudioEffect,
        ClapFeature::Restoration,
        ClapFeature::Mono,
        ClapFeature::Stereo,
    ];
}

impl Vst3Plugin for QuietvoxPlugin {
    const VST3_CLASS_ID: [u8; 16] = *b"QuietvoxDenoise1";
    const VST3_SUBCATEGORIES: &'static [Vst3SubCategory] = &[
        Vst3SubCategory::Fx,
        Vst3SubCategory::Restoration,
    ];
}

nih_export_clap!(QuietvoxPlugin);
nih_export_vst3!(QuietvoxPlugin);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_background_drain_empties_event_queue() {
        let mut plugin = QuietvoxPlugin::default();
        let handle = plugin.handle.clone().unwrap();
        handle.set_enabled(false);
        handle.set_enabled(true);
        assert!(!handle.events().is_empty());

        let executor = plugin.task_executor();
        executor(QuietvoxTask::DrainEvents);
        assert!(handle.events().is_empty());
    }

    #[test]
    fn test_default_plugin_has_idle_pipeline() {
        let plugin = QuietvoxPlugin::default();
        let pipeline = plugin.pipeline.as_ref().unwrap();
        assert!(!pipeline.state().is_ready());
        assert_eq!(pipeline.latency_samples(), 0);
        assert_eq!(pipeline.handle().config(), plugin.params.snapshot());
    }
}
