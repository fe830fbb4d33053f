//! The real-time noise reduction pipeline and its control-plane handle.
//!
//! # Purpose
//! `NoiseReductionPipeline` owns everything the audio thread touches: the frame
//! adapter, one engine stream per channel (or a single mixed stream), the
//! resamplers and the statistics accumulator. `PipelineHandle` is the cloneable
//! view other threads use to change the configuration, read statistics and
//! receive events.
//!
//! # Design Notes
//! - Per host buffer: push into the adapter, drain complete frames through
//!   resample -> engine -> gain shaper -> resample, then pull the same number of
//!   samples back out
//! - Host buffers longer than `max_block_size` are processed in chunks of that
//!   size, which keeps the pre-allocated queues from ever filling
//! - When processing starts the output queues are primed with `F_host - 1`
//!   zeros, so the pipeline delay is exactly `latency_samples()` for the whole
//!   session
//! - Failures inside `process` never escape: a failed engine frame passes the
//!   dry frame through; a layout mismatch or missing engine leaves the buffer
//!   untouched. Both are reported as events
//!
//! ## Audio Thread Safety
//! - `process` / `process_block` do not allocate, lock or log
//! - `initialize`, `reconfigure`, `reset` and `shutdown` allocate or free and
//!   belong on the control path

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crossbeam_channel::Receiver;
use log::{error, info, warn};

use crate::config::{
    validate_stream, validate_threshold, AtomicConfig, ChannelMode, NoiseReductionConfig,
    PipelineSettings, ReductionLevel,
};
use crate::dsp::denoise_engine::{EngineFactory, RnnoiseFactory};
use crate::dsp::denoise_invoker::DenoiseInvoker;
use crate::dsp::frame_adapter::FrameAdapter;
use crate::dsp::gain_shaper::AdaptiveGainShaper;
use crate::dsp::resampler::{host_frame_size, LinearResampler};
use crate::dsp::sample_buffer::{mix_to_mono, AudioBlock, AudioBlockMut, SampleBuffer};
use crate::dsp::utils::sum_squares;
use crate::error::{ConfigurationError, EngineError, PipelineError};
use crate::events::{event_channel, EventSender, PipelineEvent};
use crate::stats::{NoiseReductionStats, SharedStats, StatsAggregator};

// =============================================================================
// State
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PipelineState {
    Uninitialized = 0,
    Initialized = 1,
    Processing = 2,
    Bypassed = 3,
    ShutDown = 4,
}

impl PipelineState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => PipelineState::Initialized,
            2 => PipelineState::Processing,
            3 => PipelineState::Bypassed,
            4 => PipelineState::ShutDown,
            _ => PipelineState::Uninitialized,
        }
    }

    /// True while engines and queues exist.
    pub fn is_ready(&self) -> bool {
        matches!(
            self,
            PipelineState::Initialized | PipelineState::Processing | PipelineState::Bypassed
        )
    }
}

/// What `process` did with the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Audio went through the engines.
    Processed,
    /// Noise reduction is disabled; the buffer is bit-identical to the input.
    Bypassed,
    /// Nothing to process with (not initialized, shut down, or wrong channel
    /// layout); the buffer is untouched.
    Unavailable,
}

struct Shared {
    config: AtomicConfig,
    stats: SharedStats,
    state: AtomicU8,
}

// =============================================================================
// Control-plane handle
// =============================================================================

/// Thread-safe control surface of a pipeline.
#[derive(Clone)]
pub struct PipelineHandle {
    shared: Arc<Shared>,
    events: EventSender,
    receiver: Receiver<PipelineEvent>,
}

impl PipelineHandle {
    pub fn config(&self) -> NoiseReductionConfig {
        self.shared.config.load()
    }

    /// Replace the whole configuration. Rejected configurations leave the
    /// current one in place.
    pub fn set_config(&self, config: NoiseReductionConfig) -> Result<(), ConfigurationError> {
        config.validate()?;
        let previous = self.shared.config.update(|c| *c = config);
        if previous.enabled != config.enabled {
            self.events.emit(PipelineEvent::EnabledChanged(config.enabled));
        }
        if previous.level != config.level {
            self.events.emit(PipelineEvent::LevelChanged(config.level));
        }
        Ok(())
    }

    /// Enable or bypass noise reduction. Takes effect on the next `process`.
    pub fn set_enabled(&self, enabled: bool) {
        let previous = self.shared.config.update(|c| c.enabled = enabled);
        if previous.enabled != enabled {
            self.events.emit(PipelineEvent::EnabledChanged(enabled));
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.shared.config.load().enabled
    }

    pub fn set_level(&self, level: ReductionLevel) {
        let previous = self.shared.config.update(|c| c.level = level);
        if previous.level != level {
            self.events.emit(PipelineEvent::LevelChanged(level));
        }
    }

    pub fn level(&self) -> ReductionLevel {
        self.shared.config.load().level
    }

    pub fn set_voice_threshold(&self, threshold: f32) -> Result<(), ConfigurationError> {
        validate_threshold(threshold)?;
        self.shared.config.update(|c| c.voice_threshold = threshold);
        Ok(())
    }

    pub fn set_adaptive_mode(&self, adaptive: bool) {
        self.shared.config.update(|c| c.adaptive_mode = adaptive);
    }

    pub fn state(&self) -> PipelineState {
        PipelineState::from_u8(self.shared.state.load(Ordering::Acquire))
    }

    pub fn stats(&self) -> NoiseReductionStats {
        self.shared.stats.snapshot()
    }

    /// Clear statistics. Applied by the audio side at its next frame; reads
    /// return zeroed statistics until then.
    pub fn reset_stats(&self) {
        self.shared.stats.request_reset();
    }

    pub fn cpu_usage(&self) -> f32 {
        self.shared.stats.cpu_load_percent()
    }

    /// Average processing time per frame in milliseconds.
    pub fn latency_ms(&self) -> f32 {
        self.shared.stats.latency_ms()
    }

    /// Receiving end of the event channel.
    pub fn events(&self) -> Receiver<PipelineEvent> {
        self.receiver.clone()
    }

    /// Events dropped because nobody drained the channel in time.
    pub fn dropped_events(&self) -> u64 {
        self.events.dropped()
    }

    /// Forward every pending event to the `log` facade. Returns how many were
    /// forwarded.
    pub fn drain_events_to_log(&self) -> usize {
        let mut count = 0;
        for event in self.receiver.try_iter() {
            log::log!(event.level(), "{}", event);
            count += 1;
        }
        count
    }
}

// =============================================================================
// Runtime (everything built by initialize)
// =============================================================================

/// One engine with its scratch frames and gain shaper.
struct EngineStream {
    invoker: DenoiseInvoker,
    shaper: AdaptiveGainShaper,
    engine_in: Vec<f32>,
    engine_out: Vec<f32>,
}

impl EngineStream {
    /// Denoise one host-rate frame in place. On error `frame` is left dry.
    fn process(
        &mut self,
        frame: &mut [f32],
        config: &NoiseReductionConfig,
        upsampler: &LinearResampler,
        downsampler: &LinearResampler,
    ) -> Result<f32, EngineError> {
        let input: &[f32] = if upsampler.is_passthrough() {
            &*frame
        } else {
            upsampler.resample_into(&*frame, &mut self.engine_in);
            &self.engine_in
        };

        let probability = self.invoker.process(input, &mut self.engine_out)?;
        self.shaper.process(config, probability, &mut self.engine_out);

        if downsampler.is_passthrough() {
            frame.copy_from_slice(&self.engine_out);
        } else {
            downsampler.resample_into(&self.engine_out, frame);
        }
        Ok(probability)
    }
}

struct Runtime {
    sample_rate: u32,
    channels: usize,
    max_block: usize,
    channel_mode: ChannelMode,
    engine_frame: usize,
    engine_rate: u32,
    adapter: FrameAdapter,
    streams: Vec<EngineStream>,
    frames: Vec<Vec<f32>>,
    upsampler: LinearResampler,
    downsampler: LinearResampler,
    mix: Vec<f32>,
}

impl Runtime {
    fn build(
        factory: &dyn EngineFactory,
        channel_mode: ChannelMode,
        sample_rate: u32,
        channels: usize,
        max_block: usize,
    ) -> Result<Self, PipelineError> {
        let stream_count = match channel_mode {
            ChannelMode::Independent => channels,
            ChannelMode::MixToMono => 1,
        };

        let mut invokers = Vec::with_capacity(stream_count);
        for _ in 0..stream_count {
            invokers.push(DenoiseInvoker::new(factory.create()?));
        }

        let engine_frame = invokers.first().map_or(0, DenoiseInvoker::frame_size);
        let engine_rate = invokers.first().map_or(0, DenoiseInvoker::sample_rate);
        if engine_frame == 0 {
            return Err(ConfigurationError::InvalidFrameSize(engine_frame).into());
        }
        if engine_rate == 0 {
            return Err(ConfigurationError::InvalidSampleRate(engine_rate).into());
        }
        if let Some(odd) = invokers
            .iter()
            .find(|i| i.frame_size() != engine_frame || i.sample_rate() != engine_rate)
        {
            return Err(ConfigurationError::EngineFormatMismatch {
                expected_rate: engine_rate,
                expected_frame: engine_frame,
                actual_rate: odd.sample_rate(),
                actual_frame: odd.frame_size(),
            }
            .into());
        }

        let host_frame = host_frame_size(engine_frame, sample_rate, engine_rate);
        if host_frame == 0 {
            return Err(ConfigurationError::InvalidFrameSize(host_frame).into());
        }

        let adapter = FrameAdapter::new(stream_count, host_frame, max_block)?;
        let streams = invokers
            .into_iter()
            .map(|invoker| EngineStream {
                invoker,
                shaper: AdaptiveGainShaper::new(),
                engine_in: vec![0.0; engine_frame],
                engine_out: vec![0.0; engine_frame],
            })
            .collect();

        let upsampler = LinearResampler::new(sample_rate, engine_rate);
        let mix = match channel_mode {
            ChannelMode::Independent => Vec::new(),
            ChannelMode::MixToMono => vec![0.0; max_block],
        };

        Ok(Self {
            sample_rate,
            channels,
            max_block,
            channel_mode,
            engine_frame,
            engine_rate,
            adapter,
            streams,
            frames: vec![vec![0.0; host_frame]; stream_count],
            upsampler,
            downsampler: upsampler.inverse(),
            mix,
        })
    }

    fn frame_duration_micros(&self) -> f64 {
        self.engine_frame as f64 * 1_000_000.0 / self.engine_rate as f64
    }

    /// Empty the queues and queue the priming zeros.
    fn start(&mut self) {
        self.adapter.clear();
        let delay = self.adapter.latency_samples();
        self.adapter.prime_output(delay);
        for stream in self.streams.iter_mut() {
            stream.shaper.reset();
        }
    }

    fn stop(&mut self) {
        self.adapter.clear();
    }

    fn push<B: AudioBlock + ?Sized>(&mut self, block: &B, start: usize, n: usize) {
        match self.channel_mode {
            ChannelMode::Independent => {
                self.adapter.push(block, start, n);
            }
            ChannelMode::MixToMono => {
                let mix = &mut self.mix[..n];
                mix_to_mono(block, start..start + n, mix);
                self.adapter.push_channel(0, mix);
            }
        }
    }

    fn pull<B: AudioBlockMut + ?Sized>(&mut self, block: &mut B, start: usize, n: usize) {
        match self.channel_mode {
            ChannelMode::Independent => {
                self.adapter.pull(block, start, n);
            }
            ChannelMode::MixToMono => {
                let mix = &mut self.mix[..n];
                self.adapter.pull_channel(0, mix);
                for ch in 0..self.channels {
                    if let Some(out) = block.channel_mut(ch).get_mut(start..start + n) {
                        out.copy_from_slice(mix);
                    }
                }
            }
        }
    }

    /// Run every complete frame through the engines.
    fn process_frames(
        &mut self,
        config: &NoiseReductionConfig,
        stats: &mut StatsAggregator,
        shared: &SharedStats,
        events: &EventSender,
    ) {
        while self.adapter.try_extract_frame(&mut self.frames) {
            let started = Instant::now();
            let mut pre = 0.0f64;
            let mut post = 0.0f64;
            let mut succeeded = 0usize;
            let mut probability_sum = 0.0f32;
            let mut voice_detected = false;

            for (channel, (stream, frame)) in self
                .streams
                .iter_mut()
                .zip(self.frames.iter_mut())
                .enumerate()
            {
                pre += sum_squares(frame.as_slice());
                match stream.process(frame.as_mut_slice(), config, &self.upsampler, &self.downsampler) {
                    Ok(probability) => {
                        succeeded += 1;
                        probability_sum += probability;
                        voice_detected |= stream.shaper.voice_detected();
                    }
                    Err(_) => {
                        stats.record_failure();
                        events.emit(PipelineEvent::FrameFailed { channel });
                    }
                }
                post += sum_squares(frame.as_slice());
            }

            self.adapter.commit_output(&self.frames);

            if succeeded > 0 {
                let n = (self.adapter.num_channels() * self.adapter.frame_size()) as f64;
                stats.record_frame(
                    (pre / n).sqrt() as f32,
                    (post / n).sqrt() as f32,
                    probability_sum / succeeded as f32,
                    voice_detected,
                    started.elapsed().as_micros() as u64,
                );
            }
            shared.publish(stats.stats());
        }
    }

    fn reset(&mut self) {
        for stream in self.streams.iter_mut() {
            stream.invoker.reset();
            stream.shaper.reset();
        }
    }
}

// =============================================================================
// Pipeline
// =============================================================================

pub struct NoiseReductionPipeline {
    factory: Box<dyn EngineFactory>,
    settings: PipelineSettings,
    handle: PipelineHandle,
    runtime: Option<Runtime>,
    stats: StatsAggregator,
    state: PipelineState,
    mismatch_reported: bool,
    unavailable_reported: bool,
}

impl NoiseReductionPipeline {
    pub fn new(
        factory: Box<dyn EngineFactory>,
        settings: PipelineSettings,
    ) -> Result<Self, PipelineError> {
        settings.validate()?;

        let (events, receiver) = event_channel(settings.event_capacity);
        let shared = Arc::new(Shared {
            config: AtomicConfig::new(settings.initial_config),
            stats: SharedStats::new(),
            state: AtomicU8::new(PipelineState::Uninitialized as u8),
        });

        Ok(Self {
            factory,
            settings,
            handle: PipelineHandle {
                shared,
                events,
                receiver,
            },
            runtime: None,
            stats: StatsAggregator::new(0.0),
            state: PipelineState::Uninitialized,
            mismatch_reported: false,
            unavailable_reported: false,
        })
    }

    /// Pipeline backed by RNNoise engines.
    pub fn with_rnnoise(settings: PipelineSettings) -> Result<Self, PipelineError> {
        Self::new(Box::new(RnnoiseFactory), settings)
    }

    pub fn handle(&self) -> PipelineHandle {
        self.handle.clone()
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    fn set_state(&mut self, state: PipelineState) {
        self.state = state;
        self.handle.shared.state.store(state as u8, Ordering::Release);
    }

    /// Build engines and queues for the given stream format, using the
    /// configured maximum block size. On an initialized pipeline this is a
    /// `reconfigure` that keeps the current maximum block size.
    pub fn initialize(&mut self, sample_rate: u32, channels: usize) -> Result<(), PipelineError> {
        let max_block = self
            .runtime
            .as_ref()
            .map_or(self.settings.max_block_size, |rt| rt.max_block);
        self.reconfigure(sample_rate, channels, max_block)
    }

    /// Rebuild for a new stream format. On error the previous state, engines
    /// and queues are kept.
    pub fn reconfigure(
        &mut self,
        sample_rate: u32,
        channels: usize,
        max_block: usize,
    ) -> Result<(), PipelineError> {
        if let Err(e) = validate_stream(sample_rate, channels, max_block) {
            warn!("Rejected stream format: {}", e);
            return Err(e.into());
        }

        let runtime = match Runtime::build(
            self.factory.as_ref(),
            self.settings.channel_mode,
            sample_rate,
            channels,
            max_block,
        ) {
            Ok(rt) => rt,
            Err(e) => {
                error!("Failed to build noise reduction pipeline: {}", e);
                return Err(e);
            }
        };

        info!(
            "Noise reduction pipeline ready: {} Hz, {} channel(s), {:?}, frame {} @ {} Hz ({} host samples), max block {}",
            runtime.sample_rate,
            runtime.channels,
            runtime.channel_mode,
            runtime.engine_frame,
            runtime.engine_rate,
            runtime.adapter.frame_size(),
            runtime.max_block,
        );

        self.stats.set_frame_duration(runtime.frame_duration_micros());
        self.handle.events.emit(PipelineEvent::Initialized {
            sample_rate,
            channels,
            frame_size: runtime.adapter.frame_size(),
        });
        self.runtime = Some(runtime);
        self.mismatch_reported = false;
        self.unavailable_reported = false;
        self.set_state(PipelineState::Initialized);
        Ok(())
    }

    /// Release engines and queues. A fresh `initialize` is required afterwards.
    pub fn shutdown(&mut self) {
        if self.runtime.take().is_some() {
            info!("Noise reduction pipeline shut down");
        }
        self.handle.events.emit(PipelineEvent::ShutDown);
        self.set_state(PipelineState::ShutDown);
    }

    /// Clear queued audio, engine history and voice-activity history.
    /// Configuration and statistics are kept.
    pub fn reset(&mut self) {
        let processing = self.state == PipelineState::Processing;
        if let Some(rt) = self.runtime.as_mut() {
            rt.reset();
            if processing {
                rt.start();
            } else {
                rt.stop();
            }
        }
    }

    /// Pipeline delay in host samples while processing.
    pub fn latency_samples(&self) -> usize {
        self.runtime
            .as_ref()
            .map_or(0, |rt| rt.adapter.latency_samples())
    }

    /// Host-rate length of one engine frame.
    pub fn host_frame_size(&self) -> Option<usize> {
        self.runtime.as_ref().map(|rt| rt.adapter.frame_size())
    }

    pub fn process(&mut self, buffer: &mut SampleBuffer) -> ProcessOutcome {
        self.process_block(buffer)
    }

    /// Process a host block in place.
    pub fn process_block<B: AudioBlockMut + ?Sized>(&mut self, block: &mut B) -> ProcessOutcome {
        let shared = &self.handle.shared;
        let events = &self.handle.events;

        if shared.stats.take_reset_request() {
            self.stats.reset();
            shared.stats.publish(self.stats.stats());
        }

        let Some(rt) = self.runtime.as_mut() else {
            if !self.unavailable_reported {
                events.emit(PipelineEvent::EngineUnavailable);
                self.unavailable_reported = true;
            }
            return ProcessOutcome::Unavailable;
        };

        let channels = block.num_channels();
        if channels != rt.channels {
            if !self.mismatch_reported {
                events.emit(PipelineEvent::ChannelMismatch {
                    expected: rt.channels,
                    actual: channels,
                });
                self.mismatch_reported = true;
            }
            return ProcessOutcome::Unavailable;
        }
        self.mismatch_reported = false;

        let config = shared.config.load();
        let next_state = match (config.enabled, self.state) {
            (true, PipelineState::Initialized | PipelineState::Bypassed) => {
                rt.start();
                events.emit(PipelineEvent::ProcessingStarted);
                PipelineState::Processing
            }
            (false, PipelineState::Initialized | PipelineState::Processing) => {
                rt.stop();
                events.emit(PipelineEvent::ProcessingStopped);
                PipelineState::Bypassed
            }
            (_, state) => state,
        };
        if next_state != self.state {
            self.state = next_state;
            shared.state.store(next_state as u8, Ordering::Release);
        }

        if self.state == PipelineState::Bypassed {
            return ProcessOutcome::Bypassed;
        }

        let total = block.num_samples();
        let mut start = 0;
        while start < total {
            let n = (total - start).min(rt.max_block);
            rt.push(&*block, start, n);
            rt.process_frames(&config, &mut self.stats, &shared.stats, events);
            rt.pull(&mut *block, start, n);
            start += n;
        }

        ProcessOutcome::Processed
    }
}
