//! Notifications from the pipeline to the control plane.
//!
//! The audio thread must never block or log, so anything worth reporting goes
//! through a bounded channel with `try_send`. When the control plane falls
//! behind, new events are dropped and counted.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};

use crate::config::ReductionLevel;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PipelineEvent {
    Initialized {
        sample_rate: u32,
        channels: usize,
        frame_size: usize,
    },
    /// Denoising became active (enabled, or re-enabled after bypass)
    ProcessingStarted,
    /// Denoising bypassed; audio passes through untouched
    ProcessingStopped,
    EnabledChanged(bool),
    LevelChanged(ReductionLevel),
    /// One channel's engine call failed; the dry frame was passed through
    FrameFailed { channel: usize },
    /// No engine is available; `process` leaves buffers untouched
    EngineUnavailable,
    /// The host buffer's channel count differs from the configured layout
    ChannelMismatch { expected: usize, actual: usize },
    ShutDown,
}

impl PipelineEvent {
    /// Log level the event deserves when forwarded to `log`.
    pub fn level(&self) -> log::Level {
        match self {
            PipelineEvent::FrameFailed { .. }
            | PipelineEvent::EngineUnavailable
            | PipelineEvent::ChannelMismatch { .. } => log::Level::Warn,
            _ => log::Level::Info,
        }
    }
}

impl fmt::Display for PipelineEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineEvent::Initialized {
                sample_rate,
                channels,
                frame_size,
            } => write!(
                f,
                "pipeline initialized: {} Hz, {} channel(s), {}-sample frames",
                sample_rate, channels, frame_size
            ),
            PipelineEvent::ProcessingStarted => write!(f, "noise reduction active"),
            PipelineEvent::ProcessingStopped => write!(f, "noise reduction bypassed"),
            PipelineEvent::EnabledChanged(enabled) => {
                write!(f, "noise reduction {}", if *enabled { "enabled" } else { "disabled" })
            }
            PipelineEvent::LevelChanged(level) => write!(f, "reduction level set to {}", level.name()),
            PipelineEvent::FrameFailed { channel } => {
                write!(f, "engine failed on channel {}; dry frame passed through", channel)
            }
            PipelineEvent::EngineUnavailable => write!(f, "denoising engine unavailable; passing audio through"),
            PipelineEvent::ChannelMismatch { expected, actual } => write!(
                f,
                "host buffer has {} channel(s), pipeline expects {}; passing audio through",
                actual, expected
            ),
            PipelineEvent::ShutDown => write!(f, "pipeline shut down"),
        }
    }
}

/// Non-blocking sending side. Cheap to clone.
#[derive(Clone)]
pub struct EventSender {
    tx: Sender<PipelineEvent>,
    dropped: Arc<AtomicU64>,
}

impl EventSender {
    /// Queue an event without blocking. Drops it if the channel is full.
    pub fn emit(&self, event: PipelineEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            // Nobody listening
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Create a bounded event channel. Capacity is at least one.
pub fn event_channel(capacity: usize) -> (EventSender, Receiver<PipelineEvent>) {
    let (tx, rx) = bounded(capacity.max(1));
    (
        EventSender {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        },
        rx,
    )
}

/// Counts processed samples and fires once per `period_ms` of audio.
///
/// Used on the audio thread to schedule event draining on a background
/// thread without touching the clock.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EventDrainTimer {
    interval_samples: u64,
    elapsed: u64,
}

impl EventDrainTimer {
    pub fn new(sample_rate: u32, period_ms: u32) -> Self {
        let interval_samples = (u64::from(sample_rate) * u64::from(period_ms) / 1000).max(1);
        Self {
            interval_samples,
            elapsed: 0,
        }
    }

    /// Advance by `samples`. Returns true when a period has elapsed.
    pub fn tick(&mut self, samples: usize) -> bool {
        self.elapsed += samples as u64;
        if self.elapsed >= self.interval_samples {
            self.elapsed %= self.interval_samples;
            true
        } else {
            false
        }
    }
}
