//! Performance and quality statistics.
//!
//! The real-time side owns a `StatsAggregator` and publishes a snapshot into
//! `SharedStats` once per frame period. Any thread can read the latest
//! snapshot through the `PipelineHandle`.
//!
//! ## Audio Thread Safety
//! - Fields are stored as atomics (f32 as bits, like the plugin meters)
//! - A sequence counter brackets each publish. Readers retry until an even,
//!   unchanged sequence brackets their copy, so a snapshot is never assembled
//!   from two different frames. The writer is a handful of stores, so the
//!   retry loop is short
//! - Resets requested by other threads are only flagged here; the aggregator
//!   applies them at its next frame so the accumulators keep a single writer

use std::sync::atomic::{fence, AtomicBool, AtomicU32, AtomicU64, Ordering};

use crate::dsp::utils::{ema, reduction_db, EMA_ALPHA};

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct NoiseReductionStats {
    /// Exponentially smoothed reduction (dB)
    pub reduction_level_db: f32,
    /// True running mean of the per-frame reduction (dB)
    pub average_reduction_db: f32,
    /// Most recent voice probability
    pub voice_probability: f32,
    /// Hysteresis-smoothed voice activity
    pub voice_detected: bool,
    pub frames_processed: u64,
    pub frames_failed: u64,
    pub total_processing_time_micros: u64,
    /// Smoothed processing time per frame period
    pub average_processing_time_micros: f32,
    /// Processing time as a share of the frame duration, capped at 100
    pub cpu_load_percent: f32,
    /// Mean processing time per frame in milliseconds
    /// (`total_processing_time_micros / frames_processed / 1000`)
    pub latency_ms: f32,
}

// =============================================================================
// Shared (cross-thread) view
// =============================================================================

#[derive(Default)]
pub struct SharedStats {
    sequence: AtomicU64,
    reduction_level_db: AtomicU32,
    average_reduction_db: AtomicU32,
    voice_probability: AtomicU32,
    voice_detected: AtomicBool,
    frames_processed: AtomicU64,
    frames_failed: AtomicU64,
    total_processing_time_micros: AtomicU64,
    average_processing_time_micros: AtomicU32,
    cpu_load_percent: AtomicU32,
    latency_ms: AtomicU32,
    reset_requested: AtomicBool,
}

impl SharedStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a snapshot. Must only be called from one thread at a time.
    pub fn publish(&self, stats: &NoiseReductionStats) {
        let seq = self.sequence.load(Ordering::Relaxed);
        self.sequence.store(seq.wrapping_add(1), Ordering::Relaxed);
        fence(Ordering::Release);

        self.reduction_level_db
            .store(stats.reduction_level_db.to_bits(), Ordering::Relaxed);
        self.average_reduction_db
            .store(stats.average_reduction_db.to_bits(), Ordering::Relaxed);
        self.voice_probability
            .store(stats.voice_probability.to_bits(), Ordering::Relaxed);
        self.voice_detected
            .store(stats.voice_detected, Ordering::Relaxed);
        self.frames_processed
            .store(stats.frames_processed, Ordering::Relaxed);
        self.frames_failed
            .store(stats.frames_failed, Ordering::Relaxed);
        self.total_processing_time_micros
            .store(stats.total_processing_time_micros, Ordering::Relaxed);
        self.average_processing_time_micros
            .store(stats.average_processing_time_micros.to_bits(), Ordering::Relaxed);
        self.cpu_load_percent
            .store(stats.cpu_load_percent.to_bits(), Ordering::Relaxed);
        self.latency_ms
            .store(stats.latency_ms.to_bits(), Ordering::Relaxed);

        self.sequence.store(seq.wrapping_add(2), Ordering::Release);
    }

    fn read_fields(&self) -> NoiseReductionStats {
        NoiseReductionStats {
            reduction_level_db: f32::from_bits(self.reduction_level_db.load(Ordering::Relaxed)),
            average_reduction_db: f32::from_bits(self.average_reduction_db.load(Ordering::Relaxed)),
            voice_probability: f32::from_bits(self.voice_probability.load(Ordering::Relaxed)),
            voice_detected: self.voice_detected.load(Ordering::Relaxed),
            frames_processed: self.frames_processed.load(Ordering::Relaxed),
            frames_failed: self.frames_failed.load(Ordering::Relaxed),
            total_processing_time_micros: self.total_processing_time_micros.load(Ordering::Relaxed),
            average_processing_time_micros: f32::from_bits(
                self.average_processing_time_micros.load(Ordering::Relaxed),
            ),
            cpu_load_percent: f32::from_bits(self.cpu_load_percent.load(Ordering::Relaxed)),
            latency_ms: f32::from_bits(self.latency_ms.load(Ordering::Relaxed)),
        }
    }

    /// Latest published snapshot. Zeroed while a reset is pending.
    pub fn snapshot(&self) -> NoiseReductionStats {
        if self.reset_requested.load(Ordering::Acquire) {
            return NoiseReductionStats::default();
        }

        loop {
            let before = self.sequence.load(Ordering::Acquire);
            if before % 2 == 1 {
                std::hint::spin_loop();
                continue;
            }
            let stats = self.read_fields();
            fence(Ordering::Acquire);
            if self.sequence.load(Ordering::Relaxed) == before {
                return stats;
            }
            std::hint::spin_loop();
        }
    }

    /// Zero while a reset is pending, like `snapshot`.
    pub fn cpu_load_percent(&self) -> f32 {
        self.snapshot().cpu_load_percent
    }

    /// Zero while a reset is pending, like `snapshot`.
    pub fn latency_ms(&self) -> f32 {
        self.snapshot().latency_ms
    }

    /// Ask the real-time side to clear its accumulators.
    pub fn request_reset(&self) {
        self.reset_requested.store(true, Ordering::Release);
    }

    /// Consume a pending reset request.
    pub fn take_reset_request(&self) -> bool {
        self.reset_requested.swap(false, Ordering::AcqRel)
    }
}

// =============================================================================
// Real-time accumulator
// =============================================================================

pub struct StatsAggregator {
    stats: NoiseReductionStats,
    reduction_sum: f64,
    frame_duration_micros: f64,
}

impl StatsAggregator {
    /// `frame_duration_micros` is the wall-clock length of one frame of audio.
    pub fn new(frame_duration_micros: f64) -> Self {
        Self {
            stats: NoiseReductionStats::default(),
            reduction_sum: 0.0,
            frame_duration_micros,
        }
    }

    pub fn set_frame_duration(&mut self, frame_duration_micros: f64) {
        self.frame_duration_micros = frame_duration_micros;
    }

    /// Account one frame period in which at least one stream succeeded.
    pub fn record_frame(
        &mut self,
        pre_rms: f32,
        post_rms: f32,
        voice_probability: f32,
        voice_detected: bool,
        elapsed_micros: u64,
    ) {
        let s = &mut self.stats;
        s.frames_processed += 1;
        s.total_processing_time_micros = s.total_processing_time_micros.saturating_add(elapsed_micros);
        s.voice_probability = voice_probability;
        s.voice_detected = voice_detected;

        let reduction = reduction_db(pre_rms, post_rms);
        s.reduction_level_db = ema(s.reduction_level_db, reduction, EMA_ALPHA);
        self.reduction_sum += reduction as f64;
        s.average_reduction_db = (self.reduction_sum / s.frames_processed as f64) as f32;

        let elapsed = elapsed_micros as f32;
        s.average_processing_time_micros = if s.frames_processed == 1 {
            elapsed
        } else {
            ema(s.average_processing_time_micros, elapsed, EMA_ALPHA)
        };

        s.cpu_load_percent = if self.frame_duration_micros > 0.0 {
            ((s.average_processing_time_micros as f64 / self.frame_duration_micros) * 100.0)
                .min(100.0) as f32
        } else {
            0.0
        };
        s.latency_ms = (s.total_processing_time_micros as f64
            / s.frames_processed as f64
            / 1000.0) as f32;
    }

    /// Account one stream frame whose engine call failed.
    pub fn record_failure(&mut self) {
        self.stats.frames_failed += 1;
    }

    pub fn stats(&self) -> &NoiseReductionStats {
        &self.stats
    }

    pub fn reset(&mut self) {
        self.stats = NoiseReductionStats::default();
        self.reduction_sum = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 10 ms at 48 kHz
    const FRAME_MICROS: f64 = 10_000.0;

    #[test]
    fn test_ema_and_running_mean_differ() {
        let mut agg = StatsAggregator::new(FRAME_MICROS);

        // 20 dB then 0 dB
        agg.record_frame(1.0, 0.1, 0.2, false, 100);
        assert!((agg.stats().reduction_level_db - 2.0).abs() < 1e-4);
        assert!((agg.stats().average_reduction_db - 20.0).abs() < 1e-4);

        agg.record_frame(1.0, 1.0, 0.2, false, 100);
        assert!((agg.stats().reduction_level_db - 1.8).abs() < 1e-4);
        assert!((agg.stats().average_reduction_db - 10.0).abs() < 1e-4);
    }

    #[test]
    fn test_processing_time_metrics() {
        let mut agg = StatsAggregator::new(FRAME_MICROS);
        agg.record_frame(0.1, 0.1, 0.0, false, 1_000);
        let s = agg.stats();
        assert_eq!(s.frames_processed, 1);
        assert_eq!(s.total_processing_time_micros, 1_000);
        assert!((s.cpu_load_percent - 10.0).abs() < 1e-4);
        assert!((s.latency_ms - 1.0).abs() < 1e-6);

        agg.record_frame(0.1, 0.1, 0.0, false, 2_000);
        // Smoothed for cpu load, true mean for latency
        assert!((agg.stats().average_processing_time_micros - 1_100.0).abs() < 1e-3);
        assert!((agg.stats().latency_ms - 1.5).abs() < 1e-6);
    }

    #[test]
    fn test_cpu_load_is_capped() {
        let mut agg = StatsAggregator::new(FRAME_MICROS);
        agg.record_frame(0.1, 0.1, 0.0, false, 50_000);
        assert_eq!(agg.stats().cpu_load_percent, 100.0);
    }

    #[test]
    fn test_silence_keeps_figures_finite() {
        let mut agg = StatsAggregator::new(FRAME_MICROS);
        for _ in 0..100 {
            agg.record_frame(0.0, 0.0, 0.0, false, 10);
        }
        let s = agg.stats();
        assert!(s.reduction_level_db.is_finite());
        assert!(s.average_reduction_db.is_finite());
        assert_eq!(s.frames_processed, 100);
    }

    #[test]
    fn test_reset_clears_accumulators() {
        let mut agg = StatsAggregator::new(FRAME_MICROS);
        agg.record_frame(1.0, 0.1, 0.9, true, 100);
        agg.record_failure();
        agg.reset();
        assert_eq!(*agg.stats(), NoiseReductionStats::default());

        agg.record_frame(1.0, 1.0, 0.0, false, 100);
        assert!(agg.stats().average_reduction_db.abs() < 1e-6);
    }

    #[test]
    fn test_shared_publish_and_reset_handshake() {
        let shared = SharedStats::new();
        let mut agg = StatsAggregator::new(FRAME_MICROS);
        agg.record_frame(1.0, 0.5, 0.7, true, 500);
        agg.record_failure();
        shared.publish(agg.stats());

        let snap = shared.snapshot();
        assert_eq!(snap, *agg.stats());
        assert_eq!(snap.frames_failed, 1);
        assert!((shared.cpu_load_percent() - 5.0).abs() < 1e-4);

        shared.request_reset();
        assert_eq!(shared.snapshot(), NoiseReductionStats::default());
        assert_eq!(shared.cpu_load_percent(), 0.0);
        assert_eq!(shared.latency_ms(), 0.0);
        assert!(shared.take_reset_request());
        assert!(!shared.take_reset_request());
        assert!((shared.cpu_load_percent() - 5.0).abs() < 1e-4);
    }

    #[test]
    fn test_concurrent_snapshots_are_consistent() {
        const PUBLISHES: u64 = 200_000;
        let shared = SharedStats::new();
        let done = AtomicBool::new(false);

        std::thread::scope(|scope| {
            scope.spawn(|| {
                let mut stats = NoiseReductionStats::default();
                for k in 1..=PUBLISHES {
                    stats.frames_processed = k;
                    stats.frames_failed = k;
                    stats.total_processing_time_micros = k;
                    stats.cpu_load_percent = k as f32;
                    shared.publish(&stats);
                }
                done.store(true, Ordering::Release);
            });

            let mut last = 0;
            while !done.load(Ordering::Acquire) {
                let snap = shared.snapshot();
                assert_eq!(snap.frames_processed, snap.frames_failed);
                assert_eq!(snap.frames_processed, snap.total_processing_time_micros);
                assert_eq!(snap.cpu_load_percent, snap.frames_processed as f32);
                assert!(snap.frames_processed >= last);
                last = snap.frames_processed;
            }
        });

        assert_eq!(shared.snapshot().frames_processed, PUBLISHES);
    }
}
