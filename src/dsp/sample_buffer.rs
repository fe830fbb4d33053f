//! Multi-channel sample storage and the block traits the pipeline runs on.
//!
//! # Design Notes
//! - Channel-major contiguous storage: channel `c` lives at `c * S .. (c + 1) * S`
//! - Accessors are bounds-checked and fall back to neutral values (0.0 / empty
//!   slice / ignored write) instead of panicking; this code runs on the audio thread
//! - `resize` keeps the allocation when the new layout fits, so a buffer that has
//!   been warmed up at the host's maximum block size never reallocates
//!
//! `AudioBlock` / `AudioBlockMut` let the pipeline process either a
//! `SampleBuffer` or the host's `&mut [&mut [f32]]` channel slices in place.

use std::ops::Range;

use super::utils::{frame_peak, frame_rms};

// =============================================================================
// Block traits
// =============================================================================

/// Read access to a block of equally sized channels.
pub trait AudioBlock {
    fn num_channels(&self) -> usize;
    fn num_samples(&self) -> usize;
    /// Channel samples, or an empty slice when `ch` is out of range.
    fn channel(&self, ch: usize) -> &[f32];
}

/// Write access to a block of equally sized channels.
pub trait AudioBlockMut: AudioBlock {
    /// Channel samples, or an empty slice when `ch` is out of range.
    fn channel_mut(&mut self, ch: usize) -> &mut [f32];
}

impl AudioBlock for [&mut [f32]] {
    fn num_channels(&self) -> usize {
        self.len()
    }

    fn num_samples(&self) -> usize {
        self.iter().map(|c| c.len()).min().unwrap_or(0)
    }

    fn channel(&self, ch: usize) -> &[f32] {
        match self.get(ch) {
            Some(c) => &**c,
            None => &[],
        }
    }
}

impl AudioBlockMut for [&mut [f32]] {
    fn channel_mut(&mut self, ch: usize) -> &mut [f32] {
        match self.get_mut(ch) {
            Some(c) => &mut **c,
            None => &mut [],
        }
    }
}

impl AudioBlock for [&[f32]] {
    fn num_channels(&self) -> usize {
        self.len()
    }

    fn num_samples(&self) -> usize {
        self.iter().map(|c| c.len()).min().unwrap_or(0)
    }

    fn channel(&self, ch: usize) -> &[f32] {
        self.get(ch).copied().unwrap_or(&[])
    }
}

/// Average `range` of every channel of `src` into `dst`.
///
/// `dst` must be at least `range.len()` long; extra samples are left untouched.
pub fn mix_to_mono<B: AudioBlock + ?Sized>(src: &B, range: Range<usize>, dst: &mut [f32]) {
    let n = range.len().min(dst.len());
    let dst = &mut dst[..n];
    dst.fill(0.0);

    let channels = src.num_channels();
    if channels == 0 {
        return;
    }

    for ch in 0..channels {
        let samples = src.channel(ch);
        let start = range.start.min(samples.len());
        let end = (range.start + n).min(samples.len());
        for (d, &s) in dst.iter_mut().zip(&samples[start..end]) {
            *d += s;
        }
    }

    let scale = 1.0 / channels as f32;
    for d in dst.iter_mut() {
        *d *= scale;
    }
}

// =============================================================================
// SampleBuffer
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct SampleBuffer {
    data: Vec<f32>,
    num_channels: usize,
    num_samples: usize,
    sample_rate: u32,
}

impl Default for SampleBuffer {
    fn default() -> Self {
        Self::new(0, 0, 48_000)
    }
}

impl SampleBuffer {
    /// Allocate a zeroed buffer.
    pub fn new(channels: usize, samples: usize, sample_rate: u32) -> Self {
        Self {
            data: vec![0.0; channels * samples],
            num_channels: channels,
            num_samples: samples,
            sample_rate,
        }
    }

    /// Build a buffer from per-channel slices. Channels are truncated to the
    /// shortest one.
    pub fn from_channels(channels: &[&[f32]], sample_rate: u32) -> Self {
        let samples = channels.iter().map(|c| c.len()).min().unwrap_or(0);
        let mut buffer = Self::new(channels.len(), samples, sample_rate);
        for (ch, src) in channels.iter().enumerate() {
            buffer.channel_mut(ch).copy_from_slice(&src[..samples]);
        }
        buffer
    }

    /// Change the layout, reusing storage when it fits.
    ///
    /// With `clear == false` the overlapping region of every surviving channel
    /// is preserved and any newly exposed samples are zero.
    pub fn resize(&mut self, channels: usize, samples: usize, clear: bool) {
        let old_samples = self.num_samples;
        let keep_channels = self.num_channels.min(channels);
        let keep_samples = old_samples.min(samples);
        let new_len = channels * samples;

        if new_len > self.data.len() {
            self.data.resize(new_len, 0.0);
        }

        if clear {
            self.data[..new_len].fill(0.0);
        } else {
            if samples > old_samples {
                // Channels move towards the end: relocate from the last one down
                for ch in (0..keep_channels).rev() {
                    let src = ch * old_samples;
                    self.data.copy_within(src..src + keep_samples, ch * samples);
                    self.data[ch * samples + keep_samples..(ch + 1) * samples].fill(0.0);
                }
            } else if samples < old_samples {
                for ch in 0..keep_channels {
                    let src = ch * old_samples;
                    self.data.copy_within(src..src + keep_samples, ch * samples);
                }
            }
            self.data[keep_channels * samples..new_len].fill(0.0);
        }

        self.data.truncate(new_len);
        self.num_channels = channels;
        self.num_samples = samples;
    }

    pub fn num_channels(&self) -> usize {
        self.num_channels
    }

    pub fn num_samples(&self) -> usize {
        self.num_samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn set_sample_rate(&mut self, sample_rate: u32) {
        self.sample_rate = sample_rate;
    }

    pub fn is_empty(&self) -> bool {
        self.num_channels == 0 || self.num_samples == 0
    }

    /// Number of samples the current allocation can hold without growing.
    pub fn capacity(&self) -> usize {
        self.data.capacity()
    }

    // -------------------------------------------------------------------------
    // Sample access
    // -------------------------------------------------------------------------

    #[inline]
    fn index(&self, ch: usize, i: usize) -> Option<usize> {
        (ch < self.num_channels && i < self.num_samples).then(|| ch * self.num_samples + i)
    }

    /// Data range for `n` samples of `ch` starting at `start`, clipped to the
    /// channel. `None` when nothing of the request lies inside the buffer.
    fn span(&self, ch: usize, start: usize, n: usize) -> Option<Range<usize>> {
        if ch >= self.num_channels || start >= self.num_samples || n == 0 {
            return None;
        }
        let end = start + n.min(self.num_samples - start);
        let base = ch * self.num_samples;
        Some(base + start..base + end)
    }

    pub fn sample(&self, ch: usize, i: usize) -> f32 {
        self.index(ch, i).map_or(0.0, |idx| self.data[idx])
    }

    pub fn set_sample(&mut self, ch: usize, i: usize, value: f32) {
        if let Some(idx) = self.index(ch, i) {
            self.data[idx] = value;
        }
    }

    pub fn add_sample(&mut self, ch: usize, i: usize, value: f32) {
        if let Some(idx) = self.index(ch, i) {
            self.data[idx] += value;
        }
    }

    pub fn channel(&self, ch: usize) -> &[f32] {
        match self.span(ch, 0, self.num_samples) {
            Some(r) => &self.data[r],
            None => &[],
        }
    }

    pub fn channel_mut(&mut self, ch: usize) -> &mut [f32] {
        match self.span(ch, 0, self.num_samples) {
            Some(r) => &mut self.data[r],
            None => &mut [],
        }
    }

    // -------------------------------------------------------------------------
    // Clear / copy / add
    // -------------------------------------------------------------------------

    pub fn clear(&mut self) {
        self.data.fill(0.0);
    }

    pub fn clear_channel(&mut self, ch: usize) {
        self.channel_mut(ch).fill(0.0);
    }

    pub fn clear_range(&mut self, ch: usize, start: usize, n: usize) {
        if let Some(r) = self.span(ch, start, n) {
            self.data[r].fill(0.0);
        }
    }

    /// Copy `n` samples from `src` channel `src_ch` into `dest_ch`. The count is
    /// clipped to whatever fits in both buffers.
    pub fn copy_from<B: AudioBlock + ?Sized>(
        &mut self,
        dest_ch: usize,
        dest_start: usize,
        src: &B,
        src_ch: usize,
        src_start: usize,
        n: usize,
    ) {
        let src_samples = src.channel(src_ch);
        if src_start >= src_samples.len() {
            return;
        }
        let n = n.min(src_samples.len() - src_start);
        if let Some(r) = self.span(dest_ch, dest_start, n) {
            let len = r.len();
            self.data[r].copy_from_slice(&src_samples[src_start..src_start + len]);
        }
    }

    /// Mix `n` samples of `src` into this buffer, scaled by `gain`.
    pub fn add_from<B: AudioBlock + ?Sized>(
        &mut self,
        dest_ch: usize,
        dest_start: usize,
        src: &B,
        src_ch: usize,
        src_start: usize,
        n: usize,
        gain: f32,
    ) {
        let src_samples = src.channel(src_ch);
        if src_start >= src_samples.len() {
            return;
        }
        let n = n.min(src_samples.len() - src_start);
        if let Some(r) = self.span(dest_ch, dest_start, n) {
            let len = r.len();
            for (d, &s) in self.data[r]
                .iter_mut()
                .zip(&src_samples[src_start..src_start + len])
            {
                *d += s * gain;
            }
        }
    }

    // -------------------------------------------------------------------------
    // Gain
    // -------------------------------------------------------------------------

    pub fn apply_gain(&mut self, gain: f32) {
        for v in self.data.iter_mut() {
            *v *= gain;
        }
    }

    pub fn apply_gain_channel(&mut self, ch: usize, gain: f32) {
        for v in self.channel_mut(ch) {
            *v *= gain;
        }
    }

    pub fn apply_gain_range(&mut self, ch: usize, start: usize, n: usize, gain: f32) {
        if let Some(r) = self.span(ch, start, n) {
            for v in &mut self.data[r] {
                *v *= gain;
            }
        }
    }

    /// Linear gain ramp from `start_gain` (first sample) towards `end_gain`.
    pub fn apply_gain_ramp(
        &mut self,
        ch: usize,
        start: usize,
        n: usize,
        start_gain: f32,
        end_gain: f32,
    ) {
        if let Some(r) = self.span(ch, start, n) {
            let step = (end_gain - start_gain) / n as f32;
            for (i, v) in self.data[r].iter_mut().enumerate() {
                *v *= start_gain + step * i as f32;
            }
        }
    }

    // -------------------------------------------------------------------------
    // Level analysis
    // -------------------------------------------------------------------------

    pub fn rms(&self, ch: usize, start: usize, n: usize) -> f32 {
        self.span(ch, start, n)
            .map_or(0.0, |r| frame_rms(&self.data[r]))
    }

    /// Peak magnitude over the range.
    pub fn peak(&self, ch: usize, start: usize, n: usize) -> f32 {
        self.span(ch, start, n)
            .map_or(0.0, |r| frame_peak(&self.data[r]))
    }

    pub fn min_max(&self, ch: usize, start: usize, n: usize) -> (f32, f32) {
        match self.span(ch, start, n) {
            Some(r) => self.data[r]
                .iter()
                .fold((f32::MAX, f32::MIN), |(lo, hi), &v| (lo.min(v), hi.max(v))),
            None => (0.0, 0.0),
        }
    }

    pub fn has_clipped(&self) -> bool {
        self.data.iter().any(|v| v.abs() > 1.0)
    }

    pub fn reverse(&mut self, ch: usize, start: usize, n: usize) {
        if let Some(r) = self.span(ch, start, n) {
            self.data[r].reverse();
        }
    }

    // -------------------------------------------------------------------------
    // Format conversion
    // -------------------------------------------------------------------------

    /// Sum and average all channels into a single-channel `dest`.
    pub fn to_mono(&self, dest: &mut SampleBuffer) {
        dest.resize(1, self.num_samples, false);
        dest.sample_rate = self.sample_rate;
        let samples = self.num_samples;
        mix_to_mono(self, 0..samples, dest.channel_mut(0));
    }

    /// Two-channel copy: mono sources are duplicated, otherwise the first two
    /// channels are taken.
    pub fn to_stereo(&self, dest: &mut SampleBuffer) {
        dest.resize(2, self.num_samples, true);
        dest.sample_rate = self.sample_rate;
        match self.num_channels {
            0 => {}
            1 => {
                dest.channel_mut(0).copy_from_slice(self.channel(0));
                dest.channel_mut(1).copy_from_slice(self.channel(0));
            }
            _ => {
                dest.channel_mut(0).copy_from_slice(self.channel(0));
                dest.channel_mut(1).copy_from_slice(self.channel(1));
            }
        }
    }

    pub fn to_interleaved(&self, dest: &mut Vec<f32>) {
        dest.clear();
        dest.reserve(self.data.len());
        for i in 0..self.num_samples {
            for ch in 0..self.num_channels {
                dest.push(self.data[ch * self.num_samples + i]);
            }
        }
    }

    /// Replace the contents with de-interleaved `src`. A trailing partial
    /// sample frame is dropped.
    pub fn from_interleaved(&mut self, src: &[f32], channels: usize) {
        if channels == 0 {
            self.resize(0, 0, true);
            return;
        }
        let samples = src.len() / channels;
        self.resize(channels, samples, false);
        for (i, frame) in src.chunks_exact(channels).enumerate() {
            for (ch, &v) in frame.iter().enumerate() {
                self.data[ch * samples + i] = v;
            }
        }
    }
}

impl AudioBlock for SampleBuffer {
    fn num_channels(&self) -> usize {
        self.num_channels
    }

    fn num_samples(&self) -> usize {
        self.num_samples
    }

    fn channel(&self, ch: usize) -> &[f32] {
        SampleBuffer::channel(self, ch)
    }
}

impl AudioBlockMut for SampleBuffer {
    fn channel_mut(&mut self, ch: usize) -> &mut [f32] {
        SampleBuffer::channel_mut(self, ch)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp_buffer(channels: usize, samples: usize) -> SampleBuffer {
        let mut buf = SampleBuffer::new(channels, samples, 48_000);
        for ch in 0..channels {
            for i in 0..samples {
                buf.set_sample(ch, i, (ch * 1000 + i) as f32);
            }
        }
        buf
    }

    #[test]
    fn test_new_is_zeroed() {
        let buf = SampleBuffer::new(2, 128, 48_000);
        assert_eq!(buf.num_channels(), 2);
        assert_eq!(buf.num_samples(), 128);
        assert!(buf.channel(0).iter().all(|&v| v == 0.0));
        assert!(buf.channel(1).iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_out_of_range_access_is_neutral() {
        let mut buf = SampleBuffer::new(1, 4, 48_000);
        assert_eq!(buf.sample(3, 0), 0.0);
        assert_eq!(buf.sample(0, 99), 0.0);
        buf.set_sample(5, 0, 1.0);
        buf.add_sample(0, 4, 1.0);
        assert!(buf.channel(0).iter().all(|&v| v == 0.0));
        assert!(buf.channel(7).is_empty());
        assert!(buf.channel_mut(7).is_empty());
    }

    #[test]
    fn test_resize_within_capacity_keeps_allocation() {
        let mut buf = SampleBuffer::new(2, 1024, 48_000);
        let ptr = buf.channel(0).as_ptr();
        buf.resize(2, 256, true);
        buf.resize(1, 2048, true);
        buf.resize(2, 1024, true);
        assert_eq!(buf.channel(0).as_ptr(), ptr);
        assert_eq!(buf.num_samples(), 1024);
    }

    #[test]
    fn test_resize_preserves_overlap() {
        let mut buf = ramp_buffer(2, 4);
        buf.resize(2, 6, false);
        assert_eq!(buf.channel(0), &[0.0, 1.0, 2.0, 3.0, 0.0, 0.0]);
        assert_eq!(buf.channel(1), &[1000.0, 1001.0, 1002.0, 1003.0, 0.0, 0.0]);

        buf.resize(3, 2, false);
        assert_eq!(buf.channel(0), &[0.0, 1.0]);
        assert_eq!(buf.channel(1), &[1000.0, 1001.0]);
        assert_eq!(buf.channel(2), &[0.0, 0.0]);
    }

    #[test]
    fn test_to_mono_averages() {
        let buf = SampleBuffer::from_channels(&[&[1.0, 0.5], &[0.0, -0.5]], 48_000);
        let mut mono = SampleBuffer::default();
        buf.to_mono(&mut mono);
        assert_eq!(mono.num_channels(), 1);
        assert_eq!(mono.channel(0), &[0.5, 0.0]);
    }

    #[test]
    fn test_to_stereo_duplicates_mono() {
        let buf = SampleBuffer::from_channels(&[&[0.25, -0.25]], 44_100);
        let mut stereo = SampleBuffer::default();
        buf.to_stereo(&mut stereo);
        assert_eq!(stereo.num_channels(), 2);
        assert_eq!(stereo.channel(0), stereo.channel(1));
        assert_eq!(stereo.sample_rate(), 44_100);
    }

    #[test]
    fn test_level_analysis() {
        let buf = SampleBuffer::from_channels(&[&[0.5, -0.5, 0.5, -1.0]], 48_000);
        assert!((buf.rms(0, 0, 3) - 0.5).abs() < 1e-6);
        assert_eq!(buf.peak(0, 0, 4), 1.0);
        assert_eq!(buf.min_max(0, 0, 4), (-1.0, 0.5));
        // Empty or invalid ranges
        assert_eq!(buf.rms(0, 0, 0), 0.0);
        assert_eq!(buf.rms(0, 4, 10), 0.0);
        assert_eq!(buf.peak(1, 0, 4), 0.0);
        // Partially valid range is clipped
        assert_eq!(buf.peak(0, 2, 100), 1.0);
    }

    #[test]
    fn test_copy_and_add_clip_to_bounds() {
        let src = SampleBuffer::from_channels(&[&[1.0, 2.0, 3.0]], 48_000);
        let mut dst = SampleBuffer::new(1, 4, 48_000);
        dst.copy_from(0, 2, &src, 0, 0, 3);
        assert_eq!(dst.channel(0), &[0.0, 0.0, 1.0, 2.0]);
        dst.add_from(0, 0, &src, 0, 1, 10, 0.5);
        assert_eq!(dst.channel(0), &[1.0, 1.5, 1.0, 2.0]);
    }

    #[test]
    fn test_gain_ramp() {
        let mut buf = SampleBuffer::from_channels(&[&[1.0; 4]], 48_000);
        buf.apply_gain_ramp(0, 0, 4, 0.0, 1.0);
        assert_eq!(buf.channel(0), &[0.0, 0.25, 0.5, 0.75]);
    }

    #[test]
    fn test_range_operations() {
        let mut buf = ramp_buffer(2, 4);
        buf.reverse(0, 1, 3);
        assert_eq!(buf.channel(0), &[0.0, 3.0, 2.0, 1.0]);

        buf.apply_gain_range(0, 2, 10, 0.5);
        assert_eq!(buf.channel(0), &[0.0, 3.0, 1.0, 0.5]);

        buf.apply_gain_channel(1, -1.0);
        assert_eq!(buf.channel(1), &[-1000.0, -1001.0, -1002.0, -1003.0]);

        buf.clear_range(1, 1, 2);
        assert_eq!(buf.channel(1), &[-1000.0, 0.0, 0.0, -1003.0]);

        buf.clear_channel(0);
        assert!(buf.channel(0).iter().all(|&v| v == 0.0));
        assert_eq!(buf.sample(1, 3), -1003.0);
    }

    #[test]
    fn test_interleave_round_trip() {
        let buf = ramp_buffer(2, 3);
        let mut inter = Vec::new();
        buf.to_interleaved(&mut inter);
        assert_eq!(inter, vec![0.0, 1000.0, 1.0, 1001.0, 2.0, 1002.0]);

        let mut back = SampleBuffer::default();
        back.from_interleaved(&inter, 2);
        assert_eq!(back.channel(0), buf.channel(0));
        assert_eq!(back.channel(1), buf.channel(1));
    }

    #[test]
    fn test_clipping_is_observable() {
        let mut buf = SampleBuffer::from_channels(&[&[0.5, 0.9]], 48_000);
        assert!(!buf.has_clipped());
        buf.apply_gain(2.0);
        assert!(buf.has_clipped());
        assert_eq!(buf.sample(0, 1), 1.8);
    }

    #[test]
    fn test_host_slices_as_block() {
        let mut l = [1.0f32, 2.0];
        let mut r = [3.0f32, 4.0];
        let mut chans: [&mut [f32]; 2] = [&mut l, &mut r];
        let block: &mut [&mut [f32]] = &mut chans;
        assert_eq!(block.num_channels(), 2);
        assert_eq!(block.num_samples(), 2);
        block.channel_mut(1)[0] = 9.0;
        assert_eq!(block.channel(1), &[9.0, 4.0]);
        assert!(block.channel(2).is_empty());
    }
}
