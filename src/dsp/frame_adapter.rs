//! Fixed-frame adaptation between host-sized buffers and the engine's frame size.
//!
//! # Purpose
//! Hosts deliver buffers of whatever size the driver chose; the denoising engine
//! only accepts frames of exactly `frame_size` samples. The adapter keeps one
//! input FIFO and one output FIFO per channel and moves complete frames between
//! them.
//!
//! # Design Notes
//! - Channel-parallel: every channel has its own queue pair, and a frame is only
//!   extracted when *all* channels hold a full frame, so channels never drift
//! - Partial frames are never handed out; they stay queued until completed
//! - `pull` never blocks: a shortfall is zero-filled, which bounds the total
//!   inserted silence over a session to `frame_size - 1` samples
//!
//! ## Audio Thread Safety
//! - Queues are `ringbuf` rings allocated once in `new`
//! - Capacity is `max_block + 2 * frame_size`; as long as callers push at most
//!   `max_block` samples between pulls of the same size, neither ring can fill

use ringbuf::{Consumer, Producer, RingBuffer};

use super::sample_buffer::{AudioBlock, AudioBlockMut};
use crate::error::ConfigurationError;

struct ChannelQueues {
    input_producer: Producer<f32>,
    input_consumer: Consumer<f32>,
    output_producer: Producer<f32>,
    output_consumer: Consumer<f32>,
}

impl ChannelQueues {
    fn new(capacity: usize) -> Self {
        let (in_prod, in_cons) = RingBuffer::<f32>::new(capacity).split();
        let (out_prod, out_cons) = RingBuffer::<f32>::new(capacity).split();
        Self {
            input_producer: in_prod,
            input_consumer: in_cons,
            output_producer: out_prod,
            output_consumer: out_cons,
        }
    }

    fn clear(&mut self) {
        let pending = self.input_consumer.len();
        self.input_consumer.discard(pending);
        let ready = self.output_consumer.len();
        self.output_consumer.discard(ready);
    }
}

pub struct FrameAdapter {
    queues: Vec<ChannelQueues>,
    frame_size: usize,
}

impl FrameAdapter {
    /// Allocate queues for `channels` streams that will be fed at most
    /// `max_block` samples at a time.
    pub fn new(
        channels: usize,
        frame_size: usize,
        max_block: usize,
    ) -> Result<Self, ConfigurationError> {
        if channels == 0 {
            return Err(ConfigurationError::InvalidChannelCount(channels));
        }
        if frame_size == 0 {
            return Err(ConfigurationError::InvalidFrameSize(frame_size));
        }
        if max_block == 0 {
            return Err(ConfigurationError::InvalidBlockSize(max_block));
        }

        let capacity = max_block + 2 * frame_size;
        let queues = (0..channels).map(|_| ChannelQueues::new(capacity)).collect();

        Ok(Self { queues, frame_size })
    }

    pub fn num_channels(&self) -> usize {
        self.queues.len()
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Append `n` samples starting at `start` from each channel of `block` to
    /// the matching input queue. Returns the number of samples accepted per
    /// channel.
    pub fn push<B: AudioBlock + ?Sized>(&mut self, block: &B, start: usize, n: usize) -> usize {
        let mut accepted = usize::MAX;
        for ch in 0..self.queues.len() {
            let samples = block.channel(ch);
            let begin = start.min(samples.len());
            let end = (start + n).min(samples.len());
            accepted = accepted.min(self.push_channel(ch, &samples[begin..end]));
        }
        if accepted == usize::MAX {
            0
        } else {
            accepted
        }
    }

    /// Append samples to one channel's input queue.
    pub fn push_channel(&mut self, ch: usize, samples: &[f32]) -> usize {
        let Some(q) = self.queues.get_mut(ch) else {
            return 0;
        };
        let pushed = q.input_producer.push_slice(samples);
        debug_assert_eq!(pushed, samples.len(), "input queue overflow");
        pushed
    }

    /// Remove the oldest `frame_size` samples of every channel into `frames`.
    ///
    /// Returns false, leaving the queues untouched, unless every channel holds
    /// a complete frame.
    pub fn try_extract_frame(&mut self, frames: &mut [Vec<f32>]) -> bool {
        let f = self.frame_size;
        if self.queues.iter().any(|q| q.input_consumer.len() < f) {
            return false;
        }

        let frames_ok = frames.len() >= self.queues.len() && frames.iter().all(|fr| fr.len() >= f);
        debug_assert!(frames_ok, "frame scratch does not match adapter layout");
        if !frames_ok {
            return false;
        }

        for (q, frame) in self.queues.iter_mut().zip(frames.iter_mut()) {
            let got = q.input_consumer.pop_slice(&mut frame[..f]);
            debug_assert_eq!(got, f, "short frame extracted");
            if got < f {
                frame[got..f].fill(0.0);
            }
        }
        true
    }

    /// Append one processed frame per channel to the output queues.
    pub fn commit_output(&mut self, frames: &[Vec<f32>]) {
        let f = self.frame_size;
        for (q, frame) in self.queues.iter_mut().zip(frames) {
            let n = f.min(frame.len());
            let pushed = q.output_producer.push_slice(&frame[..n]);
            debug_assert_eq!(pushed, f, "output queue overflow");
        }
    }

    /// Queue `n` zeros ahead of any processed output on every channel.
    ///
    /// Priming with `frame_size - 1` zeros after a `clear` makes the output
    /// delay constant: `pull` never has to zero-fill afterwards.
    pub fn prime_output(&mut self, n: usize) {
        let n = n.min(self.frame_size);
        for q in self.queues.iter_mut() {
            for _ in 0..n {
                if q.output_producer.push(0.0).is_err() {
                    break;
                }
            }
        }
    }

    /// Fill `n` samples starting at `start` of every channel of `block` from the
    /// output queues. Missing samples are written as zeros. Returns the number
    /// of queued samples delivered (the smallest over all channels).
    pub fn pull<B: AudioBlockMut + ?Sized>(&mut self, block: &mut B, start: usize, n: usize) -> usize {
        let mut delivered = usize::MAX;
        for ch in 0..self.queues.len() {
            let samples = block.channel_mut(ch);
            let begin = start.min(samples.len());
            let end = (start + n).min(samples.len());
            delivered = delivered.min(self.pull_channel(ch, &mut samples[begin..end]));
        }
        if delivered == usize::MAX {
            0
        } else {
            delivered
        }
    }

    /// Fill `out` from one channel's output queue, zero-padding the shortfall.
    pub fn pull_channel(&mut self, ch: usize, out: &mut [f32]) -> usize {
        let popped = match self.queues.get_mut(ch) {
            Some(q) => q.output_consumer.pop_slice(out),
            None => 0,
        };
        out[popped..].fill(0.0);
        popped
    }

    /// Drop everything queued. Storage is kept.
    pub fn clear(&mut self) {
        for q in self.queues.iter_mut() {
            q.clear();
        }
    }

    /// Output delay once primed with `frame_size - 1` zeros.
    pub fn latency_samples(&self) -> usize {
        self.frame_size - 1
    }
}

#[cfg(test)]
impl FrameAdapter {
    fn pending_input(&self) -> usize {
        self.queues.first().map_or(0, |q| q.input_consumer.len())
    }

    fn available_output(&self) -> usize {
        self.queues.first().map_or(0, |q| q.output_consumer.len())
    }
}

// =============================================================================
// Tests
// =============================================================================
