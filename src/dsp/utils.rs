//! Small numeric helpers shared by the streaming stages.

/// Guard against `log(0)` and division by zero in level ratios.
pub const LEVEL_EPS: f32 = 1e-10;

/// Smoothing factor for exponentially averaged metrics.
pub const EMA_ALPHA: f32 = 0.1;

pub fn frame_rms(x: &[f32]) -> f32 {
    if x.is_empty() {
        return 0.0;
    }
    let mut s = 0.0f32;
    for &v in x {
        s += v * v;
    }
    (s / x.len() as f32).sqrt()
}

pub fn frame_peak(x: &[f32]) -> f32 {
    x.iter().fold(0.0f32, |m, &v| m.max(v.abs()))
}

/// Sum of squares, used when a level has to be combined over several frames.
pub fn sum_squares(x: &[f32]) -> f64 {
    x.iter().map(|&v| (v as f64) * (v as f64)).sum()
}

/// Level reduction between two RMS values in dB.
///
/// `20 * log10(max(pre / max(post, eps), eps))`, always finite for finite input.
pub fn reduction_db(pre_rms: f32, post_rms: f32) -> f32 {
    let ratio = pre_rms / post_rms.max(LEVEL_EPS);
    let db = 20.0 * ratio.max(LEVEL_EPS).log10();
    if db.is_finite() {
        db
    } else {
        0.0
    }
}

#[inline]
pub fn ema(previous: f32, sample: f32, alpha: f32) -> f32 {
    alpha * sample + (1.0 - alpha) * previous
}
