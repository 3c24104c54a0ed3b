//! Exponential moving averages for noisy per-execution metrics.

/// Smoothing factor used by the heatmap and the predictive optimizer
pub const DEFAULT_EMA_ALPHA: f64 = 0.1;

/// Fold `sample` into `previous` with weight `alpha`.
///
/// `alpha` is clamped to [0, 1]; 1 means "take the sample as is".
#[must_use]
pub fn ema(previous: f64, sample: f64, alpha: f64) -> f64 {
    let alpha = alpha.clamp(0.0, 1.0);
    alpha * sample + (1.0 - alpha) * previous
}
