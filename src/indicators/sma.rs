// =============================================================================
// Simple Moving Average (SMA)
// =============================================================================
//
// Unweighted mean of the last `period` closes. The window keeps enough
// lookback for the incremental form, which shifts the trailing mean by one
// bucket in O(1):
//
//   sma_t = sma_{t-1} + (close_t - close_{t-period}) / period
// =============================================================================

/// Arithmetic mean of `closes`. Caller guarantees the slice is non-empty.
pub fn direct_mean(closes: &[f64]) -> f64 {
    closes.iter().sum::<f64>() / closes.len() as f64
}

/// Advance a trailing mean by one bucket: `newest` enters the window,
/// `dropped` (the close `period` buckets back) leaves it.
pub fn sma_step(prev_sma: f64, newest: f64, dropped: f64, period: usize) -> f64 {
    prev_sma + (newest - dropped) / period as f64
}
