// =============================================================================
// Exponential Moving Average (EMA)
// =============================================================================
//
// Recursively weighted average favouring recent closes:
//
//   alpha = 2 / (period + 1)
//   ema_t = close_t * alpha + seed * (1 - alpha)
//
// where `seed` is the previous candle's EMA when one exists, otherwise its
// SMA. That SMA bootstrap determines where the series starts and how fast it
// converges, so it must not be altered.
// =============================================================================

/// Smoothing factor for the given look-back period.
pub fn smoothing(period: usize) -> f64 {
    2.0 / (period + 1) as f64
}

/// One step of the EMA recurrence.
pub fn ema_step(close: f64, seed: f64, period: usize) -> f64 {
    let alpha = smoothing(period);
    close * alpha + seed * (1.0 - alpha)
}
