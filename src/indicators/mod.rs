// =============================================================================
// Indicator Engine — incremental SMA/EMA annotation of the candle window
// =============================================================================
//
// Annotates freshly ingested candles strictly oldest-to-newest, because each
// recurrence reads the immediately older candle's annotation. Values are
// written once and never recomputed; "not enough history" is `None`, not an
// error, and flows through to crossover detection as a non-result.
// =============================================================================

pub mod ema;
pub mod sma;

use anyhow::{bail, Result};

use crate::market_data::{CandleWindow, MaAnnotation};

/// Computes SMA and EMA per configured period for newly ingested candles.
///
/// Periods are fast-to-slow; each maps to one slot in [`MaAnnotation`].
pub struct IndicatorEngine {
    periods: Vec<usize>,
}

impl IndicatorEngine {
    /// A zero or missing period is a configuration bug; fail at startup
    /// rather than per tick.
    pub fn new(periods: Vec<usize>) -> Result<Self> {
        if periods.is_empty() {
            bail!("indicator engine requires at least one MA period");
        }
        if let Some(p) = periods.iter().find(|&&p| p == 0) {
            bail!("MA period must be >= 1, got {p}");
        }
        Ok(Self { periods })
    }

    pub fn periods(&self) -> &[usize] {
        &self.periods
    }

    /// Annotate the `fresh` newest entries of `window`, oldest first.
    ///
    /// For each period N and entry index i (0 = newest):
    /// - SMA: incremental step off the older neighbour's SMA when that seed
    ///   exists and the lag-N close is still in the window; otherwise a
    ///   direct mean over the trailing N closes when N closes exist;
    ///   otherwise undefined.
    /// - EMA: recurrence seeded from the older neighbour's EMA, falling back
    ///   to its SMA; undefined until a seed exists.
    pub fn annotate(&self, window: &mut CandleWindow, fresh: usize) {
        let start = fresh.min(window.len());
        for i in (0..start).rev() {
            let annotation = self.annotate_entry(window, i);
            window.set_annotation(i, annotation);
        }
    }

    fn annotate_entry(&self, window: &CandleWindow, index: usize) -> MaAnnotation {
        let close = match window.entry(index) {
            Some(e) => e.candle.close,
            None => return MaAnnotation::empty(self.periods.len()),
        };
        let mut annotation = MaAnnotation::empty(self.periods.len());

        for (slot, &period) in self.periods.iter().enumerate() {
            annotation.sma[slot] = self.compute_sma(window, index, slot, period, close);
            annotation.ema[slot] = self.compute_ema(window, index, slot, period, close);
        }
        annotation
    }

    fn compute_sma(
        &self,
        window: &CandleWindow,
        index: usize,
        slot: usize,
        period: usize,
        close: f64,
    ) -> Option<f64> {
        let older_sma = window.older(index).and_then(|e| e.annotation.sma[slot]);

        if let (Some(prev), Some(lagged)) = (older_sma, window.at_lag(index, period)) {
            // The close entering the mean is `close`; the one leaving is the
            // lag-N close. The 4xN window bound keeps the lag in range, but
            // at_lag is checked anyway so a short window degrades to the
            // direct path instead of a wrong value.
            return Some(sma::sma_step(prev, close, lagged.candle.close, period));
        }

        // Direct mean over the trailing N closes, when they all exist.
        if window.len() - index >= period {
            let closes: Vec<f64> = (0..period)
                .filter_map(|lag| window.at_lag(index, lag))
                .map(|e| e.candle.close)
                .collect();
            if closes.len() == period {
                return Some(sma::direct_mean(&closes));
            }
        }
        None
    }

    fn compute_ema(
        &self,
        window: &CandleWindow,
        index: usize,
        slot: usize,
        period: usize,
        close: f64,
    ) -> Option<f64> {
        let older = window.older(index)?;
        let seed = older.annotation.ema[slot].or(older.annotation.sma[slot])?;
        Some(ema::ema_step(close, seed, period))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
