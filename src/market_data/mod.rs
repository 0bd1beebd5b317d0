// =============================================================================
// Market Data — candle window, crossover detection, per-symbol updaters
// =============================================================================

pub mod candle_window;
pub mod crossover;
pub mod updater;

pub use candle_window::{Candle, CandleWindow, MaAnnotation, WindowEntry};
pub use crossover::{detect, CrossoverDedupeState, Direction};
pub use updater::{CandleSource, SymbolUpdater, UpdaterPhase};

use crate::types::MaKind;

/// All market state for one symbol: the candle window, the crossover dedupe
/// state, and the most recent detection result per MA kind.
///
/// The updater task is the only writer. Readers (status API, executor) go
/// through the cached results, so polling can never consume a
/// first-occurrence flag before the trigger it belongs to is enqueued.
pub struct SymbolMarket {
    pub window: CandleWindow,
    pub dedupe: CrossoverDedupeState,
    last_sma: (Option<Direction>, Option<bool>),
    last_ema: (Option<Direction>, Option<bool>),
}

impl SymbolMarket {
    pub fn new(period_secs: i64, ma_periods: &[usize]) -> Self {
        Self {
            window: CandleWindow::new(period_secs, ma_periods),
            dedupe: CrossoverDedupeState::default(),
            last_sma: (None, None),
            last_ema: (None, None),
        }
    }

    /// Close of the newest candle, if any.
    pub fn latest_close(&self) -> Option<f64> {
        self.window.latest_close()
    }

    /// Newest candle's MA values for `kind`, fast-to-slow. `None` per slot
    /// during warm-up.
    pub fn latest_ma(&self, kind: MaKind) -> Vec<Option<f64>> {
        match self.window.newest() {
            Some(e) => match kind {
                MaKind::Sma => e.annotation.sma.clone(),
                MaKind::Ema => e.annotation.ema.clone(),
            },
            None => Vec::new(),
        }
    }

    /// The detection result cached by the updater's last refresh tick.
    pub fn latest_crossover(&self, kind: MaKind) -> (Option<Direction>, Option<bool>) {
        match kind {
            MaKind::Sma => self.last_sma,
            MaKind::Ema => self.last_ema,
        }
    }

    pub(crate) fn record_crossover(
        &mut self,
        kind: MaKind,
        result: (Option<Direction>, Option<bool>),
    ) {
        match kind {
            MaKind::Sma => self.last_sma = result,
            MaKind::Ema => self.last_ema = result,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
