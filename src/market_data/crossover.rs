// =============================================================================
// Crossover Detector — fast/slow MA transition with per-candle dedupe
// =============================================================================
//
// Classifies the two newest annotated candles as a bullish or bearish
// crossover and reports whether this is the first time the result has been
// observed on the current candle. The dedupe state is threaded through
// explicitly so detection stays testable in isolation.
// =============================================================================

use serde::Serialize;

use crate::market_data::CandleWindow;
use crate::types::MaKind;

/// Direction of a fast/slow moving-average transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Bullish,
    Bearish,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bullish => write!(f, "bullish"),
            Self::Bearish => write!(f, "bearish"),
        }
    }
}

/// Open time of the last candle on which a crossover was reported, per MA
/// kind. Keeps repeated polls of an unchanged candle from re-reporting the
/// same event.
#[derive(Debug, Clone, Copy, Default)]
pub struct CrossoverDedupeState {
    last_sma_cross: i64,
    last_ema_cross: i64,
}

impl CrossoverDedupeState {
    fn slot(&mut self, kind: MaKind) -> &mut i64 {
        match kind {
            MaKind::Sma => &mut self.last_sma_cross,
            MaKind::Ema => &mut self.last_ema_cross,
        }
    }
}

/// Classify the window's two newest candles for `kind` and deduplicate per
/// candle.
///
/// Returns `(None, None)` unless both candles carry defined fast and slow
/// values. A bullish transition is previous fast <= previous slow with
/// current fast > current slow; bearish is the mirror with >= and <.
/// Bullish is checked first, so a previous-step tie that breaks upward
/// resolves bullish.
///
/// When a direction is found, the second element is `Some(true)` exactly
/// once per candle: the first call against a given newest `open_time`
/// records it in `dedupe`, and every later call against the same candle
/// yields `Some(false)`.
pub fn detect(
    window: &CandleWindow,
    kind: MaKind,
    dedupe: &mut CrossoverDedupeState,
) -> (Option<Direction>, Option<bool>) {
    let (curr, prev) = match (window.entry(0), window.entry(1)) {
        (Some(c), Some(p)) => (c, p),
        _ => return (None, None),
    };

    let values = |ann: &crate::market_data::MaAnnotation| -> Option<(f64, f64)> {
        let series = match kind {
            MaKind::Sma => &ann.sma,
            MaKind::Ema => &ann.ema,
        };
        match (series.first().copied().flatten(), series.get(1).copied().flatten()) {
            (Some(fast), Some(slow)) => Some((fast, slow)),
            _ => None,
        }
    };

    let ((curr_fast, curr_slow), (prev_fast, prev_slow)) =
        match (values(&curr.annotation), values(&prev.annotation)) {
            (Some(c), Some(p)) => (c, p),
            _ => return (None, None),
        };

    let direction = if prev_fast <= prev_slow && curr_fast > curr_slow {
        Some(Direction::Bullish)
    } else if prev_fast >= prev_slow && curr_fast < curr_slow {
        Some(Direction::Bearish)
    } else {
        None
    };

    let first_occurrence = direction.map(|_| {
        let open_time = curr.candle.open_time;
        let slot = dedupe.slot(kind);
        if *slot != open_time {
            *slot = open_time;
            true
        } else {
            false
        }
    });

    (direction, first_occurrence)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::IndicatorEngine;
    use crate::market_data::Candle;

    const PERIOD_SECS: i64 = 60;

    fn window_from(closes: &[f64], periods: &[usize]) -> CandleWindow {
        let mut window = CandleWindow::new(PERIOD_SECS, periods);
        let batch: Vec<Candle> = closes
            .iter()
            .rev()
            .enumerate()
            .map(|(i, &c)| Candle {
                open_time: 1000 * PERIOD_SECS - i as i64 * PERIOD_SECS,
                open: c,
                close: c,
                high: c,
                low: c,
                amount: 1.0,
                volume: 1.0,
            })
            .collect();
        let fresh = window.ingest(&batch);
        let engine = IndicatorEngine::new(periods.to_vec()).unwrap();
        engine.annotate(&mut window, fresh);
        window
    }

    #[test]
    fn insufficient_history_yields_no_result() {
        let window = window_from(&[1.0, 2.0], &[2, 3]);
        let mut dedupe = CrossoverDedupeState::default();
        assert_eq!(detect(&window, MaKind::Sma, &mut dedupe), (None, None));
    }

    #[test]
    fn price_jump_flags_bullish_exactly_once() {
        // Fast SMA(2) sits below slow SMA(3) during the decline, then the
        // jump to 10 pushes it above: one bullish crossover on the jump
        // candle.
        let window = window_from(&[3.0, 2.0, 1.0, 10.0], &[2, 3]);
        let mut dedupe = CrossoverDedupeState::default();

        let (dir, first) = detect(&window, MaKind::Sma, &mut dedupe);
        assert_eq!(dir, Some(Direction::Bullish));
        assert_eq!(first, Some(true));

        // Repeated polls of the unchanged candle: same direction, no longer
        // first.
        for _ in 0..3 {
            let (dir, first) = detect(&window, MaKind::Sma, &mut dedupe);
            assert_eq!(dir, Some(Direction::Bullish));
            assert_eq!(first, Some(false));
        }
    }

    #[test]
    fn bearish_transition_detected() {
        let window = window_from(&[8.0, 9.0, 10.0, 1.0], &[2, 3]);
        let mut dedupe = CrossoverDedupeState::default();
        let (dir, first) = detect(&window, MaKind::Sma, &mut dedupe);
        assert_eq!(dir, Some(Direction::Bearish));
        assert_eq!(first, Some(true));
    }

    #[test]
    fn no_transition_when_fast_stays_above() {
        // Monotonically rising series keeps fast above slow throughout.
        let window = window_from(&[1.0, 2.0, 3.0, 4.0, 5.0], &[2, 3]);
        let mut dedupe = CrossoverDedupeState::default();
        assert_eq!(detect(&window, MaKind::Sma, &mut dedupe), (None, None));
    }

    #[test]
    fn previous_tie_resolves_bullish() {
        // Flat warm-up makes prev fast == prev slow; the jump then breaks
        // the tie upward.
        let window = window_from(&[5.0, 5.0, 5.0, 5.0, 10.0], &[2, 3]);
        let mut dedupe = CrossoverDedupeState::default();
        let (dir, first) = detect(&window, MaKind::Sma, &mut dedupe);
        assert_eq!(dir, Some(Direction::Bullish));
        assert_eq!(first, Some(true));
    }

    #[test]
    fn new_candle_rearms_dedupe() {
        let mut window = CandleWindow::new(PERIOD_SECS, &[2, 3]);
        let engine = IndicatorEngine::new(vec![2, 3]).unwrap();
        let mut dedupe = CrossoverDedupeState::default();

        let closes = [8.0, 9.0, 10.0, 1.0];
        let base = 1000 * PERIOD_SECS;
        let batch: Vec<Candle> = closes
            .iter()
            .rev()
            .enumerate()
            .map(|(i, &c)| Candle {
                open_time: base - i as i64 * PERIOD_SECS,
                open: c,
                close: c,
                high: c,
                low: c,
                amount: 1.0,
                volume: 1.0,
            })
            .collect();
        let fresh = window.ingest(&batch);
        engine.annotate(&mut window, fresh);

        let (dir, first) = detect(&window, MaKind::Sma, &mut dedupe);
        assert_eq!(dir, Some(Direction::Bearish));
        assert_eq!(first, Some(true));
        assert_eq!(detect(&window, MaKind::Sma, &mut dedupe).1, Some(false));

        // A new candle that swings price back up produces a fresh bullish
        // report.
        let next = Candle {
            open_time: base + PERIOD_SECS,
            open: 20.0,
            close: 20.0,
            high: 20.0,
            low: 20.0,
            amount: 1.0,
            volume: 1.0,
        };
        let fresh = window.ingest(&[next]);
        engine.annotate(&mut window, fresh);

        let (dir, first) = detect(&window, MaKind::Sma, &mut dedupe);
        assert_eq!(dir, Some(Direction::Bullish));
        assert_eq!(first, Some(true));
        assert_eq!(detect(&window, MaKind::Sma, &mut dedupe).1, Some(false));
    }

    #[test]
    fn dedupe_is_independent_per_ma_kind() {
        // The drop to 1 crosses both the SMA and the EMA pairs bearish.
        let window = window_from(&[8.0, 9.0, 10.0, 11.0, 1.0], &[2, 3]);
        let mut dedupe = CrossoverDedupeState::default();

        // Consuming the SMA first-occurrence must not consume the EMA one.
        let (dir, first) = detect(&window, MaKind::Sma, &mut dedupe);
        assert_eq!(dir, Some(Direction::Bearish));
        assert_eq!(first, Some(true));

        let (dir, first) = detect(&window, MaKind::Ema, &mut dedupe);
        assert_eq!(dir, Some(Direction::Bearish));
        assert_eq!(first, Some(true));
        assert_eq!(detect(&window, MaKind::Ema, &mut dedupe).1, Some(false));
    }
}
