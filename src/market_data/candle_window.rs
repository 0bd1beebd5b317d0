// =============================================================================
// Candle Window — bounded, newest-first buffer of annotated candles
// =============================================================================
//
// The window stores one finalized OHLCV candle per time bucket together with
// its moving-average annotation, newest first, bounded to
// `max_history = 4 * max(ma_periods)`. That sizing keeps every lag the SMA
// recurrence needs inside the window for all retained candles.
//
// Index convention throughout: index 0 is the newest candle, higher indices
// are older. `older(i)` and `at_lag(i, n)` are the named accessors the
// indicator recurrences use instead of raw offset arithmetic.
// =============================================================================

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// A single finalized OHLCV candle. Identified by `open_time` (UNIX seconds);
/// consecutive candles in a window are exactly one period apart.
///
/// Field order mirrors the KuCoin kline row: time, open, close, high, low,
/// amount, volume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: i64,
    pub open: f64,
    pub close: f64,
    pub high: f64,
    pub low: f64,
    pub amount: f64,
    pub volume: f64,
}

/// Per-candle indicator values, one slot per configured MA period in
/// fast-to-slow order. `None` until enough history exists.
///
/// Written exactly once per candle by the indicator engine and never
/// recomputed afterwards.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MaAnnotation {
    pub sma: Vec<Option<f64>>,
    pub ema: Vec<Option<f64>>,
}

impl MaAnnotation {
    /// An annotation with `slots` undefined values per MA family.
    pub fn empty(slots: usize) -> Self {
        Self {
            sma: vec![None; slots],
            ema: vec![None; slots],
        }
    }
}

/// One window row: the candle plus its annotation.
#[derive(Debug, Clone, Serialize)]
pub struct WindowEntry {
    pub candle: Candle,
    pub annotation: MaAnnotation,
}

/// Bounded, time-ordered candle buffer for a single symbol.
///
/// Invariants after every [`ingest`](Self::ingest):
/// - `open_time` is strictly decreasing front to back, with a fixed step of
///   `period_secs`;
/// - `len() <= max_history`.
pub struct CandleWindow {
    entries: VecDeque<WindowEntry>,
    max_history: usize,
    period_secs: i64,
    ma_slots: usize,
}

impl CandleWindow {
    /// Create an empty window sized for the given MA periods.
    ///
    /// `max_history` is four times the slowest period so the incremental SMA
    /// always finds its lag-N dependency among retained entries.
    pub fn new(period_secs: i64, ma_periods: &[usize]) -> Self {
        let slowest = ma_periods.iter().copied().max().unwrap_or(1);
        Self {
            entries: VecDeque::new(),
            max_history: 4 * slowest,
            period_secs,
            ma_slots: ma_periods.len(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn max_history(&self) -> usize {
        self.max_history
    }

    pub fn period_secs(&self) -> i64 {
        self.period_secs
    }

    /// Entry at `index` (0 = newest).
    pub fn entry(&self, index: usize) -> Option<&WindowEntry> {
        self.entries.get(index)
    }

    /// The immediately older neighbour of `index`.
    pub fn older(&self, index: usize) -> Option<&WindowEntry> {
        self.entries.get(index + 1)
    }

    /// The entry `lag` buckets older than `index`.
    pub fn at_lag(&self, index: usize, lag: usize) -> Option<&WindowEntry> {
        self.entries.get(index + lag)
    }

    /// The newest entry.
    pub fn newest(&self) -> Option<&WindowEntry> {
        self.entries.front()
    }

    /// Close price of the newest candle.
    pub fn latest_close(&self) -> Option<f64> {
        self.entries.front().map(|e| e.candle.close)
    }

    /// Open time of the newest candle.
    pub fn latest_open_time(&self) -> Option<i64> {
        self.entries.front().map(|e| e.candle.open_time)
    }

    /// Replace the annotation of the entry at `index`. Used only by the
    /// indicator engine when annotating freshly ingested candles.
    pub(crate) fn set_annotation(&mut self, index: usize, annotation: MaAnnotation) {
        if let Some(entry) = self.entries.get_mut(index) {
            entry.annotation = annotation;
        }
    }

    /// Merge a newest-first batch of candles into the window and return the
    /// number of genuinely new candles accepted.
    ///
    /// Only the longest contiguous newest-first run at the head of `batch` is
    /// considered: a malformed batch (duplicate or mis-spaced rows) is cut at
    /// the first violation. Candles at or before the window's newest entry
    /// are rejected silently, which makes re-ingesting the same fetch a
    /// no-op.
    ///
    /// If the accepted run does not land exactly one period above the
    /// window's newest entry the data has a hole the caller could not fill;
    /// the window resets to the new run and warm-up restarts, rather than
    /// silently feeding wrong values into the recurrences.
    pub fn ingest(&mut self, batch: &[Candle]) -> usize {
        let run = self.contiguous_run(batch);
        if run.is_empty() {
            return 0;
        }

        let accepted = match self.latest_open_time() {
            None => run,
            Some(latest) => {
                let fresh: Vec<&Candle> =
                    run.into_iter().filter(|c| c.open_time > latest).collect();
                if fresh.is_empty() {
                    return 0;
                }
                let oldest_new = fresh[fresh.len() - 1].open_time;
                if oldest_new != latest + self.period_secs {
                    warn!(
                        expected = latest + self.period_secs,
                        got = oldest_new,
                        "candle gap not covered by fetch; resetting window"
                    );
                    self.entries.clear();
                }
                fresh
            }
        };

        let count = accepted.len().min(self.max_history);
        // Keep the newest `count` candles; push oldest-first so each
        // push_front preserves newest-first order.
        for candle in accepted.iter().take(count).rev() {
            self.entries.push_front(WindowEntry {
                candle: (*candle).clone(),
                annotation: MaAnnotation::empty(self.ma_slots),
            });
        }
        self.trim();
        count
    }

    /// Longest prefix of `batch` whose open times strictly decrease by
    /// exactly one period.
    fn contiguous_run<'a>(&self, batch: &'a [Candle]) -> Vec<&'a Candle> {
        let mut run: Vec<&Candle> = Vec::with_capacity(batch.len());
        for candle in batch {
            if let Some(prev) = run.last() {
                if candle.open_time != prev.open_time - self.period_secs {
                    break;
                }
            }
            run.push(candle);
        }
        run
    }

    /// Evict the oldest entries beyond `max_history`.
    fn trim(&mut self) {
        while self.entries.len() > self.max_history {
            self.entries.pop_back();
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(open_time: i64, close: f64) -> Candle {
        Candle {
            open_time,
            open: close,
            close,
            high: close + 1.0,
            low: close - 1.0,
            amount: 10.0,
            volume: 100.0,
        }
    }

    /// Newest-first batch of `n` candles ending (newest) at `newest_time`.
    fn batch(newest_time: i64, n: usize, period: i64) -> Vec<Candle> {
        (0..n)
            .map(|i| candle(newest_time - i as i64 * period, 100.0 + i as f64))
            .collect()
    }

    #[test]
    fn first_ingest_accepts_whole_batch() {
        let mut w = CandleWindow::new(60, &[2, 3]);
        let accepted = w.ingest(&batch(600, 5, 60));
        assert_eq!(accepted, 5);
        assert_eq!(w.len(), 5);
        assert_eq!(w.latest_open_time(), Some(600));
        // Strictly decreasing with fixed step.
        for i in 0..w.len() - 1 {
            let newer = w.entry(i).unwrap().candle.open_time;
            let older = w.older(i).unwrap().candle.open_time;
            assert_eq!(newer - older, 60);
        }
    }

    #[test]
    fn ingest_is_idempotent() {
        let mut w = CandleWindow::new(60, &[2, 3]);
        let b = batch(600, 5, 60);
        assert_eq!(w.ingest(&b), 5);
        assert_eq!(w.ingest(&b), 0);
        assert_eq!(w.len(), 5);
    }

    #[test]
    fn extends_with_only_newer_candles() {
        let mut w = CandleWindow::new(60, &[2, 3]);
        w.ingest(&batch(600, 5, 60));
        // Overlapping fetch: two new buckets plus two already-seen ones.
        let accepted = w.ingest(&batch(720, 4, 60));
        assert_eq!(accepted, 2);
        assert_eq!(w.latest_open_time(), Some(720));
        assert_eq!(w.len(), 7);
    }

    #[test]
    fn stale_batch_rejected() {
        let mut w = CandleWindow::new(60, &[2, 3]);
        w.ingest(&batch(600, 5, 60));
        assert_eq!(w.ingest(&batch(480, 3, 60)), 0);
        assert_eq!(w.len(), 5);
    }

    #[test]
    fn window_never_exceeds_max_history() {
        let mut w = CandleWindow::new(60, &[2, 3]);
        assert_eq!(w.max_history(), 12);
        let mut newest = 600;
        for _ in 0..10 {
            w.ingest(&batch(newest, 5, 60));
            assert!(w.len() <= w.max_history());
            newest += 5 * 60;
        }
        assert_eq!(w.len(), 12);
    }

    #[test]
    fn oversized_first_batch_capped() {
        let mut w = CandleWindow::new(60, &[2, 3]);
        let accepted = w.ingest(&batch(6000, 40, 60));
        assert_eq!(accepted, 12);
        assert_eq!(w.len(), 12);
        assert_eq!(w.latest_open_time(), Some(6000));
    }

    #[test]
    fn uncovered_gap_resets_window() {
        let mut w = CandleWindow::new(60, &[2, 3]);
        w.ingest(&batch(600, 5, 60));
        // Batch starts three buckets above the window's newest and does not
        // reach back to 660 — a hole the fetch did not cover.
        let accepted = w.ingest(&batch(840, 2, 60));
        assert_eq!(accepted, 2);
        assert_eq!(w.len(), 2);
        assert_eq!(w.latest_open_time(), Some(840));
    }

    #[test]
    fn malformed_batch_cut_at_first_violation() {
        let mut w = CandleWindow::new(60, &[2, 3]);
        let mut b = batch(600, 3, 60);
        b.push(candle(300, 50.0)); // skips the 420 bucket
        b.push(candle(240, 49.0));
        assert_eq!(w.ingest(&b), 3);
        assert_eq!(w.len(), 3);
    }

    #[test]
    fn named_accessors_agree() {
        let mut w = CandleWindow::new(60, &[2, 3]);
        w.ingest(&batch(600, 5, 60));
        let e1 = w.entry(1).unwrap().candle.open_time;
        assert_eq!(w.older(0).unwrap().candle.open_time, e1);
        assert_eq!(w.at_lag(0, 1).unwrap().candle.open_time, e1);
        assert_eq!(
            w.at_lag(0, 4).unwrap().candle.open_time,
            600 - 4 * 60
        );
        assert!(w.at_lag(0, 5).is_none());
    }

    #[test]
    fn empty_window_accessors() {
        let w = CandleWindow::new(60, &[2, 3]);
        assert!(w.is_empty());
        assert_eq!(w.latest_close(), None);
        assert_eq!(w.latest_open_time(), None);
        assert!(w.newest().is_none());
    }
}
