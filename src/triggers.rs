// =============================================================================
// Trading Triggers — process-wide queue with an atomic drain contract
// =============================================================================
//
// Symbol updater tasks append; the main loop drains. `drain` swaps the whole
// backlog for an empty one under the lock, so a trigger is delivered to
// exactly one drain regardless of how appends interleave with it.
// =============================================================================

use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use uuid::Uuid;

use crate::market_data::Direction;
use crate::types::{MaKind, Side};

/// What produced a trigger. Only MA crossovers exist today; the enum keeps
/// the wire shape stable if more strategies are added.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING-KEBAB-CASE")]
pub enum TriggerKind {
    MaCrossover,
}

impl std::fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MaCrossover => write!(f, "MA-CROSSOVER"),
        }
    }
}

/// A one-shot trading signal, consumed exactly once by the executor.
#[derive(Debug, Clone, Serialize)]
pub struct Trigger {
    pub id: Uuid,
    pub symbol: String,
    pub kind: TriggerKind,
    pub side: Side,
    pub ma_kind: MaKind,
    /// Close of the candle the crossover was detected on.
    pub price: f64,
    pub created_at: String,
}

impl Trigger {
    /// Build a crossover trigger. A bullish cross buys, a bearish one sells.
    pub fn ma_crossover(symbol: &str, direction: Direction, ma_kind: MaKind, price: f64) -> Self {
        let side = match direction {
            Direction::Bullish => Side::Buy,
            Direction::Bearish => Side::Sell,
        };
        Self {
            id: Uuid::new_v4(),
            symbol: symbol.to_string(),
            kind: TriggerKind::MaCrossover,
            side,
            ma_kind,
            price,
            created_at: Utc::now().to_rfc3339(),
        }
    }
}

/// Shared pending-trigger buffer.
#[derive(Default)]
pub struct TriggerQueue {
    pending: Mutex<Vec<Trigger>>,
}

impl TriggerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a trigger (producer side, one call per detection).
    pub fn push(&self, trigger: Trigger) {
        self.pending.lock().push(trigger);
    }

    /// Atomically take the entire backlog, leaving the queue empty.
    pub fn drain(&self) -> Vec<Trigger> {
        std::mem::take(&mut *self.pending.lock())
    }

    /// Number of triggers currently waiting.
    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn trigger(symbol: &str) -> Trigger {
        Trigger::ma_crossover(symbol, Direction::Bullish, MaKind::Ema, 100.0)
    }

    #[test]
    fn drain_returns_and_clears() {
        let q = TriggerQueue::new();
        q.push(trigger("BTC-USDT"));
        q.push(trigger("ETH-USDT"));
        assert_eq!(q.len(), 2);

        let drained = q.drain();
        assert_eq!(drained.len(), 2);
        assert!(q.is_empty());
        assert!(q.drain().is_empty());
    }

    #[test]
    fn bullish_maps_to_buy_bearish_to_sell() {
        let buy = Trigger::ma_crossover("BTC-USDT", Direction::Bullish, MaKind::Sma, 1.0);
        assert_eq!(buy.side, Side::Buy);
        let sell = Trigger::ma_crossover("BTC-USDT", Direction::Bearish, MaKind::Sma, 1.0);
        assert_eq!(sell.side, Side::Sell);
        assert_ne!(buy.id, sell.id);
    }

    #[test]
    fn concurrent_pushes_and_drains_lose_nothing() {
        let q = Arc::new(TriggerQueue::new());
        let producers = 8;
        let per_producer = 200;

        let mut handles = Vec::new();
        for p in 0..producers {
            let q = q.clone();
            handles.push(std::thread::spawn(move || {
                for _ in 0..per_producer {
                    q.push(trigger(&format!("SYM{p}-USDT")));
                }
            }));
        }

        // Drain concurrently while producers are running.
        let drainer = {
            let q = q.clone();
            std::thread::spawn(move || {
                let mut seen = Vec::new();
                for _ in 0..50 {
                    seen.extend(q.drain());
                    std::thread::yield_now();
                }
                seen
            })
        };

        for h in handles {
            h.join().unwrap();
        }
        let mut seen = drainer.join().unwrap();
        seen.extend(q.drain());

        assert_eq!(seen.len(), producers * per_producer);
        // Every trigger id is delivered exactly once.
        let mut ids: Vec<_> = seen.iter().map(|t| t.id).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), producers * per_producer);
    }
}
