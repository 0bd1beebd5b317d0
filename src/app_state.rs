// =============================================================================
// Central Application State — Polaris Spot Trader
// =============================================================================
//
// The single source of truth for the running bot. Each symbol updater owns a
// handle here; the trigger queue, ticker book, and account balances are
// shared through it; the status API reads everything via one snapshot.
//
// Thread safety:
//   - parking_lot::RwLock for all mutable shared collections.
//   - AtomicBool stop flags, one global and one per symbol.
// =============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;
use tracing::info;

use crate::kucoin::{SymbolRules, TickerBook, TickerQuote};
use crate::market_data::{Direction, SymbolMarket, UpdaterPhase};
use crate::runtime_config::{RuntimeConfig, SymbolSettings};
use crate::triggers::TriggerQueue;
use crate::types::{AccountBalance, MaKind};

/// Maximum number of recent errors to retain.
const MAX_RECENT_ERRORS: usize = 50;

// =============================================================================
// Error Record
// =============================================================================

/// A recorded error event for the status API.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    pub message: String,
    /// ISO 8601 timestamp.
    pub at: String,
}

// =============================================================================
// SymbolHandle
// =============================================================================

/// Shared handles to one symbol's updater task and market state.
#[derive(Clone)]
pub struct SymbolHandle {
    pub market: Arc<RwLock<SymbolMarket>>,
    pub phase: Arc<RwLock<UpdaterPhase>>,
    pub stop: Arc<AtomicBool>,
    pub settings: SymbolSettings,
}

impl SymbolHandle {
    pub fn new(settings: SymbolSettings) -> Self {
        let period_secs = settings.candle_period.seconds();
        let periods = settings.ma_periods();
        Self {
            market: Arc::new(RwLock::new(SymbolMarket::new(period_secs, &periods))),
            phase: Arc::new(RwLock::new(UpdaterPhase::Idle)),
            stop: Arc::new(AtomicBool::new(false)),
            settings,
        }
    }
}

// =============================================================================
// AppState
// =============================================================================

/// Central application state shared across all async tasks via `Arc<AppState>`.
pub struct AppState {
    pub runtime_config: Arc<RwLock<RuntimeConfig>>,
    pub markets: HashMap<String, SymbolHandle>,
    pub triggers: Arc<TriggerQueue>,
    pub ticker_book: Arc<TickerBook>,
    pub symbol_rules: Arc<RwLock<HashMap<String, SymbolRules>>>,
    pub balances: RwLock<Vec<AccountBalance>>,
    pub recent_errors: RwLock<Vec<ErrorRecord>>,
    pub stop_all: Arc<AtomicBool>,
    /// Instant the bot started, for uptime reporting.
    pub start_time: std::time::Instant,
}

impl AppState {
    /// Construct state for the configured symbols. Typically wrapped in
    /// `Arc` immediately.
    pub fn new(config: RuntimeConfig) -> Self {
        let markets = config
            .symbols
            .iter()
            .map(|s| (s.clone(), SymbolHandle::new(config.settings_for(s))))
            .collect();

        Self {
            runtime_config: Arc::new(RwLock::new(config)),
            markets,
            triggers: Arc::new(TriggerQueue::new()),
            ticker_book: Arc::new(TickerBook::new()),
            symbol_rules: Arc::new(RwLock::new(HashMap::new())),
            balances: RwLock::new(Vec::new()),
            recent_errors: RwLock::new(Vec::new()),
            stop_all: Arc::new(AtomicBool::new(false)),
            start_time: std::time::Instant::now(),
        }
    }

    // ── Stop control ────────────────────────────────────────────────────

    /// Signal every updater to stop at its next loop top.
    pub fn request_stop_all(&self) {
        info!("stop requested for all symbols");
        self.stop_all.store(true, Ordering::Relaxed);
    }

    /// Signal one symbol's updater to stop. Returns false for an unknown
    /// symbol.
    pub fn request_stop(&self, symbol: &str) -> bool {
        match self.markets.get(symbol) {
            Some(handle) => {
                info!(symbol, "stop requested");
                handle.stop.store(true, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    // ── Error logging ───────────────────────────────────────────────────

    /// Record an error message in the capped ring buffer.
    pub fn push_error(&self, msg: String) {
        let mut errors = self.recent_errors.write();
        errors.push(ErrorRecord {
            message: msg,
            at: Utc::now().to_rfc3339(),
        });
        while errors.len() > MAX_RECENT_ERRORS {
            errors.remove(0);
        }
    }

    // ── Account valuation ───────────────────────────────────────────────

    /// Total trade-account value in USDT, pricing each currency at the
    /// ticker best bid. Currencies without a quote are skipped.
    pub fn total_account_value(&self) -> f64 {
        let balances = self.balances.read();
        balances
            .iter()
            .filter(|b| b.account_type == "trade")
            .filter_map(|b| {
                if b.currency == "USDT" {
                    Some(b.balance)
                } else {
                    self.ticker_book
                        .best_bid(&format!("{}-USDT", b.currency))
                        .map(|bid| b.balance * bid)
                }
            })
            .sum()
    }

    // ── Snapshot builder ────────────────────────────────────────────────

    /// Build the serialisable status payload for `GET /api/v1/status`.
    pub fn build_status_snapshot(&self) -> StatusSnapshot {
        let config = self.runtime_config.read();

        let symbols = self
            .markets
            .iter()
            .map(|(symbol, handle)| {
                let market = handle.market.read();
                let crossovers = config
                    .signal_mas
                    .iter()
                    .map(|&kind| {
                        let (direction, first_occurrence) = market.latest_crossover(kind);
                        (
                            kind,
                            CrossoverSnapshot {
                                direction,
                                first_occurrence,
                            },
                        )
                    })
                    .collect();

                let status = SymbolStatus {
                    phase: *handle.phase.read(),
                    window_len: market.window.len(),
                    latest_open_time: market.window.latest_open_time(),
                    latest_close: market.latest_close(),
                    sma: market.latest_ma(MaKind::Sma),
                    ema: market.latest_ma(MaKind::Ema),
                    crossovers,
                    ticker: self.ticker_book.get(symbol),
                };
                (symbol.clone(), status)
            })
            .collect();

        StatusSnapshot {
            server_time: Utc::now().timestamp_millis(),
            uptime_secs: self.start_time.elapsed().as_secs(),
            dry_run: config.dry_run,
            stopping: self.stop_all.load(Ordering::Relaxed),
            pending_triggers: self.triggers.len(),
            total_account_value: self.total_account_value(),
            symbols,
            balances: self.balances.read().clone(),
            recent_errors: self.recent_errors.read().clone(),
        }
    }
}

// =============================================================================
// Serialisable snapshot types
// =============================================================================

/// Full bot status sent to `GET /api/v1/status`.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub server_time: i64,
    pub uptime_secs: u64,
    pub dry_run: bool,
    pub stopping: bool,
    pub pending_triggers: usize,
    pub total_account_value: f64,
    pub symbols: HashMap<String, SymbolStatus>,
    pub balances: Vec<AccountBalance>,
    pub recent_errors: Vec<ErrorRecord>,
}

/// Per-symbol status: updater phase, window view, latest MAs and crossover.
#[derive(Debug, Clone, Serialize)]
pub struct SymbolStatus {
    pub phase: UpdaterPhase,
    pub window_len: usize,
    pub latest_open_time: Option<i64>,
    pub latest_close: Option<f64>,
    pub sma: Vec<Option<f64>>,
    pub ema: Vec<Option<f64>>,
    pub crossovers: HashMap<MaKind, CrossoverSnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ticker: Option<TickerQuote>,
}

/// Latest crossover detection result for one MA kind.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct CrossoverSnapshot {
    pub direction: Option<Direction>,
    pub first_occurrence: Option<bool>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> AppState {
        AppState::new(RuntimeConfig::default())
    }

    #[test]
    fn creates_one_handle_per_symbol() {
        let s = state();
        assert_eq!(s.markets.len(), 5);
        assert!(s.markets.contains_key("BTC-USDT"));
    }

    #[test]
    fn stop_flags_are_independent() {
        let s = state();
        assert!(s.request_stop("BTC-USDT"));
        assert!(s.markets["BTC-USDT"].stop.load(Ordering::Relaxed));
        assert!(!s.markets["ETH-USDT"].stop.load(Ordering::Relaxed));
        assert!(!s.request_stop("XRP-USDT"));

        s.request_stop_all();
        assert!(s.stop_all.load(Ordering::Relaxed));
    }

    #[test]
    fn total_value_prices_at_best_bid() {
        let s = state();
        *s.balances.write() = vec![
            AccountBalance {
                currency: "USDT".to_string(),
                account_type: "trade".to_string(),
                balance: 100.0,
                available: 100.0,
                holds: 0.0,
            },
            AccountBalance {
                currency: "BTC".to_string(),
                account_type: "trade".to_string(),
                balance: 0.5,
                available: 0.5,
                holds: 0.0,
            },
            // Main-account rows are excluded from the trade valuation.
            AccountBalance {
                currency: "USDT".to_string(),
                account_type: "main".to_string(),
                balance: 999.0,
                available: 999.0,
                holds: 0.0,
            },
        ];
        s.ticker_book.update(
            "BTC-USDT",
            TickerQuote {
                best_bid: 20_000.0,
                best_ask: 20_000.2,
                last_price: 20_000.1,
                time_ms: 0,
            },
        );

        assert!((s.total_account_value() - 10_100.0).abs() < 1e-9);
    }

    #[test]
    fn unpriced_currency_is_skipped() {
        let s = state();
        *s.balances.write() = vec![AccountBalance {
            currency: "KCS".to_string(),
            account_type: "trade".to_string(),
            balance: 50.0,
            available: 50.0,
            holds: 0.0,
        }];
        assert!(s.total_account_value().abs() < f64::EPSILON);
    }

    #[test]
    fn error_log_is_capped() {
        let s = state();
        for i in 0..60 {
            s.push_error(format!("error {i}"));
        }
        let errors = s.recent_errors.read();
        assert_eq!(errors.len(), MAX_RECENT_ERRORS);
        assert_eq!(errors.last().unwrap().message, "error 59");
    }

    #[test]
    fn snapshot_covers_every_symbol() {
        let s = state();
        let snap = s.build_status_snapshot();
        assert!(snap.dry_run);
        assert_eq!(snap.symbols.len(), 5);
        let btc = &snap.symbols["BTC-USDT"];
        assert_eq!(btc.phase, UpdaterPhase::Idle);
        assert_eq!(btc.window_len, 0);
        assert!(btc.latest_close.is_none());
        assert!(btc.crossovers.contains_key(&MaKind::Ema));
    }
}
