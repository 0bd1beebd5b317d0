// =============================================================================
// Symbol Updater — per-symbol refresh loop driving the indicator pipeline
// =============================================================================
//
// One updater task per symbol. Each tick it works out how many candles the
// window is behind, fetches them (with a single corrected re-fetch when the
// source comes up short), feeds the window and indicator engine, runs
// crossover detection per configured MA kind, and enqueues a trigger for
// every first occurrence. It then sleeps 0.75 of a candle period: sub-period
// polling keeps detection latency low without hammering the source every
// bucket.
//
// A transient fetch failure abandons the tick without touching the window;
// the loop resumes on its normal schedule, so failures never tighten into a
// retry storm.
// =============================================================================

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::indicators::IndicatorEngine;
use crate::market_data::{crossover, Candle, SymbolMarket};
use crate::runtime_config::SymbolSettings;
use crate::triggers::{Trigger, TriggerQueue};
use crate::types::{CandlePeriod, MaKind};

/// Source of historical candles. Implemented by the KuCoin REST client;
/// mocked in tests.
///
/// Returns candles newest-first, possibly fewer than the span implied by
/// `start`.
#[async_trait]
pub trait CandleSource: Send + Sync {
    async fn fetch_candles(
        &self,
        symbol: &str,
        period: CandlePeriod,
        start: Option<i64>,
    ) -> Result<Vec<Candle>>;
}

/// What the updater loop is currently doing, published for the status API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdaterPhase {
    Idle,
    Refreshing,
    Stopped,
}

impl std::fmt::Display for UpdaterPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Refreshing => write!(f, "refreshing"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Per-symbol scheduling loop. Owns the only mutable access to its symbol's
/// [`SymbolMarket`]; everything else reads through the shared lock.
pub struct SymbolUpdater<S: CandleSource> {
    symbol: String,
    settings: SymbolSettings,
    signal_mas: Vec<MaKind>,
    engine: IndicatorEngine,
    source: Arc<S>,
    market: Arc<RwLock<SymbolMarket>>,
    phase: Arc<RwLock<UpdaterPhase>>,
    triggers: Arc<TriggerQueue>,
    stop: Arc<AtomicBool>,
    stop_all: Arc<AtomicBool>,
}

impl<S: CandleSource> SymbolUpdater<S> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        symbol: String,
        settings: SymbolSettings,
        signal_mas: Vec<MaKind>,
        source: Arc<S>,
        market: Arc<RwLock<SymbolMarket>>,
        phase: Arc<RwLock<UpdaterPhase>>,
        triggers: Arc<TriggerQueue>,
        stop: Arc<AtomicBool>,
        stop_all: Arc<AtomicBool>,
    ) -> Result<Self> {
        let engine = IndicatorEngine::new(settings.ma_periods())?;
        Ok(Self {
            symbol,
            settings,
            signal_mas,
            engine,
            source,
            market,
            phase,
            triggers,
            stop,
            stop_all,
        })
    }

    /// Run the refresh loop until a stop flag is observed at loop top.
    pub async fn run(self) {
        let period_secs = self.settings.candle_period.seconds();
        let tick = std::time::Duration::from_secs_f64(period_secs as f64 * 0.75);
        info!(symbol = %self.symbol, period = %self.settings.candle_period, "symbol updater started");

        loop {
            if self.should_stop() {
                break;
            }

            *self.phase.write() = UpdaterPhase::Refreshing;
            match self.refresh_once(Utc::now().timestamp()).await {
                Ok(accepted) if accepted > 0 => {
                    debug!(symbol = %self.symbol, accepted, "window refreshed");
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(symbol = %self.symbol, error = %e, "refresh tick abandoned");
                }
            }
            *self.phase.write() = UpdaterPhase::Idle;

            tokio::time::sleep(tick).await;
        }

        *self.phase.write() = UpdaterPhase::Stopped;
        info!(symbol = %self.symbol, "symbol updater stopped");
    }

    fn should_stop(&self) -> bool {
        self.stop.load(Ordering::Relaxed) || self.stop_all.load(Ordering::Relaxed)
    }

    /// One refresh tick: fetch what the window is behind, ingest, annotate,
    /// detect, enqueue. Returns the number of candles accepted.
    ///
    /// A fetch error leaves the window completely untouched.
    pub async fn refresh_once(&self, now: i64) -> Result<usize> {
        let needed = self.candles_needed(now);
        if needed == 0 {
            return Ok(0);
        }

        let batch = self.fetch_with_top_up(needed, now).await?;
        if batch.is_empty() {
            return Ok(0);
        }

        let mut guard = self.market.write();
        let market = &mut *guard;
        let accepted = market.window.ingest(&batch);
        if accepted == 0 {
            return Ok(0);
        }
        self.engine.annotate(&mut market.window, accepted);

        for &kind in &self.signal_mas {
            let result = crossover::detect(&market.window, kind, &mut market.dedupe);
            market.record_crossover(kind, result);

            if let (Some(direction), Some(true)) = result {
                let price = market.window.latest_close().unwrap_or_default();
                info!(
                    symbol = %self.symbol,
                    ma = %kind,
                    direction = %direction,
                    price,
                    "crossover detected"
                );
                self.triggers
                    .push(Trigger::ma_crossover(&self.symbol, direction, kind, price));
            }
        }

        Ok(accepted)
    }

    /// Candles the window is behind at `now`: the full history on first
    /// fill, otherwise the number of whole periods elapsed since the newest
    /// candle. Clamped to the window capacity.
    fn candles_needed(&self, now: i64) -> usize {
        let market = self.market.read();
        let max_history = market.window.max_history();
        match market.window.latest_open_time() {
            None => max_history,
            Some(latest) => {
                let elapsed = (now - latest).max(0);
                let behind = (elapsed / self.settings.candle_period.seconds()) as usize;
                behind.min(max_history)
            }
        }
    }

    /// Fetch `needed` candles ending at `now`. When the source returns fewer
    /// than requested, re-fetch exactly once with the start re-anchored to
    /// the newest candle it did return, then proceed with whatever came back.
    async fn fetch_with_top_up(&self, needed: usize, now: i64) -> Result<Vec<Candle>> {
        let period = self.settings.candle_period;
        let span = needed as i64 * period.seconds();

        let mut batch = self
            .source
            .fetch_candles(&self.symbol, period, Some(now - span))
            .await?;

        if batch.len() < needed {
            let corrected = batch.first().map(|newest| newest.open_time - span);
            debug!(
                symbol = %self.symbol,
                got = batch.len(),
                needed,
                ?corrected,
                "short fetch; re-requesting with corrected start"
            );
            batch = self
                .source
                .fetch_candles(&self.symbol, period, corrected)
                .await?;
        }

        batch.truncate(needed);
        Ok(batch)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
