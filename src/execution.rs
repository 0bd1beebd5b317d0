// =============================================================================
// Trigger Executor — turns crossover triggers into KuCoin orders, with full
// dry-run simulation support
// =============================================================================
//
// A bearish trigger cancels the symbol's working orders and market-sells a
// multiple of the configured buy amount. A bullish trigger market-buys, waits
// for the fill to settle, clears working orders, and parks a take-profit
// limit sell above the current ticker price sized from the fresh base
// balance.
//
// In dry-run mode (the default) every leg is logged and simulated; no request
// leaves the process.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::kucoin::{KucoinClient, SymbolRules, TickerBook};
use crate::runtime_config::SymbolSettings;
use crate::triggers::Trigger;
use crate::types::Side;

/// Settling time between a market buy and the take-profit placement, so the
/// bought balance is visible to the balance query.
const FILL_SETTLE: std::time::Duration = std::time::Duration::from_secs(2);

// ---------------------------------------------------------------------------
// Result type
// ---------------------------------------------------------------------------

/// Outcome of handling one trigger.
#[derive(Debug, Clone, Serialize)]
pub enum ExecutionResult {
    /// Orders were placed on the exchange (live mode).
    Placed { order_ids: Vec<String> },
    /// Every leg was simulated locally (dry-run mode).
    Simulated(String),
    /// The trigger could not be acted on; nothing was placed.
    Skipped(String),
    /// An exchange call failed mid-sequence.
    Error(String),
}

impl std::fmt::Display for ExecutionResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Placed { order_ids } => write!(f, "Placed({})", order_ids.join(",")),
            Self::Simulated(msg) => write!(f, "Simulated({msg})"),
            Self::Skipped(reason) => write!(f, "Skipped({reason})"),
            Self::Error(err) => write!(f, "Error({err})"),
        }
    }
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

/// Ties together the KuCoin client, the symbol rules, and the ticker book to
/// act on drained triggers.
pub struct TriggerExecutor {
    client: Arc<KucoinClient>,
    rules: Arc<RwLock<HashMap<String, SymbolRules>>>,
    ticker: Arc<TickerBook>,
    dry_run: bool,
}

impl TriggerExecutor {
    pub fn new(
        client: Arc<KucoinClient>,
        rules: Arc<RwLock<HashMap<String, SymbolRules>>>,
        ticker: Arc<TickerBook>,
        dry_run: bool,
    ) -> Self {
        Self {
            client,
            rules,
            ticker,
            dry_run,
        }
    }

    /// Act on one trigger with the symbol's effective settings.
    pub async fn execute(&self, trigger: &Trigger, settings: &SymbolSettings) -> ExecutionResult {
        info!(
            symbol = %trigger.symbol,
            kind = %trigger.kind,
            side = %trigger.side,
            ma = %trigger.ma_kind,
            price = trigger.price,
            dry_run = self.dry_run,
            "executing trigger"
        );

        let rules = match self.rules.read().get(&trigger.symbol) {
            Some(r) => r.clone(),
            None => {
                let reason = format!("no symbol rules loaded for {}", trigger.symbol);
                warn!(symbol = %trigger.symbol, "{reason}");
                return ExecutionResult::Skipped(reason);
            }
        };

        let result = match trigger.side {
            Side::Sell => self.execute_sell(trigger, settings, &rules).await,
            Side::Buy => self.execute_buy(trigger, settings, &rules).await,
        };

        match result {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(symbol = %trigger.symbol, error = %e, "trigger execution failed");
                ExecutionResult::Error(e.to_string())
            }
        }
    }

    // -------------------------------------------------------------------------
    // Sell leg
    // -------------------------------------------------------------------------

    /// Cancel working orders, then market-sell `sell_to_buy_ratio ×
    /// transact_funds` of quote currency.
    async fn execute_sell(
        &self,
        trigger: &Trigger,
        settings: &SymbolSettings,
        rules: &SymbolRules,
    ) -> Result<ExecutionResult> {
        let funds = rules.round_funds(settings.sell_to_buy_ratio * settings.transact_funds);

        if self.dry_run {
            let msg = format!(
                "dry-run sell: cancel actives, market sell {} {} of {}",
                funds, rules.quote_currency, trigger.symbol
            );
            info!("{msg}");
            return Ok(ExecutionResult::Simulated(msg));
        }

        self.cancel_active_orders(&trigger.symbol).await?;

        let order_id = self
            .client
            .create_market_order(&trigger.symbol, Side::Sell, Some(funds), None)
            .await
            .context("market sell failed")?;
        info!(symbol = %trigger.symbol, order_id, funds, "market sell placed");

        Ok(ExecutionResult::Placed {
            order_ids: vec![order_id],
        })
    }

    // -------------------------------------------------------------------------
    // Buy leg
    // -------------------------------------------------------------------------

    /// Market-buy `transact_funds`, let the fill settle, clear working
    /// orders, then park a take-profit limit sell sized from the fresh base
    /// balance.
    async fn execute_buy(
        &self,
        trigger: &Trigger,
        settings: &SymbolSettings,
        rules: &SymbolRules,
    ) -> Result<ExecutionResult> {
        let funds = rules.round_funds(settings.transact_funds);

        let ticker_price = match self.ticker.last_price(&trigger.symbol) {
            Some(p) if p > 0.0 => p,
            _ => {
                let reason = format!("no ticker price for {}", trigger.symbol);
                warn!(symbol = %trigger.symbol, "{reason}");
                return Ok(ExecutionResult::Skipped(reason));
            }
        };
        let tp_price = rules.round_price(ticker_price * (100.0 + settings.take_profit_pct) / 100.0);

        if self.dry_run {
            let msg = format!(
                "dry-run buy: market buy {} {} of {}, take-profit sell at {}",
                funds, rules.quote_currency, trigger.symbol, tp_price
            );
            info!("{msg}");
            return Ok(ExecutionResult::Simulated(msg));
        }

        let buy_id = self
            .client
            .create_market_order(&trigger.symbol, Side::Buy, Some(funds), None)
            .await
            .context("market buy failed")?;
        info!(symbol = %trigger.symbol, order_id = %buy_id, funds, "market buy placed");

        tokio::time::sleep(FILL_SETTLE).await;
        self.cancel_active_orders(&trigger.symbol).await?;

        let size = match self.base_balance(rules).await? {
            Some(balance) if balance > 0.0 => rules.round_size(balance),
            _ => {
                warn!(symbol = %trigger.symbol, "no base balance after buy; skipping take-profit");
                return Ok(ExecutionResult::Placed {
                    order_ids: vec![buy_id],
                });
            }
        };

        let tp_id = self
            .client
            .create_limit_order(&trigger.symbol, Side::Sell, tp_price, size)
            .await
            .context("take-profit limit sell failed")?;
        info!(
            symbol = %trigger.symbol,
            order_id = %tp_id,
            price = tp_price,
            size,
            "take-profit placed"
        );

        Ok(ExecutionResult::Placed {
            order_ids: vec![buy_id, tp_id],
        })
    }

    // -------------------------------------------------------------------------
    // Helpers
    // -------------------------------------------------------------------------

    async fn cancel_active_orders(&self, symbol: &str) -> Result<()> {
        let actives = self
            .client
            .get_active_orders(symbol)
            .await
            .context("listing active orders failed")?;
        for order in actives {
            self.client
                .cancel_order(&order.id)
                .await
                .with_context(|| format!("cancelling order {} failed", order.id))?;
            debug!(symbol, order_id = %order.id, "active order cancelled");
        }
        Ok(())
    }

    /// Trade-account balance of the symbol's base currency.
    async fn base_balance(&self, rules: &SymbolRules) -> Result<Option<f64>> {
        let accounts = self.client.get_accounts().await?;
        Ok(accounts
            .iter()
            .find(|a| a.currency == rules.base_currency && a.account_type == "trade")
            .map(|a| a.balance))
    }
}

impl std::fmt::Debug for TriggerExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TriggerExecutor")
            .field("client", &"<KucoinClient>")
            .field("dry_run", &self.dry_run)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kucoin::TickerQuote;
    use crate::market_data::Direction;
    use crate::types::MaKind;

    fn rules() -> SymbolRules {
        serde_json::from_str(
            r#"{
                "symbol": "BTC-USDT",
                "baseCurrency": "BTC",
                "quoteCurrency": "USDT",
                "baseMinSize": "0.00001",
                "baseMaxSize": "10000",
                "baseIncrement": "0.00000001",
                "priceIncrement": "0.1",
                "quoteMinSize": "0.01",
                "quoteMaxSize": "99999999",
                "quoteIncrement": "0.000001"
            }"#,
        )
        .unwrap()
    }

    fn executor(dry_run: bool, with_rules: bool, with_ticker: bool) -> TriggerExecutor {
        let client = Arc::new(KucoinClient::new("k", "s", "p", true));
        let map = Arc::new(RwLock::new(HashMap::new()));
        if with_rules {
            map.write().insert("BTC-USDT".to_string(), rules());
        }
        let ticker = Arc::new(TickerBook::new());
        if with_ticker {
            ticker.update(
                "BTC-USDT",
                TickerQuote {
                    best_bid: 19_999.9,
                    best_ask: 20_000.1,
                    last_price: 20_000.0,
                    time_ms: 0,
                },
            );
        }
        TriggerExecutor::new(client, map, ticker, dry_run)
    }

    fn trigger(direction: Direction) -> Trigger {
        Trigger::ma_crossover("BTC-USDT", direction, MaKind::Ema, 20_000.0)
    }

    #[tokio::test]
    async fn dry_run_buy_simulates_with_take_profit_price() {
        let ex = executor(true, true, true);
        let result = ex
            .execute(&trigger(Direction::Bullish), &SymbolSettings::default())
            .await;
        match result {
            ExecutionResult::Simulated(msg) => {
                // 20000 * 1.10, rounded to the 0.1 price increment.
                assert!(msg.contains("22000"), "message was: {msg}");
            }
            other => panic!("expected Simulated, got {other}"),
        }
    }

    #[tokio::test]
    async fn dry_run_sell_uses_ratio_times_funds() {
        let ex = executor(true, true, true);
        let result = ex
            .execute(&trigger(Direction::Bearish), &SymbolSettings::default())
            .await;
        match result {
            // Default ratio 4 x 5 USDT.
            ExecutionResult::Simulated(msg) => assert!(msg.contains("20 USDT"), "message was: {msg}"),
            other => panic!("expected Simulated, got {other}"),
        }
    }

    #[tokio::test]
    async fn missing_rules_skips_without_network() {
        let ex = executor(false, false, true);
        let result = ex
            .execute(&trigger(Direction::Bullish), &SymbolSettings::default())
            .await;
        assert!(matches!(result, ExecutionResult::Skipped(_)));
    }

    #[tokio::test]
    async fn missing_ticker_skips_buy() {
        let ex = executor(true, true, false);
        let result = ex
            .execute(&trigger(Direction::Bullish), &SymbolSettings::default())
            .await;
        assert!(matches!(result, ExecutionResult::Skipped(_)));
    }
}
