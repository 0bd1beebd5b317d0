// =============================================================================
// Polaris Spot Trader — Main Entry Point
// =============================================================================
//
// The bot starts in dry-run mode for safety. Live trading requires setting
// `dry_run: false` in runtime_config.json.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod api;
mod app_state;
mod execution;
mod indicators;
mod kucoin;
mod market_data;
mod runtime_config;
mod triggers;
mod types;

use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::execution::TriggerExecutor;
use crate::kucoin::KucoinClient;
use crate::market_data::SymbolUpdater;
use crate::runtime_config::RuntimeConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║        Polaris Spot Trader — Starting Up                ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let mut config = RuntimeConfig::load("runtime_config.json").unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        RuntimeConfig::default()
    });

    // Override symbols from env if available.
    if let Ok(syms) = std::env::var("POLARIS_SYMBOLS") {
        config.symbols = syms
            .split(',')
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect();
    }

    config.validate()?;

    info!(symbols = ?config.symbols, dry_run = config.dry_run, "Configured trading pairs");
    if config.dry_run {
        info!("Dry-run mode: triggers will be simulated, no orders will be placed");
    } else {
        warn!("LIVE trading mode enabled");
    }

    // ── 2. Build shared state ────────────────────────────────────────────
    let sandbox = config.sandbox;
    let state = Arc::new(AppState::new(config));

    // ── 3. Build KuCoin client ───────────────────────────────────────────
    let api_key = std::env::var("KUCOIN_API_KEY").unwrap_or_default();
    let api_secret = std::env::var("KUCOIN_API_SECRET").unwrap_or_default();
    let api_passphrase = std::env::var("KUCOIN_API_PASSPHRASE").unwrap_or_default();
    let client = Arc::new(KucoinClient::new(
        api_key,
        api_secret,
        api_passphrase,
        sandbox,
    ));

    let symbols = state.runtime_config.read().symbols.clone();

    // ── 4. Load symbol rules ─────────────────────────────────────────────
    match client.get_symbols(&symbols).await {
        Ok(rules) => {
            let mut map = state.symbol_rules.write();
            for r in rules {
                map.insert(r.symbol.clone(), r);
            }
            info!(count = map.len(), "symbol rules loaded");
        }
        Err(e) => {
            warn!(error = %e, "failed to load symbol rules; orders will be skipped");
            state.push_error(format!("symbol rules load failed: {e}"));
        }
    }

    // ── 5. Spawn the ticker stream ───────────────────────────────────────
    {
        let client = client.clone();
        let book = state.ticker_book.clone();
        let syms = symbols.clone();
        tokio::spawn(async move {
            loop {
                if let Err(e) =
                    kucoin::run_ticker_stream(client.clone(), &syms, book.clone()).await
                {
                    error!(error = %e, "Ticker stream error — reconnecting in 5s");
                }
                tokio::time::sleep(tokio::time::Duration::from_secs(5)).await;
            }
        });
    }

    // ── 6. Spawn per-symbol updaters ─────────────────────────────────────
    let signal_mas = state.runtime_config.read().signal_mas.clone();
    for symbol in &symbols {
        let handle = match state.markets.get(symbol) {
            Some(h) => h.clone(),
            None => continue,
        };
        let updater = SymbolUpdater::new(
            symbol.clone(),
            handle.settings.clone(),
            signal_mas.clone(),
            client.clone(),
            handle.market.clone(),
            handle.phase.clone(),
            state.triggers.clone(),
            handle.stop.clone(),
            state.stop_all.clone(),
        )?;
        tokio::spawn(updater.run());
    }
    info!(count = symbols.len(), "symbol updaters launched");

    // ── 7. Account reconcile loop (every 60s) ────────────────────────────
    {
        let client = client.clone();
        let state = state.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(60));
            loop {
                interval.tick().await;
                match client.get_accounts().await {
                    Ok(accounts) => {
                        *state.balances.write() = accounts;
                    }
                    Err(e) => {
                        warn!(error = %e, "account reconcile failed");
                        state.push_error(format!("account reconcile failed: {e}"));
                    }
                }
            }
        });
    }

    // ── 8. Start the API server ──────────────────────────────────────────
    {
        let api_state = state.clone();
        let bind_addr =
            std::env::var("POLARIS_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3001".into());
        tokio::spawn(async move {
            let app = api::rest::router(api_state);
            let listener = tokio::net::TcpListener::bind(&bind_addr)
                .await
                .expect("Failed to bind API server");
            info!(addr = %bind_addr, "API server listening");
            axum::serve(listener, app).await.expect("API server failed");
        });
    }

    // ── 9. Trigger drain loop ────────────────────────────────────────────
    {
        let state = state.clone();
        let client = client.clone();
        tokio::spawn(async move {
            let drain_interval = state.runtime_config.read().drain_interval_secs;
            let mut interval =
                tokio::time::interval(tokio::time::Duration::from_secs(drain_interval.max(1)));
            loop {
                interval.tick().await;

                let triggers = state.triggers.drain();
                if triggers.is_empty() {
                    continue;
                }
                info!(count = triggers.len(), "draining trigger queue");

                let dry_run = state.runtime_config.read().dry_run;
                for trigger in triggers {
                    let executor = TriggerExecutor::new(
                        client.clone(),
                        state.symbol_rules.clone(),
                        state.ticker_book.clone(),
                        dry_run,
                    );
                    let settings = state.runtime_config.read().settings_for(&trigger.symbol);
                    let state = state.clone();
                    tokio::spawn(async move {
                        let result = executor.execute(&trigger, &settings).await;
                        info!(
                            symbol = %trigger.symbol,
                            side = %trigger.side,
                            result = %result,
                            "trigger handled"
                        );
                        if let crate::execution::ExecutionResult::Error(e) = result {
                            state.push_error(format!("{}: {e}", trigger.symbol));
                        }
                    });
                }
            }
        });
    }

    // ── 10. Run until shutdown ───────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    state.request_stop_all();

    let config = state.runtime_config.read().clone();
    if let Err(e) = config.save("runtime_config.json") {
        warn!(error = %e, "failed to save config on shutdown");
    }

    info!("Polaris Spot Trader stopped");
    Ok(())
}
