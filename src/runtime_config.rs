// =============================================================================
// Runtime Configuration — JSON settings with atomic save
// =============================================================================
//
// Every tunable parameter of the bot lives here. Persistence uses an atomic
// tmp + rename pattern to prevent corruption on crash, and all fields carry
// `#[serde(default)]` so that adding new fields never breaks loading an
// older config file.
//
// Validation runs once at startup and fails fast: a bad MA period or an
// empty symbol list must never surface as a per-tick runtime error.
// =============================================================================

use std::collections::HashMap;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::types::{CandlePeriod, MaKind};

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_true() -> bool {
    true
}

fn default_symbols() -> Vec<String> {
    vec![
        "BTC-USDT".to_string(),
        "ETH-USDT".to_string(),
        "KCS-USDT".to_string(),
        "DOT-USDT".to_string(),
        "ADA-USDT".to_string(),
    ]
}

fn default_signal_mas() -> Vec<MaKind> {
    vec![MaKind::Ema]
}

fn default_drain_interval_secs() -> u64 {
    12
}

fn default_fast_ma_period() -> usize {
    20
}

fn default_slow_ma_period() -> usize {
    50
}

fn default_transact_funds() -> f64 {
    5.0
}

fn default_sell_to_buy_ratio() -> f64 {
    4.0
}

fn default_take_profit_pct() -> f64 {
    10.0
}

// =============================================================================
// SymbolSettings
// =============================================================================

/// Per-symbol strategy parameters. A symbol without an override uses
/// [`RuntimeConfig::defaults`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolSettings {
    /// Fast moving-average look-back, in candles.
    #[serde(default = "default_fast_ma_period")]
    pub fast_ma_period: usize,

    /// Slow moving-average look-back, in candles. Must exceed the fast one.
    #[serde(default = "default_slow_ma_period")]
    pub slow_ma_period: usize,

    /// Candle bucket size used for the MA calculation.
    #[serde(default)]
    pub candle_period: CandlePeriod,

    /// Quote-currency funds committed per buy trigger.
    #[serde(default = "default_transact_funds")]
    pub transact_funds: f64,

    /// Sell triggers attempt to sell up to this multiple of
    /// `transact_funds`.
    #[serde(default = "default_sell_to_buy_ratio")]
    pub sell_to_buy_ratio: f64,

    /// Take-profit limit sell placed this percentage above the fill price.
    #[serde(default = "default_take_profit_pct")]
    pub take_profit_pct: f64,
}

impl Default for SymbolSettings {
    fn default() -> Self {
        Self {
            fast_ma_period: default_fast_ma_period(),
            slow_ma_period: default_slow_ma_period(),
            candle_period: CandlePeriod::default(),
            transact_funds: default_transact_funds(),
            sell_to_buy_ratio: default_sell_to_buy_ratio(),
            take_profit_pct: default_take_profit_pct(),
        }
    }
}

impl SymbolSettings {
    /// MA periods in fast-to-slow order, as the indicator engine expects.
    pub fn ma_periods(&self) -> Vec<usize> {
        vec![self.fast_ma_period, self.slow_ma_period]
    }
}

// =============================================================================
// RuntimeConfig
// =============================================================================

/// Top-level runtime configuration for the Polaris bot.
///
/// Every field has a serde default so that older JSON files missing new
/// fields will still deserialise correctly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Symbols the bot watches and trades, KuCoin format (`BTC-USDT`).
    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,

    /// MA families whose crossovers produce triggers.
    #[serde(default = "default_signal_mas")]
    pub signal_mas: Vec<MaKind>,

    /// Seconds between trigger-queue drains in the main loop.
    #[serde(default = "default_drain_interval_secs")]
    pub drain_interval_secs: u64,

    /// When true, triggers are logged and simulated; no order leaves the
    /// process. Defaults to true so a fresh install cannot trade.
    #[serde(default = "default_true")]
    pub dry_run: bool,

    /// Use the KuCoin sandbox base URL.
    #[serde(default)]
    pub sandbox: bool,

    /// Settings applied to symbols without an explicit override.
    #[serde(default)]
    pub defaults: SymbolSettings,

    /// Per-symbol overrides keyed by symbol.
    #[serde(default)]
    pub symbol_settings: HashMap<String, SymbolSettings>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            symbols: default_symbols(),
            signal_mas: default_signal_mas(),
            drain_interval_secs: default_drain_interval_secs(),
            dry_run: true,
            sandbox: false,
            defaults: SymbolSettings::default(),
            symbol_settings: HashMap::new(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read runtime config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse runtime config from {}", path.display()))?;

        info!(
            path = %path.display(),
            symbols = ?config.symbols,
            dry_run = config.dry_run,
            "runtime config loaded"
        );

        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = serde_json::to_string_pretty(self)
            .context("failed to serialise runtime config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "runtime config saved (atomic)");
        Ok(())
    }

    /// Effective settings for `symbol`: the explicit override when present,
    /// otherwise [`defaults`](Self::defaults).
    pub fn settings_for(&self, symbol: &str) -> SymbolSettings {
        self.symbol_settings
            .get(symbol)
            .cloned()
            .unwrap_or_else(|| self.defaults.clone())
    }

    /// Reject configurations that would otherwise fail somewhere deep in a
    /// refresh tick.
    pub fn validate(&self) -> Result<()> {
        if self.symbols.is_empty() {
            bail!("no symbols configured");
        }
        if self.signal_mas.is_empty() {
            bail!("signal_mas is empty: no MA kind would ever produce a trigger");
        }
        for symbol in &self.symbols {
            let s = self.settings_for(symbol);
            if s.fast_ma_period == 0 || s.slow_ma_period == 0 {
                bail!("{symbol}: MA periods must be >= 1");
            }
            if s.fast_ma_period >= s.slow_ma_period {
                bail!(
                    "{symbol}: fast MA period ({}) must be less than slow ({})",
                    s.fast_ma_period,
                    s.slow_ma_period
                );
            }
            if s.transact_funds <= 0.0 {
                bail!("{symbol}: transact_funds must be positive");
            }
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.symbols.len(), 5);
        assert_eq!(cfg.symbols[0], "BTC-USDT");
        assert_eq!(cfg.signal_mas, vec![MaKind::Ema]);
        assert_eq!(cfg.drain_interval_secs, 12);
        assert!(cfg.dry_run);
        assert!(!cfg.sandbox);
        assert_eq!(cfg.defaults.fast_ma_period, 20);
        assert_eq!(cfg.defaults.slow_ma_period, 50);
        assert_eq!(cfg.defaults.candle_period, CandlePeriod::Min1);
        assert!((cfg.defaults.transact_funds - 5.0).abs() < f64::EPSILON);
        assert!((cfg.defaults.sell_to_buy_ratio - 4.0).abs() < f64::EPSILON);
        assert!((cfg.defaults.take_profit_pct - 10.0).abs() < f64::EPSILON);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn deserialise_empty_json_uses_defaults() {
        let cfg: RuntimeConfig = serde_json::from_str("{}").unwrap();
        assert!(cfg.dry_run);
        assert_eq!(cfg.drain_interval_secs, 12);
        assert_eq!(cfg.signal_mas, vec![MaKind::Ema]);
    }

    #[test]
    fn deserialise_partial_json_fills_defaults() {
        let json = r#"{
            "symbols": ["ETH-USDT"],
            "symbol_settings": {
                "ETH-USDT": { "fast_ma_period": 10, "candle_period": "15min" }
            }
        }"#;
        let cfg: RuntimeConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.symbols, vec!["ETH-USDT"]);

        let s = cfg.settings_for("ETH-USDT");
        assert_eq!(s.fast_ma_period, 10);
        assert_eq!(s.slow_ma_period, 50);
        assert_eq!(s.candle_period, CandlePeriod::Min15);
    }

    #[test]
    fn settings_for_falls_back_to_defaults() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.settings_for("XRP-USDT"), cfg.defaults);
    }

    #[test]
    fn roundtrip_serialisation() {
        let cfg = RuntimeConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let cfg2: RuntimeConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg.symbols, cfg2.symbols);
        assert_eq!(cfg.drain_interval_secs, cfg2.drain_interval_secs);
        assert_eq!(cfg.defaults, cfg2.defaults);
    }

    #[test]
    fn validate_rejects_empty_symbols() {
        let cfg = RuntimeConfig {
            symbols: vec![],
            ..RuntimeConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_empty_signal_mas() {
        let cfg = RuntimeConfig {
            signal_mas: vec![],
            ..RuntimeConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_inverted_periods() {
        let mut cfg = RuntimeConfig::default();
        cfg.symbol_settings.insert(
            "BTC-USDT".to_string(),
            SymbolSettings {
                fast_ma_period: 50,
                slow_ma_period: 20,
                ..SymbolSettings::default()
            },
        );
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_period_and_funds() {
        let mut cfg = RuntimeConfig::default();
        cfg.symbol_settings.insert(
            "BTC-USDT".to_string(),
            SymbolSettings {
                fast_ma_period: 0,
                ..SymbolSettings::default()
            },
        );
        assert!(cfg.validate().is_err());

        let mut cfg = RuntimeConfig::default();
        cfg.symbol_settings.insert(
            "BTC-USDT".to_string(),
            SymbolSettings {
                transact_funds: 0.0,
                ..SymbolSettings::default()
            },
        );
        assert!(cfg.validate().is_err());
    }
}
