// =============================================================================
// Symbol Rules — per-symbol order constraints and rounding
// =============================================================================
//
// KuCoin rejects orders whose price, size, or funds are not aligned to the
// symbol's increments, so every outgoing value passes through these helpers.
// Sizes truncate (never promise more base currency than we hold); prices and
// funds round to the nearest increment.
// =============================================================================

use serde::{Deserialize, Deserializer};

/// Order constraints for one symbol, as returned by `/api/v2/symbols`.
/// KuCoin encodes every decimal as a string.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolRules {
    pub symbol: String,
    pub base_currency: String,
    pub quote_currency: String,
    #[serde(deserialize_with = "de_str_f64")]
    pub base_min_size: f64,
    #[serde(deserialize_with = "de_str_f64")]
    pub base_max_size: f64,
    #[serde(deserialize_with = "de_str_f64")]
    pub base_increment: f64,
    #[serde(deserialize_with = "de_str_f64")]
    pub price_increment: f64,
    #[serde(deserialize_with = "de_str_f64")]
    pub quote_min_size: f64,
    #[serde(deserialize_with = "de_str_f64")]
    pub quote_max_size: f64,
    #[serde(deserialize_with = "de_str_f64")]
    pub quote_increment: f64,
}

/// Accept `"0.0001"` or a bare number for any decimal field.
pub(crate) fn de_str_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Str(String),
        Num(f64),
    }
    match Raw::deserialize(deserializer)? {
        Raw::Str(s) => s.parse().map_err(serde::de::Error::custom),
        Raw::Num(n) => Ok(n),
    }
}

impl SymbolRules {
    /// Round a limit price to the price increment.
    pub fn round_price(&self, price: f64) -> f64 {
        quantize(price.max(self.price_increment), self.price_increment, false)
    }

    /// Round an order size down to the base increment, clamped to the
    /// symbol's min/max size.
    pub fn round_size(&self, size: f64) -> f64 {
        let clamped = size.min(self.base_max_size).max(self.base_min_size);
        quantize(clamped, self.base_increment, true)
    }

    /// Round a funds amount to the quote increment, clamped to the symbol's
    /// min/max funds.
    pub fn round_funds(&self, funds: f64) -> f64 {
        let clamped = funds.min(self.quote_max_size).max(self.quote_min_size);
        quantize(clamped, self.quote_increment, false)
    }
}

/// Quantize `value` to the decimal precision of `increment`, truncating or
/// rounding to nearest.
fn quantize(value: f64, increment: f64, truncate: bool) -> f64 {
    let factor = 10f64.powi(decimals_of(increment) as i32);
    let scaled = value * factor;
    // Scaled values sit a hair below the intended integer after binary
    // floating-point multiplication; nudge before truncating.
    let result = if truncate {
        (scaled + 1e-9).floor()
    } else {
        scaled.round()
    };
    result / factor
}

/// Number of digits after the decimal point of an increment like 0.0001.
fn decimals_of(increment: f64) -> u32 {
    let mut x = increment;
    let mut digits = 0;
    while (x - x.round()).abs() > 1e-9 && digits < 12 {
        x *= 10.0;
        digits += 1;
    }
    digits
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn btc_rules() -> SymbolRules {
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

    #[test]
    fn deserialises_string_decimals() {
        let r = btc_rules();
        assert_eq!(r.symbol, "BTC-USDT");
        assert_eq!(r.base_currency, "BTC");
        assert!((r.price_increment - 0.1).abs() < 1e-12);
        assert!((r.base_min_size - 0.00001).abs() < 1e-12);
    }

    #[test]
    fn decimals_counted_from_increment() {
        assert_eq!(decimals_of(1.0), 0);
        assert_eq!(decimals_of(0.1), 1);
        assert_eq!(decimals_of(0.00000001), 8);
    }

    #[test]
    fn price_rounds_to_increment() {
        let r = btc_rules();
        assert!((r.round_price(43210.26) - 43210.3).abs() < 1e-9);
        assert!((r.round_price(43210.24) - 43210.2).abs() < 1e-9);
        // Below the increment clamps up to it.
        assert!((r.round_price(0.01) - 0.1).abs() < 1e-12);
    }

    #[test]
    fn size_truncates_and_clamps() {
        let r = btc_rules();
        // Truncation, never rounding up: selling more than held would fail.
        assert!((r.round_size(0.123456789) - 0.12345678).abs() < 1e-12);
        assert!((r.round_size(0.000001) - 0.00001).abs() < 1e-12);
        assert!((r.round_size(20000.0) - 10000.0).abs() < 1e-9);
    }

    #[test]
    fn funds_round_to_quote_increment() {
        let r = btc_rules();
        assert!((r.round_funds(5.0000004) - 5.0).abs() < 1e-12);
        assert!((r.round_funds(5.0000006) - 5.000001).abs() < 1e-12);
        assert!((r.round_funds(0.001) - 0.01).abs() < 1e-12);
    }
}
