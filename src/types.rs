// =============================================================================
// Shared types used across the Polaris trading engine
// =============================================================================

use serde::{Deserialize, Serialize};

/// Order side, serialised in KuCoin's lowercase wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "buy"),
            Self::Sell => write!(f, "sell"),
        }
    }
}

/// Which moving-average family a crossover signal is computed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MaKind {
    Sma,
    Ema,
}

impl std::fmt::Display for MaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sma => write!(f, "SMA"),
            Self::Ema => write!(f, "EMA"),
        }
    }
}

/// Candle bucket duration, serialised in KuCoin's kline-type string format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CandlePeriod {
    #[serde(rename = "1min")]
    Min1,
    #[serde(rename = "3min")]
    Min3,
    #[serde(rename = "5min")]
    Min5,
    #[serde(rename = "15min")]
    Min15,
    #[serde(rename = "30min")]
    Min30,
    #[serde(rename = "1hour")]
    Hour1,
    #[serde(rename = "2hour")]
    Hour2,
    #[serde(rename = "4hour")]
    Hour4,
    #[serde(rename = "6hour")]
    Hour6,
    #[serde(rename = "8hour")]
    Hour8,
    #[serde(rename = "12hour")]
    Hour12,
    #[serde(rename = "1day")]
    Day1,
    #[serde(rename = "1week")]
    Week1,
}

impl Default for CandlePeriod {
    fn default() -> Self {
        Self::Min1
    }
}

impl CandlePeriod {
    /// Bucket duration in seconds.
    pub fn seconds(&self) -> i64 {
        match self {
            Self::Min1 => 60,
            Self::Min3 => 3 * 60,
            Self::Min5 => 5 * 60,
            Self::Min15 => 15 * 60,
            Self::Min30 => 30 * 60,
            Self::Hour1 => 3600,
            Self::Hour2 => 2 * 3600,
            Self::Hour4 => 4 * 3600,
            Self::Hour6 => 6 * 3600,
            Self::Hour8 => 8 * 3600,
            Self::Hour12 => 12 * 3600,
            Self::Day1 => 24 * 3600,
            Self::Week1 => 7 * 24 * 3600,
        }
    }

    /// The string KuCoin expects in the `type` query parameter of the kline
    /// endpoint.
    pub fn api_name(&self) -> &'static str {
        match self {
            Self::Min1 => "1min",
            Self::Min3 => "3min",
            Self::Min5 => "5min",
            Self::Min15 => "15min",
            Self::Min30 => "30min",
            Self::Hour1 => "1hour",
            Self::Hour2 => "2hour",
            Self::Hour4 => "4hour",
            Self::Hour6 => "6hour",
            Self::Hour8 => "8hour",
            Self::Hour12 => "12hour",
            Self::Day1 => "1day",
            Self::Week1 => "1week",
        }
    }
}

impl std::fmt::Display for CandlePeriod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.api_name())
    }
}

/// Balance snapshot for a single currency from a KuCoin account record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountBalance {
    pub currency: String,
    pub account_type: String,
    #[serde(default)]
    pub balance: f64,
    #[serde(default)]
    pub available: f64,
    #[serde(default)]
    pub holds: f64,
}
