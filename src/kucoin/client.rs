// =============================================================================
// KuCoin REST API Client — v2-signed requests
// =============================================================================
//
// SECURITY: The secret and passphrase are never logged or serialized. Signed
// requests carry KC-API-SIGN = base64(HMAC-SHA256(secret, ts + method + path
// + body)) plus the v2-encrypted passphrase header.
//
// Every response arrives wrapped in `{"code": "200000", "data": ...}`;
// anything other than 200000 is surfaced as an error with KuCoin's code and
// message.
// =============================================================================

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderValue};
use serde::Deserialize;
use sha2::Sha256;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::kucoin::symbols::SymbolRules;
use crate::market_data::{Candle, CandleSource};
use crate::types::{AccountBalance, CandlePeriod, Side};

type HmacSha256 = Hmac<Sha256>;

const LIVE_URL: &str = "https://api.kucoin.com";
const SANDBOX_URL: &str = "https://openapi-sandbox.kucoin.com";

/// WebSocket connection details returned by the bullet-public handshake.
#[derive(Debug, Clone)]
pub struct BulletInfo {
    pub endpoint: String,
    pub token: String,
    pub ping_interval_ms: u64,
}

/// An open order as listed by GET /api/v1/orders.
#[derive(Debug, Clone, Deserialize)]
pub struct ActiveOrder {
    pub id: String,
    pub symbol: String,
    pub side: String,
}

/// KuCoin REST client with v2 request signing.
#[derive(Clone)]
pub struct KucoinClient {
    api_key: String,
    secret: String,
    passphrase: String,
    base_url: String,
    client: reqwest::Client,
}

impl KucoinClient {
    // -------------------------------------------------------------------------
    // Construction
    // -------------------------------------------------------------------------

    /// Create a new `KucoinClient`.
    ///
    /// `sandbox` selects KuCoin's sandbox environment; live otherwise.
    pub fn new(
        api_key: impl Into<String>,
        secret: impl Into<String>,
        passphrase: impl Into<String>,
        sandbox: bool,
    ) -> Self {
        let base_url = if sandbox { SANDBOX_URL } else { LIVE_URL }.to_string();

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("failed to build reqwest client");

        debug!(base_url = %base_url, "KucoinClient initialised");

        Self {
            api_key: api_key.into(),
            secret: secret.into(),
            passphrase: passphrase.into(),
            base_url,
            client,
        }
    }

    // -------------------------------------------------------------------------
    // Signing helpers
    // -------------------------------------------------------------------------

    /// base64(HMAC-SHA256(secret, payload)) — the v2 signature form.
    fn sign(&self, payload: &str) -> String {
        let mut mac =
            HmacSha256::new_from_slice(self.secret.as_bytes()).expect("HMAC accepts any key size");
        mac.update(payload.as_bytes());
        BASE64.encode(mac.finalize().into_bytes())
    }

    /// Current UNIX timestamp in milliseconds.
    fn timestamp_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before UNIX epoch")
            .as_millis() as u64
    }

    /// Headers for a signed request. `path` includes the query string; the
    /// signed payload is ts + METHOD + path + body.
    fn auth_headers(&self, method: &str, path: &str, body: &str) -> Result<HeaderMap> {
        let ts = Self::timestamp_ms().to_string();
        let signature = self.sign(&format!("{ts}{method}{path}{body}"));
        let passphrase = self.sign(&self.passphrase);

        let mut headers = HeaderMap::new();
        headers.insert("KC-API-KEY", HeaderValue::from_str(&self.api_key)?);
        headers.insert("KC-API-SIGN", HeaderValue::from_str(&signature)?);
        headers.insert("KC-API-TIMESTAMP", HeaderValue::from_str(&ts)?);
        headers.insert("KC-API-PASSPHRASE", HeaderValue::from_str(&passphrase)?);
        headers.insert("KC-API-KEY-VERSION", HeaderValue::from_static("2"));
        Ok(headers)
    }

    // -------------------------------------------------------------------------
    // Request plumbing
    // -------------------------------------------------------------------------

    /// Unwrap KuCoin's `{"code": ..., "data": ...}` envelope, surfacing the
    /// code and message on failure.
    fn unwrap_envelope(body: serde_json::Value) -> Result<serde_json::Value> {
        let code = body["code"].as_str().unwrap_or("");
        if code != "200000" {
            let msg = body["msg"].as_str().unwrap_or("no message");
            bail!("KuCoin API error {code}: {msg}");
        }
        Ok(body["data"].clone())
    }

    async fn get_public(&self, path: &str) -> Result<serde_json::Value> {
        let url = format!("{}{}", self.base_url, path);
        let body: serde_json::Value = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("GET {path} request failed"))?
            .json()
            .await
            .with_context(|| format!("failed to parse GET {path} response"))?;
        Self::unwrap_envelope(body)
    }

    async fn get_signed(&self, path: &str) -> Result<serde_json::Value> {
        let url = format!("{}{}", self.base_url, path);
        let headers = self.auth_headers("GET", path, "")?;
        let body: serde_json::Value = self
            .client
            .get(&url)
            .headers(headers)
            .send()
            .await
            .with_context(|| format!("GET {path} request failed"))?
            .json()
            .await
            .with_context(|| format!("failed to parse GET {path} response"))?;
        Self::unwrap_envelope(body)
    }

    async fn post_signed(
        &self,
        path: &str,
        payload: &serde_json::Value,
    ) -> Result<serde_json::Value> {
        let url = format!("{}{}", self.base_url, path);
        let body_str = payload.to_string();
        let headers = self.auth_headers("POST", path, &body_str)?;
        let body: serde_json::Value = self
            .client
            .post(&url)
            .headers(headers)
            .header("Content-Type", "application/json")
            .body(body_str)
            .send()
            .await
            .with_context(|| format!("POST {path} request failed"))?
            .json()
            .await
            .with_context(|| format!("failed to parse POST {path} response"))?;
        Self::unwrap_envelope(body)
    }

    async fn delete_signed(&self, path: &str) -> Result<serde_json::Value> {
        let url = format!("{}{}", self.base_url, path);
        let headers = self.auth_headers("DELETE", path, "")?;
        let body: serde_json::Value = self
            .client
            .delete(&url)
            .headers(headers)
            .send()
            .await
            .with_context(|| format!("DELETE {path} request failed"))?
            .json()
            .await
            .with_context(|| format!("failed to parse DELETE {path} response"))?;
        Self::unwrap_envelope(body)
    }

    // -------------------------------------------------------------------------
    // Public market data
    // -------------------------------------------------------------------------

    /// GET /api/v1/market/candles (public).
    ///
    /// Rows are string arrays `[time, open, close, high, low, amount,
    /// volume]`, timestamps in seconds, newest first — exactly the order the
    /// candle window ingests.
    #[instrument(skip(self), name = "kucoin::get_klines")]
    pub async fn get_klines(
        &self,
        symbol: &str,
        period: CandlePeriod,
        start: Option<i64>,
    ) -> Result<Vec<Candle>> {
        let mut path = format!(
            "/api/v1/market/candles?symbol={}&type={}",
            symbol,
            period.api_name()
        );
        if let Some(start) = start {
            path.push_str(&format!("&startAt={start}"));
        }

        let data = self.get_public(&path).await?;
        let candles = Self::parse_kline_rows(&data)?;
        debug!(symbol, period = %period, count = candles.len(), "klines fetched");
        Ok(candles)
    }

    /// Parse the kline `data` array into candles, skipping malformed rows.
    fn parse_kline_rows(data: &serde_json::Value) -> Result<Vec<Candle>> {
        let rows = data.as_array().context("kline response is not an array")?;
        let mut candles = Vec::with_capacity(rows.len());
        for row in rows {
            let arr = match row.as_array() {
                Some(a) if a.len() >= 7 => a,
                _ => {
                    warn!("skipping malformed kline row: {row}");
                    continue;
                }
            };
            candles.push(Candle {
                open_time: Self::parse_str_i64(&arr[0])?,
                open: Self::parse_str_f64(&arr[1])?,
                close: Self::parse_str_f64(&arr[2])?,
                high: Self::parse_str_f64(&arr[3])?,
                low: Self::parse_str_f64(&arr[4])?,
                amount: Self::parse_str_f64(&arr[5])?,
                volume: Self::parse_str_f64(&arr[6])?,
            });
        }
        Ok(candles)
    }

    /// GET /api/v2/symbols (public), filtered to `wanted`.
    #[instrument(skip(self, wanted), name = "kucoin::get_symbols")]
    pub async fn get_symbols(&self, wanted: &[String]) -> Result<Vec<SymbolRules>> {
        let data = self.get_public("/api/v2/symbols").await?;
        let all: Vec<SymbolRules> =
            serde_json::from_value(data).context("failed to parse symbols response")?;
        let rules: Vec<SymbolRules> = all
            .into_iter()
            .filter(|r| wanted.iter().any(|w| w == &r.symbol))
            .collect();
        debug!(count = rules.len(), "symbol rules retrieved");
        Ok(rules)
    }

    // -------------------------------------------------------------------------
    // Account
    // -------------------------------------------------------------------------

    /// GET /api/v1/accounts (signed).
    #[instrument(skip(self), name = "kucoin::get_accounts")]
    pub async fn get_accounts(&self) -> Result<Vec<AccountBalance>> {
        let data = self.get_signed("/api/v1/accounts").await?;
        let balances = Self::parse_account_rows(data)?;
        debug!(count = balances.len(), "account balances retrieved");
        Ok(balances)
    }

    fn parse_account_rows(data: serde_json::Value) -> Result<Vec<AccountBalance>> {
        #[derive(Deserialize)]
        struct Raw {
            currency: String,
            #[serde(rename = "type")]
            account_type: String,
            balance: String,
            available: String,
            holds: String,
        }

        let raw: Vec<Raw> =
            serde_json::from_value(data).context("failed to parse accounts response")?;
        Ok(raw
            .into_iter()
            .map(|r| AccountBalance {
                currency: r.currency,
                account_type: r.account_type,
                balance: r.balance.parse().unwrap_or(0.0),
                available: r.available.parse().unwrap_or(0.0),
                holds: r.holds.parse().unwrap_or(0.0),
            })
            .collect())
    }

    // -------------------------------------------------------------------------
    // Orders
    // -------------------------------------------------------------------------

    /// POST /api/v1/orders (signed) — market order by funds or size. Returns
    /// the order id.
    #[instrument(skip(self), name = "kucoin::create_market_order")]
    pub async fn create_market_order(
        &self,
        symbol: &str,
        side: Side,
        funds: Option<f64>,
        size: Option<f64>,
    ) -> Result<String> {
        if funds.is_none() && size.is_none() {
            bail!("market order requires funds or size");
        }
        let mut payload = serde_json::json!({
            "clientOid": Uuid::new_v4().to_string(),
            "symbol": symbol,
            "side": side.to_string(),
            "type": "market",
        });
        if let Some(funds) = funds {
            payload["funds"] = serde_json::Value::String(funds.to_string());
        }
        if let Some(size) = size {
            payload["size"] = serde_json::Value::String(size.to_string());
        }

        let data = self.post_signed("/api/v1/orders", &payload).await?;
        let order_id = data["orderId"]
            .as_str()
            .context("order response missing orderId")?
            .to_string();
        debug!(symbol, %side, order_id, "market order placed");
        Ok(order_id)
    }

    /// POST /api/v1/orders (signed) — limit order. Returns the order id.
    #[instrument(skip(self), name = "kucoin::create_limit_order")]
    pub async fn create_limit_order(
        &self,
        symbol: &str,
        side: Side,
        price: f64,
        size: f64,
    ) -> Result<String> {
        let payload = serde_json::json!({
            "clientOid": Uuid::new_v4().to_string(),
            "symbol": symbol,
            "side": side.to_string(),
            "type": "limit",
            "price": price.to_string(),
            "size": size.to_string(),
        });

        let data = self.post_signed("/api/v1/orders", &payload).await?;
        let order_id = data["orderId"]
            .as_str()
            .context("order response missing orderId")?
            .to_string();
        debug!(symbol, %side, price, size, order_id, "limit order placed");
        Ok(order_id)
    }

    /// GET /api/v1/orders?status=active (signed) for one symbol.
    #[instrument(skip(self), name = "kucoin::get_active_orders")]
    pub async fn get_active_orders(&self, symbol: &str) -> Result<Vec<ActiveOrder>> {
        let path = format!("/api/v1/orders?status=active&symbol={symbol}");
        let data = self.get_signed(&path).await?;
        let orders: Vec<ActiveOrder> = serde_json::from_value(data["items"].clone())
            .context("failed to parse active orders response")?;
        debug!(symbol, count = orders.len(), "active orders retrieved");
        Ok(orders)
    }

    /// DELETE /api/v1/orders/{order_id} (signed).
    #[instrument(skip(self), name = "kucoin::cancel_order")]
    pub async fn cancel_order(&self, order_id: &str) -> Result<()> {
        let path = format!("/api/v1/orders/{order_id}");
        self.delete_signed(&path).await?;
        debug!(order_id, "order cancelled");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // WebSocket handshake
    // -------------------------------------------------------------------------

    /// POST /api/v1/bullet-public — negotiate the public WS endpoint, token,
    /// and ping interval.
    #[instrument(skip(self), name = "kucoin::bullet_public")]
    pub async fn bullet_public(&self) -> Result<BulletInfo> {
        let url = format!("{}/api/v1/bullet-public", self.base_url);
        let body: serde_json::Value = self
            .client
            .post(&url)
            .send()
            .await
            .context("POST /api/v1/bullet-public request failed")?
            .json()
            .await
            .context("failed to parse bullet-public response")?;
        let data = Self::unwrap_envelope(body)?;

        let token = data["token"]
            .as_str()
            .context("bullet-public response missing token")?
            .to_string();
        let server = data["instanceServers"]
            .as_array()
            .and_then(|s| s.first())
            .context("bullet-public response missing instance servers")?;
        let endpoint = server["endpoint"]
            .as_str()
            .context("instance server missing endpoint")?
            .to_string();
        let ping_interval_ms = server["pingInterval"].as_u64().unwrap_or(18_000);

        debug!(endpoint = %endpoint, ping_interval_ms, "bullet-public negotiated");
        Ok(BulletInfo {
            endpoint,
            token,
            ping_interval_ms,
        })
    }

    // -------------------------------------------------------------------------
    // Internal helpers
    // -------------------------------------------------------------------------

    fn parse_str_f64(val: &serde_json::Value) -> Result<f64> {
        if let Some(s) = val.as_str() {
            s.parse::<f64>()
                .with_context(|| format!("failed to parse '{s}' as f64"))
        } else if let Some(n) = val.as_f64() {
            Ok(n)
        } else {
            bail!("expected string or number, got: {val}")
        }
    }

    fn parse_str_i64(val: &serde_json::Value) -> Result<i64> {
        if let Some(s) = val.as_str() {
            s.parse::<i64>()
                .with_context(|| format!("failed to parse '{s}' as i64"))
        } else if let Some(n) = val.as_i64() {
            Ok(n)
        } else {
            bail!("expected string or integer, got: {val}")
        }
    }
}

#[async_trait]
impl CandleSource for KucoinClient {
    async fn fetch_candles(
        &self,
        symbol: &str,
        period: CandlePeriod,
        start: Option<i64>,
    ) -> Result<Vec<Candle>> {
        self.get_klines(symbol, period, start).await
    }
}

impl std::fmt::Debug for KucoinClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KucoinClient")
            .field("api_key", &"<redacted>")
            .field("secret", &"<redacted>")
            .field("passphrase", &"<redacted>")
            .field("base_url", &self.base_url)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
