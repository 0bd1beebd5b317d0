// =============================================================================
// KuCoin Public Ticker Stream — live best bid/ask per symbol
// =============================================================================
//
// Connects through the bullet-public handshake, subscribes to the ticker
// topic for all configured symbols on one connection, and answers the ping
// schedule the server negotiated. Quotes land in the shared `TickerBook`;
// the executor prices take-profit orders and the status API values accounts
// off it.
//
// The function returns when the connection drops; the caller reconnects
// after a short delay.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use serde::Serialize;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::kucoin::client::KucoinClient;

/// Latest ticker snapshot for one symbol.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct TickerQuote {
    pub best_bid: f64,
    pub best_ask: f64,
    pub last_price: f64,
    pub time_ms: i64,
}

/// Shared map of symbol to latest quote.
#[derive(Default)]
pub struct TickerBook {
    quotes: RwLock<HashMap<String, TickerQuote>>,
}

impl TickerBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&self, symbol: &str, quote: TickerQuote) {
        self.quotes.write().insert(symbol.to_string(), quote);
    }

    pub fn get(&self, symbol: &str) -> Option<TickerQuote> {
        self.quotes.read().get(symbol).copied()
    }

    pub fn best_bid(&self, symbol: &str) -> Option<f64> {
        self.get(symbol).map(|q| q.best_bid)
    }

    pub fn last_price(&self, symbol: &str) -> Option<f64> {
        self.get(symbol).map(|q| q.last_price)
    }

    /// Snapshot of every symbol's quote, for the status API.
    pub fn snapshot(&self) -> HashMap<String, TickerQuote> {
        self.quotes.read().clone()
    }
}

/// Apply one WS text frame to the book. Returns the symbol updated, if the
/// frame was a ticker message.
fn apply_message(book: &TickerBook, text: &str) -> Option<String> {
    let msg: serde_json::Value = serde_json::from_str(text).ok()?;
    if msg["type"].as_str() != Some("message") || msg["subject"].as_str() != Some("trade.ticker") {
        return None;
    }
    let symbol = msg["topic"].as_str()?.rsplit(':').next()?.to_string();
    let data = &msg["data"];

    let f = |key: &str| data[key].as_str().and_then(|s| s.parse::<f64>().ok());
    let quote = TickerQuote {
        best_bid: f("bestBid")?,
        best_ask: f("bestAsk").unwrap_or_default(),
        last_price: f("price").unwrap_or_default(),
        time_ms: data["time"].as_i64().unwrap_or_default(),
    };
    book.update(&symbol, quote);
    Some(symbol)
}

/// One connection lifetime: handshake, subscribe, pump until disconnect.
pub async fn run_ticker_stream(
    client: Arc<KucoinClient>,
    symbols: &[String],
    book: Arc<TickerBook>,
) -> Result<()> {
    let bullet = client.bullet_public().await?;
    let url = format!(
        "{}?token={}&connectId={}",
        bullet.endpoint,
        bullet.token,
        Uuid::new_v4()
    );

    let (ws, _) = connect_async(&url)
        .await
        .context("ticker stream connection failed")?;
    let (mut sink, mut stream) = ws.split();

    // The server opens with a welcome frame; nothing may be sent before it.
    match stream.next().await {
        Some(Ok(Message::Text(text))) => {
            let msg: serde_json::Value = serde_json::from_str(&text).unwrap_or_default();
            if msg["type"].as_str() != Some("welcome") {
                anyhow::bail!("expected welcome frame, got: {text}");
            }
        }
        other => anyhow::bail!("ticker stream closed before welcome: {other:?}"),
    }

    let subscribe = serde_json::json!({
        "id": Uuid::new_v4().to_string(),
        "type": "subscribe",
        "topic": format!("/market/ticker:{}", symbols.join(",")),
        "privateChannel": false,
        "response": true,
    });
    sink.send(Message::Text(subscribe.to_string())).await?;
    info!(symbols = ?symbols, "ticker stream subscribed");

    let mut ping = tokio::time::interval(std::time::Duration::from_millis(bullet.ping_interval_ms));
    ping.tick().await; // first tick is immediate

    loop {
        tokio::select! {
            _ = ping.tick() => {
                let frame = serde_json::json!({
                    "id": Uuid::new_v4().to_string(),
                    "type": "ping",
                });
                sink.send(Message::Text(frame.to_string())).await?;
            }
            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(symbol) = apply_message(&book, &text) {
                            debug!(symbol = %symbol, "ticker updated");
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        sink.send(Message::Pong(data)).await?;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        warn!(?frame, "ticker stream closed by server");
                        return Ok(());
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e).context("ticker stream read failed"),
                    None => {
                        warn!("ticker stream ended");
                        return Ok(());
                    }
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticker_message_updates_book() {
        let book = TickerBook::new();
        let text = r#"{
            "type": "message",
            "topic": "/market/ticker:BTC-USDT",
            "subject": "trade.ticker",
            "data": {
                "bestBid": "19500.1",
                "bestAsk": "19500.2",
                "price": "19500.15",
                "time": 1666666666000
            }
        }"#;
        assert_eq!(apply_message(&book, text), Some("BTC-USDT".to_string()));

        let q = book.get("BTC-USDT").unwrap();
        assert!((q.best_bid - 19500.1).abs() < 1e-9);
        assert!((q.best_ask - 19500.2).abs() < 1e-9);
        assert!((q.last_price - 19500.15).abs() < 1e-9);
        assert_eq!(q.time_ms, 1_666_666_666_000);
        assert_eq!(book.best_bid("BTC-USDT"), Some(19500.1));
    }

    #[test]
    fn non_ticker_frames_are_ignored() {
        let book = TickerBook::new();
        assert_eq!(apply_message(&book, r#"{"type": "welcome"}"#), None);
        assert_eq!(apply_message(&book, r#"{"type": "pong", "id": "1"}"#), None);
        assert_eq!(apply_message(&book, "not json"), None);
        assert!(book.get("BTC-USDT").is_none());
    }

    #[test]
    fn missing_bid_is_dropped_not_zeroed() {
        let book = TickerBook::new();
        let text = r#"{
            "type": "message",
            "topic": "/market/ticker:ETH-USDT",
            "subject": "trade.ticker",
            "data": {"bestAsk": "1300.0"}
        }"#;
        assert_eq!(apply_message(&book, text), None);
        assert!(book.get("ETH-USDT").is_none());
    }

    #[test]
    fn snapshot_contains_all_symbols() {
        let book = TickerBook::new();
        book.update("BTC-USDT", TickerQuote { best_bid: 1.0, ..Default::default() });
        book.update("ETH-USDT", TickerQuote { best_bid: 2.0, ..Default::default() });
        let snap = book.snapshot();
        assert_eq!(snap.len(), 2);
        assert!((snap["ETH-USDT"].best_bid - 2.0).abs() < f64::EPSILON);
    }
}
