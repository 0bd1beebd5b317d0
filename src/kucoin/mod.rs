// =============================================================================
// KuCoin — REST client, symbol rules, public ticker stream
// =============================================================================

pub mod client;
pub mod symbols;
pub mod ws;

pub use client::{ActiveOrder, BulletInfo, KucoinClient};
pub use symbols::SymbolRules;
pub use ws::{run_ticker_stream, TickerBook, TickerQuote};
