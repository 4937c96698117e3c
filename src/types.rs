use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;

/// A single trade tick from the stream
#[derive(Debug, Clone)]
pub struct Tick {
    pub symbol: String,
    pub price: Decimal,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }
}

/// Acknowledged market order
#[derive(Debug, Clone)]
pub struct OrderResult {
    pub symbol: String,
    pub order_id: u64,
    pub status: String,
    pub executed_qty: Decimal,
    pub cummulative_quote_qty: Decimal,
}

/// Spot account snapshot
#[derive(Debug, Clone, Deserialize)]
pub struct AccountInfo {
    pub balances: Vec<AssetBalance>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssetBalance {
    pub asset: String,
    pub free: String,
    pub locked: String,
}

/// exchangeInfo response (only the fields we read)
#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeInfo {
    pub symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolInfo {
    pub symbol: String,
    pub status: String,
    pub base_asset: String,
    pub quote_asset: String,
    #[serde(default)]
    pub is_spot_trading_allowed: bool,
    #[serde(default)]
    pub filters: Vec<SymbolFilter>,
}

/// Symbol filter entry; numeric fields arrive as strings
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolFilter {
    pub filter_type: String,
    pub step_size: Option<String>,
    pub min_qty: Option<String>,
    pub min_notional: Option<String>,
}

/// Order ack from POST /api/v3/order
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
    pub symbol: String,
    pub order_id: u64,
    pub status: String,
    pub executed_qty: String,
    pub cummulative_quote_qty: String,
}

/// Error body the exchange returns on rejected requests
#[derive(Debug, Clone, Deserialize)]
pub struct ApiError {
    pub code: i64,
    pub msg: String,
}

/// Combined-stream envelope: {"stream": "...", "data": {...}}
#[derive(Debug, Clone, Deserialize)]
pub struct StreamEnvelope {
    pub stream: String,
    pub data: TradeEvent,
}

/// Payload of a <symbol>@trade stream message
#[derive(Debug, Clone, Deserialize)]
pub struct TradeEvent {
    #[serde(rename = "e")]
    pub event_type: String,
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "p")]
    pub price: String,
    #[serde(rename = "T")]
    pub trade_time: i64,
}
