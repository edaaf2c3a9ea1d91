use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Order side as it appears on the wire and in trade logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    #[serde(rename = "BUY")]
    Buy,
    #[serde(rename = "SELL")]
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

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One aggregated L2 price level (no individual order identities).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: f64,
    pub quantity: f64,
}

/// A complete L2 snapshot as produced by the feed. Ingested wholesale;
/// there is no incremental diffing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookSnapshot {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
}

/// A request to trade. `limit_price: None` means market order.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeIntent {
    pub symbol: String,
    pub side: Side,
    pub limit_price: Option<f64>,
    pub quantity: f64,
    pub created_at: DateTime<Utc>,
}

/// A completed (simulated) trade. Produced only by the matching engine.
#[derive(Debug, Clone, PartialEq)]
pub struct Fill {
    pub symbol: String,
    pub side: Side,
    pub price: f64,
    pub quantity: f64,
    pub filled_at: DateTime<Utc>,
}

impl Fill {
    /// Price times quantity, signed by nothing: callers pick the sign.
    pub fn notional(&self) -> f64 {
        self.price * self.quantity
    }
}

/// An open position. Owned and mutated exclusively by one strategy actor.
#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    pub symbol: String,
    pub quantity: f64,
    pub entry_price: f64,
    pub entry_time: DateTime<Utc>,
}
