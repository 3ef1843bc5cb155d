use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Price impact per unit bought: `price *= 1 + qty * BUY_IMPACT`.
pub const BUY_IMPACT: f64 = 0.001;
/// Price impact per unit sold: `price *= 1 - qty * SELL_IMPACT`.
pub const SELL_IMPACT: f64 = 0.0005;
/// A sell can never push a price below this floor.
pub const PRICE_FLOOR: f64 = 1.0;
/// Price given to a symbol first seen through a sell.
pub const UNLISTED_SELL_PRICE: f64 = 100.0;
/// Quantity given to a symbol first seen through replication.
pub const REPLICATED_QUANTITY: u64 = 1000;

/// Symbol -> price view, as pushed between brokers and returned to clients.
pub type PriceMap = BTreeMap<String, f64>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    Buy,
    Sell,
}

impl TradeSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeSide::Buy => "buy",
            TradeSide::Sell => "sell",
        }
    }
}

impl fmt::Display for TradeSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown trade side: {0:?}")]
pub struct UnknownSide(pub String);

impl FromStr for TradeSide {
    type Err = UnknownSide;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "buy" | "b" => Ok(TradeSide::Buy),
            "sell" | "s" => Ok(TradeSide::Sell),
            _ => Err(UnknownSide(s.to_string())),
        }
    }
}

// One catalog entry. Price and quantity only ever change together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockRecord {
    pub symbol: String,
    pub price: f64,
    pub available_quantity: u64,
}

impl StockRecord {
    pub fn new(symbol: impl Into<String>, price: f64, available_quantity: u64) -> Self {
        Self { symbol: symbol.into(), price, available_quantity }
    }
}

/// Why a buy was refused. Surfaces to callers only as `false`.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TradeRejection {
    #[error("unknown symbol {symbol}")]
    UnknownSymbol { symbol: String },
    #[error("insufficient quantity for {symbol}: requested {requested}, available {available}")]
    InsufficientQuantity { symbol: String, requested: u64, available: u64 },
}
