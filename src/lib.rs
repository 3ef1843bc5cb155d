//! Replicated stock-trading brokers and a fault-tolerant client.
//!
//! Each [`broker::BrokerNode`] owns a [`engine::StockCatalog`], pushes every
//! price change to its peers and merges what peers push back. A
//! [`client::TradingClient`] fails over between brokers when one goes away.

pub mod broker;
pub mod client;
pub mod config;
pub mod engine;
pub mod error;
pub mod rpc;
pub mod telemetry;

#[cfg(test)]
mod testing;

pub use broker::BrokerNode;
pub use client::TradingClient;
pub use engine::{StockCatalog, StockRecord, TradeSide};
pub use error::{ClientError, ConfigError};
pub use rpc::{Connector, Endpoint, RpcError, TradingService};
