//! The remote-call surface shared by broker nodes and trading clients.
//!
//! `TradingService` is the set of named operations a broker exposes. It is
//! implemented in-process by [`crate::broker::BrokerNode`] and over HTTP by
//! [`remote::RemoteBroker`]; callers only ever hold a [`PeerHandle`].

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::engine::types::PriceMap;

pub mod remote;
pub mod server;
pub mod wire;

/// Name every broker is published under on its endpoint.
pub const SERVICE_NAME: &str = "TradingService";

pub type PeerHandle = Arc<dyn TradingService>;

#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("remote returned {code}: {body}")]
    Status { code: u16, body: String },
    #[error("malformed response: {0}")]
    Decode(String),
    #[error("broker unavailable: {0}")]
    Unavailable(String),
}

impl From<reqwest::Error> for RpcError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            RpcError::Decode(err.to_string())
        } else {
            RpcError::Transport(err.to_string())
        }
    }
}

pub type RpcResult<T> = Result<T, RpcError>;

#[async_trait]
pub trait TradingService: Send + Sync {
    async fn buy(&self, symbol: &str, quantity: u64, client_id: &str) -> RpcResult<bool>;
    async fn sell(&self, symbol: &str, quantity: u64, client_id: &str) -> RpcResult<bool>;
    /// 0.0 for an unknown symbol.
    async fn get_price(&self, symbol: &str) -> RpcResult<f64>;
    async fn get_all_prices(&self) -> RpcResult<PriceMap>;

    /// Ask this broker to replicate to the broker reachable at `endpoint`.
    async fn register_peer(&self, peer_id: &str, endpoint: &Endpoint) -> RpcResult<()>;
    async fn push_update(&self, symbol: &str, new_price: f64, source_broker_id: &str) -> RpcResult<()>;
    async fn sync_bulk(&self, prices: &PriceMap) -> RpcResult<()>;

    async fn is_alive(&self) -> RpcResult<bool>;
    async fn get_broker_id(&self) -> RpcResult<String>;
}

/// Resolves a network endpoint to a callable broker handle.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn lookup(&self, endpoint: &Endpoint) -> RpcResult<PeerHandle>;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self { host: host.into(), port }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}:{}/{}", self.host, self.port, SERVICE_NAME)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid endpoint {0:?}, expected host:port")]
pub struct InvalidEndpoint(pub String);

impl FromStr for Endpoint {
    type Err = InvalidEndpoint;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s.trim().rsplit_once(':').ok_or_else(|| InvalidEndpoint(s.to_string()))?;
        if host.is_empty() {
            return Err(InvalidEndpoint(s.to_string()));
        }
        let port = port.parse::<u16>().map_err(|_| InvalidEndpoint(s.to_string()))?;
        Ok(Endpoint::new(host, port))
    }
}
