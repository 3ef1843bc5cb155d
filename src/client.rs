//! Fault-tolerant trading client.
//!
//! A `TradingClient` talks to one broker at a time. Every call goes through
//! [`TradingClient::execute_with_failover`], which reselects a live broker
//! and retries when the active one fails, at most once per known endpoint.
//!
//! Methods take `&mut self`: one client instance serves one caller. Share a
//! client between tasks by wrapping it in a `tokio::sync::Mutex`.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::seq::SliceRandom;
use tracing::{debug, info, instrument, warn};

use crate::config::ClientConfig;
use crate::engine::types::{PriceMap, TradeSide};
use crate::error::{ClientError, ClientResult, ConfigError};
use crate::rpc::remote::HttpConnector;
use crate::rpc::{Connector, Endpoint, PeerHandle, RpcError, RpcResult};

struct ActiveBroker {
    handle: PeerHandle,
    broker_id: String,
    endpoint: Endpoint,
}

pub struct TradingClient {
    endpoints: Vec<Endpoint>,
    connector: Arc<dyn Connector>,
    active: Option<ActiveBroker>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connected { broker_id: String, alive: bool },
    Disconnected,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionStatus::Connected { broker_id, alive: true } => write!(f, "connected to {broker_id} (alive)"),
            ConnectionStatus::Connected { broker_id, alive: false } => write!(f, "connected to {broker_id} (dead)"),
            ConnectionStatus::Disconnected => f.write_str("disconnected"),
        }
    }
}

/// Outcome of [`TradingClient::execute_batch`].
#[derive(Debug, Clone, PartialEq)]
pub struct BatchSummary {
    pub side: TradeSide,
    pub symbol: String,
    pub requested: usize,
    pub succeeded: usize,
    pub rejected: usize,
    pub errors: usize,
    pub final_price: Option<f64>,
}

impl BatchSummary {
    /// Percentage of trades that went through.
    pub fn success_rate(&self) -> f64 {
        if self.requested == 0 {
            return 0.0;
        }
        self.succeeded as f64 * 100.0 / self.requested as f64
    }
}

impl TradingClient {
    pub fn new(endpoints: Vec<Endpoint>, connector: Arc<dyn Connector>) -> Self {
        Self { endpoints, connector, active: None }
    }

    pub fn from_config(cfg: &ClientConfig) -> Result<Self, ConfigError> {
        let connector = HttpConnector::new(cfg.request_timeout()).map_err(|e| ConfigError::Invalid(e.to_string()))?;
        Ok(Self::new(cfg.endpoints()?, Arc::new(connector)))
    }

    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    pub fn active_broker_id(&self) -> Option<&str> {
        self.active.as_ref().map(|a| a.broker_id.as_str())
    }

    pub fn active_endpoint(&self) -> Option<&Endpoint> {
        self.active.as_ref().map(|a| &a.endpoint)
    }

    /// Pick a live broker, trying endpoints in random order.
    #[instrument(skip(self), fields(endpoints = self.endpoints.len()))]
    pub async fn connect(&mut self) -> ClientResult<&str> {
        self.active = None;
        let mut order = self.endpoints.clone();
        order.shuffle(&mut rand::thread_rng());

        for endpoint in order {
            match self.probe(&endpoint).await {
                Ok((handle, broker_id)) => {
                    info!(broker = %broker_id, %endpoint, "Connected to broker");
                    let active = self.active.insert(ActiveBroker { handle, broker_id, endpoint });
                    return Ok(active.broker_id.as_str());
                }
                Err(e) => warn!(%endpoint, error = %e, "Failed to connect"),
            }
        }
        Err(ClientError::AllBrokersUnavailable { attempted: self.endpoints.len() })
    }

    async fn probe(&self, endpoint: &Endpoint) -> RpcResult<(PeerHandle, String)> {
        let handle = self.connector.lookup(endpoint).await?;
        if !handle.is_alive().await? {
            return Err(RpcError::Unavailable(format!("{endpoint} reports not alive")));
        }
        let broker_id = handle.get_broker_id().await?;
        Ok((handle, broker_id))
    }

    async fn active_handle(&mut self) -> ClientResult<PeerHandle> {
        if let Some(active) = &self.active {
            return Ok(active.handle.clone());
        }
        self.connect().await?;
        self.active
            .as_ref()
            .map(|a| a.handle.clone())
            .ok_or(ClientError::AllBrokersUnavailable { attempted: self.endpoints.len() })
    }

    /// Run `call` against the active broker, failing over on any error.
    ///
    /// At most one attempt per known endpoint. A failed attempt drops the
    /// active broker; the next attempt reconnects to a randomly chosen live one.
    pub async fn execute_with_failover<T, F, Fut>(&mut self, operation: &'static str, call: F) -> ClientResult<T>
    where
        F: Fn(PeerHandle) -> Fut,
        Fut: Future<Output = RpcResult<T>>,
    {
        let budget = self.endpoints.len();
        let mut last_error = String::from("no broker endpoints configured");

        for attempt in 1..=budget {
            let handle = match self.active_handle().await {
                Ok(handle) => handle,
                Err(e) => {
                    last_error = e.to_string();
                    continue;
                }
            };
            match call(handle).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    metrics::counter!("stockmesh_failovers_total", "operation" => operation).increment(1);
                    warn!(
                        operation,
                        attempt,
                        broker = ?self.active_broker_id(),
                        error = %e,
                        "Call failed, failing over"
                    );
                    last_error = e.to_string();
                    self.active = None;
                }
            }
        }
        Err(ClientError::OperationFailed { operation, attempts: budget, last_error })
    }

    pub async fn buy(&mut self, symbol: &str, quantity: u64, client_id: &str) -> ClientResult<bool> {
        self.execute_with_failover("buy", |svc| async move { svc.buy(symbol, quantity, client_id).await })
            .await
    }

    pub async fn sell(&mut self, symbol: &str, quantity: u64, client_id: &str) -> ClientResult<bool> {
        self.execute_with_failover("sell", |svc| async move { svc.sell(symbol, quantity, client_id).await })
            .await
    }

    pub async fn execute_trade(
        &mut self,
        side: TradeSide,
        symbol: &str,
        quantity: u64,
        client_id: &str,
    ) -> ClientResult<bool> {
        match side {
            TradeSide::Buy => self.buy(symbol, quantity, client_id).await,
            TradeSide::Sell => self.sell(symbol, quantity, client_id).await,
        }
    }

    pub async fn get_price(&mut self, symbol: &str) -> ClientResult<f64> {
        self.execute_with_failover("get_price", |svc| async move { svc.get_price(symbol).await }).await
    }

    pub async fn get_all_prices(&mut self) -> ClientResult<PriceMap> {
        self.execute_with_failover("get_all_prices", |svc| async move { svc.get_all_prices().await }).await
    }

    pub async fn register_peer(&mut self, peer_id: &str, endpoint: &Endpoint) -> ClientResult<()> {
        self.execute_with_failover("register_peer", |svc| async move { svc.register_peer(peer_id, endpoint).await })
            .await
    }

    pub async fn push_update(&mut self, symbol: &str, new_price: f64, source_broker_id: &str) -> ClientResult<()> {
        self.execute_with_failover("push_update", |svc| async move {
            svc.push_update(symbol, new_price, source_broker_id).await
        })
        .await
    }

    pub async fn sync_bulk(&mut self, prices: &PriceMap) -> ClientResult<()> {
        self.execute_with_failover("sync_bulk", |svc| async move { svc.sync_bulk(prices).await }).await
    }

    pub async fn is_alive(&mut self) -> ClientResult<bool> {
        self.execute_with_failover("is_alive", |svc| async move { svc.is_alive().await }).await
    }

    pub async fn get_broker_id(&mut self) -> ClientResult<String> {
        self.execute_with_failover("get_broker_id", |svc| async move { svc.get_broker_id().await }).await
    }

    /// Probe the current broker without raising.
    pub async fn connection_status(&mut self) -> ConnectionStatus {
        let alive = match self.is_alive().await {
            Ok(alive) => alive,
            Err(e) => {
                debug!(error = %e, "Status probe failed");
                return ConnectionStatus::Disconnected;
            }
        };
        match self.get_broker_id().await {
            Ok(broker_id) => ConnectionStatus::Connected { broker_id, alive },
            Err(_) => ConnectionStatus::Disconnected,
        }
    }

    /// Run `count` identical trades, pausing between them, and report how
    /// they went. Individual failures are counted, not raised.
    #[instrument(skip(self))]
    pub async fn execute_batch(
        &mut self,
        side: TradeSide,
        symbol: &str,
        quantity: u64,
        count: usize,
        pause: Duration,
    ) -> BatchSummary {
        let mut summary = BatchSummary {
            side,
            symbol: symbol.to_string(),
            requested: count,
            succeeded: 0,
            rejected: 0,
            errors: 0,
            final_price: None,
        };

        for i in 1..=count {
            let client_id = format!("batch-client-{i}");
            match self.execute_trade(side, symbol, quantity, &client_id).await {
                Ok(true) => summary.succeeded += 1,
                Ok(false) => summary.rejected += 1,
                Err(e) => {
                    warn!(trade = i, error = %e, "Batch trade errored");
                    summary.errors += 1;
                }
            }
            if i < count && !pause.is_zero() {
                tokio::time::sleep(pause).await;
            }
        }

        summary.final_price = self.get_price(symbol).await.ok();
        info!(
            succeeded = summary.succeeded,
            rejected = summary.rejected,
            errors = summary.errors,
            rate = summary.success_rate(),
            "Batch complete"
        );
        summary
    }
}
