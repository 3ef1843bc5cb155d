// Test doubles for the RPC seams.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::engine::types::PriceMap;
use crate::rpc::{Connector, Endpoint, PeerHandle, RpcError, RpcResult, TradingService};

/// Accepts everything and remembers replication traffic.
#[derive(Debug, Default)]
pub struct RecordingPeer {
    id: String,
    updates: Mutex<Vec<(String, f64, String)>>,
    syncs: Mutex<Vec<PriceMap>>,
}

impl RecordingPeer {
    pub fn new(id: &str) -> Self {
        Self { id: id.to_string(), ..Default::default() }
    }

    pub fn updates(&self) -> Vec<(String, f64, String)> {
        self.updates.lock().clone()
    }

    pub fn syncs(&self) -> Vec<PriceMap> {
        self.syncs.lock().clone()
    }
}

#[async_trait]
impl TradingService for RecordingPeer {
    async fn buy(&self, _symbol: &str, _quantity: u64, _client_id: &str) -> RpcResult<bool> {
        Ok(true)
    }
    async fn sell(&self, _symbol: &str, _quantity: u64, _client_id: &str) -> RpcResult<bool> {
        Ok(true)
    }
    async fn get_price(&self, _symbol: &str) -> RpcResult<f64> {
        Ok(0.0)
    }
    async fn get_all_prices(&self) -> RpcResult<PriceMap> {
        Ok(PriceMap::new())
    }
    async fn register_peer(&self, _peer_id: &str, _endpoint: &Endpoint) -> RpcResult<()> {
        Ok(())
    }
    async fn push_update(&self, symbol: &str, new_price: f64, source_broker_id: &str) -> RpcResult<()> {
        self.updates.lock().push((symbol.to_string(), new_price, source_broker_id.to_string()));
        Ok(())
    }
    async fn sync_bulk(&self, prices: &PriceMap) -> RpcResult<()> {
        self.syncs.lock().push(prices.clone());
        Ok(())
    }
    async fn is_alive(&self) -> RpcResult<bool> {
        Ok(true)
    }
    async fn get_broker_id(&self) -> RpcResult<String> {
        Ok(self.id.clone())
    }
}

/// Records like `RecordingPeer`, but `push_update` parks until released.
#[derive(Debug, Default)]
pub struct GatedPeer {
    inner: RecordingPeer,
    entered: Notify,
    release: Notify,
}

impl GatedPeer {
    pub fn new(id: &str) -> Self {
        Self { inner: RecordingPeer::new(id), ..Default::default() }
    }

    /// Resolves once a push is parked inside `push_update`.
    pub async fn wait_entered(&self) {
        self.entered.notified().await;
    }

    pub fn release(&self) {
        self.release.notify_one();
    }

    pub fn updates(&self) -> Vec<(String, f64, String)> {
        self.inner.updates()
    }
}

#[async_trait]
impl TradingService for GatedPeer {
    async fn buy(&self, symbol: &str, quantity: u64, client_id: &str) -> RpcResult<bool> {
        self.inner.buy(symbol, quantity, client_id).await
    }
    async fn sell(&self, symbol: &str, quantity: u64, client_id: &str) -> RpcResult<bool> {
        self.inner.sell(symbol, quantity, client_id).await
    }
    async fn get_price(&self, symbol: &str) -> RpcResult<f64> {
        self.inner.get_price(symbol).await
    }
    async fn get_all_prices(&self) -> RpcResult<PriceMap> {
        self.inner.get_all_prices().await
    }
    async fn register_peer(&self, peer_id: &str, endpoint: &Endpoint) -> RpcResult<()> {
        self.inner.register_peer(peer_id, endpoint).await
    }
    async fn push_update(&self, symbol: &str, new_price: f64, source_broker_id: &str) -> RpcResult<()> {
        self.entered.notify_one();
        self.release.notified().await;
        self.inner.push_update(symbol, new_price, source_broker_id).await
    }
    async fn sync_bulk(&self, prices: &PriceMap) -> RpcResult<()> {
        self.inner.sync_bulk(prices).await
    }
    async fn is_alive(&self) -> RpcResult<bool> {
        self.inner.is_alive().await
    }
    async fn get_broker_id(&self) -> RpcResult<String> {
        self.inner.get_broker_id().await
    }
}

/// Every call fails as if the broker had crashed.
#[derive(Debug, Default)]
pub struct FailingPeer;

fn down<T>() -> RpcResult<T> {
    Err(RpcError::Unavailable("connection refused".into()))
}

#[async_trait]
impl TradingService for FailingPeer {
    async fn buy(&self, _symbol: &str, _quantity: u64, _client_id: &str) -> RpcResult<bool> {
        down()
    }
    async fn sell(&self, _symbol: &str, _quantity: u64, _client_id: &str) -> RpcResult<bool> {
        down()
    }
    async fn get_price(&self, _symbol: &str) -> RpcResult<f64> {
        down()
    }
    async fn get_all_prices(&self) -> RpcResult<PriceMap> {
        down()
    }
    async fn register_peer(&self, _peer_id: &str, _endpoint: &Endpoint) -> RpcResult<()> {
        down()
    }
    async fn push_update(&self, _symbol: &str, _new_price: f64, _source_broker_id: &str) -> RpcResult<()> {
        down()
    }
    async fn sync_bulk(&self, _prices: &PriceMap) -> RpcResult<()> {
        down()
    }
    async fn is_alive(&self) -> RpcResult<bool> {
        down()
    }
    async fn get_broker_id(&self) -> RpcResult<String> {
        down()
    }
}

/// A broker that can be switched off mid-test, counting calls it served.
#[derive(Debug)]
pub struct SwitchablePeer {
    inner: RecordingPeer,
    up: AtomicBool,
    trades_up: AtomicBool,
    calls: AtomicUsize,
    trade_calls: AtomicUsize,
}

impl SwitchablePeer {
    pub fn new(id: &str) -> Self {
        Self {
            inner: RecordingPeer::new(id),
            up: AtomicBool::new(true),
            trades_up: AtomicBool::new(true),
            calls: AtomicUsize::new(0),
            trade_calls: AtomicUsize::new(0),
        }
    }

    /// Keep answering probes but fail every buy/sell.
    pub fn set_trades_up(&self, up: bool) {
        self.trades_up.store(up, Ordering::SeqCst);
    }

    pub fn trade_calls(&self) -> usize {
        self.trade_calls.load(Ordering::SeqCst)
    }

    pub fn set_up(&self, up: bool) {
        self.up.store(up, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn gate(&self) -> RpcResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.up.load(Ordering::SeqCst) {
            Ok(())
        } else {
            down()
        }
    }

    fn trade_gate(&self) -> RpcResult<()> {
        self.gate()?;
        self.trade_calls.fetch_add(1, Ordering::SeqCst);
        if self.trades_up.load(Ordering::SeqCst) {
            Ok(())
        } else {
            down()
        }
    }
}

#[async_trait]
impl TradingService for SwitchablePeer {
    async fn buy(&self, symbol: &str, quantity: u64, client_id: &str) -> RpcResult<bool> {
        self.trade_gate()?;
        self.inner.buy(symbol, quantity, client_id).await
    }
    async fn sell(&self, symbol: &str, quantity: u64, client_id: &str) -> RpcResult<bool> {
        self.trade_gate()?;
        self.inner.sell(symbol, quantity, client_id).await
    }
    async fn get_price(&self, symbol: &str) -> RpcResult<f64> {
        self.gate()?;
        self.inner.get_price(symbol).await
    }
    async fn get_all_prices(&self) -> RpcResult<PriceMap> {
        self.gate()?;
        self.inner.get_all_prices().await
    }
    async fn register_peer(&self, peer_id: &str, endpoint: &Endpoint) -> RpcResult<()> {
        self.gate()?;
        self.inner.register_peer(peer_id, endpoint).await
    }
    async fn push_update(&self, symbol: &str, new_price: f64, source_broker_id: &str) -> RpcResult<()> {
        self.gate()?;
        self.inner.push_update(symbol, new_price, source_broker_id).await
    }
    async fn sync_bulk(&self, prices: &PriceMap) -> RpcResult<()> {
        self.gate()?;
        self.inner.sync_bulk(prices).await
    }
    async fn is_alive(&self) -> RpcResult<bool> {
        self.gate()?;
        self.inner.is_alive().await
    }
    async fn get_broker_id(&self) -> RpcResult<String> {
        self.gate()?;
        self.inner.get_broker_id().await
    }
}

/// Resolves endpoints from a fixed table; unknown endpoints fail lookup.
#[derive(Default)]
pub struct StaticConnector {
    handles: Mutex<HashMap<Endpoint, PeerHandle>>,
    lookups: AtomicUsize,
}

impl StaticConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, endpoint: Endpoint, handle: PeerHandle) {
        self.handles.lock().insert(endpoint, handle);
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for StaticConnector {
    async fn lookup(&self, endpoint: &Endpoint) -> RpcResult<PeerHandle> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.handles
            .lock()
            .get(endpoint)
            .cloned()
            .ok_or_else(|| RpcError::Unavailable(format!("nothing bound at {endpoint}")))
    }
}

pub fn shared<T: TradingService + 'static>(svc: T) -> (Arc<T>, PeerHandle) {
    let svc = Arc::new(svc);
    let handle: PeerHandle = svc.clone();
    (svc, handle)
}
