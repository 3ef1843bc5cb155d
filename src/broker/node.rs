use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};

use crate::broker::peers::{FanOutReport, PeerSet};
use crate::engine::catalog::StockCatalog;
use crate::engine::types::{PriceMap, StockRecord, TradeSide};
use crate::rpc::{Connector, Endpoint, PeerHandle, RpcError, RpcResult, TradingService};

/// One broker process: its catalog, the peers it replicates to, and the
/// connector used to turn peer endpoints into handles.
pub struct BrokerNode {
    broker_id: String,
    endpoint: Option<Endpoint>,
    catalog: StockCatalog,
    peers: Arc<PeerSet>,
    connector: Arc<dyn Connector>,
    replication: Mutex<Vec<JoinHandle<FanOutReport>>>,
}

impl BrokerNode {
    pub fn new(
        broker_id: impl Into<String>,
        seed: impl IntoIterator<Item = StockRecord>,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let broker_id = broker_id.into();
        Self {
            catalog: StockCatalog::with_seed(broker_id.clone(), seed),
            peers: Arc::new(PeerSet::new(broker_id.clone())),
            broker_id,
            endpoint: None,
            connector,
            replication: Mutex::new(Vec::new()),
        }
    }

    /// The address other brokers should use to reach this node.
    pub fn with_endpoint(mut self, endpoint: Endpoint) -> Self {
        self.endpoint = Some(endpoint);
        self
    }

    pub fn broker_id(&self) -> &str {
        &self.broker_id
    }

    pub fn endpoint(&self) -> Option<&Endpoint> {
        self.endpoint.as_ref()
    }

    pub fn catalog(&self) -> &StockCatalog {
        &self.catalog
    }

    /// Read-only view of current peer membership.
    pub fn peer_ids(&self) -> Vec<String> {
        self.peers.ids()
    }

    pub fn status(&self) -> Vec<StockRecord> {
        self.catalog.records()
    }

    pub fn log_status(&self) {
        info!(broker = %self.broker_id, peers = ?self.peer_ids(), "Stock status");
        for record in self.status() {
            info!(
                broker = %self.broker_id,
                symbol = %record.symbol,
                price = %format!("{:.2}", record.price),
                qty = record.available_quantity,
                "  stock"
            );
        }
    }

    /// Run a local trade and, if it went through, replicate the new price.
    /// Replication runs in the background; the result never depends on it.
    #[instrument(skip(self), fields(broker = %self.broker_id))]
    pub fn trade(&self, side: TradeSide, symbol: &str, qty: u64, client_id: &str) -> bool {
        let updated = match side {
            TradeSide::Buy => self.catalog.execute_buy(symbol, qty, client_id).ok(),
            TradeSide::Sell => Some(self.catalog.execute_sell(symbol, qty, client_id)),
        };
        let outcome = if updated.is_some() { "filled" } else { "rejected" };
        metrics::counter!("stockmesh_trades_total", "side" => side.as_str(), "outcome" => outcome).increment(1);

        match updated {
            Some(record) => {
                self.replicate(record.symbol, record.price);
                true
            }
            None => false,
        }
    }

    pub fn buy_stock(&self, symbol: &str, qty: u64, client_id: &str) -> bool {
        self.trade(TradeSide::Buy, symbol, qty, client_id)
    }

    pub fn sell_stock(&self, symbol: &str, qty: u64, client_id: &str) -> bool {
        self.trade(TradeSide::Sell, symbol, qty, client_id)
    }

    pub fn price(&self, symbol: &str) -> f64 {
        self.catalog.get(symbol).map_or(0.0, |r| r.price)
    }

    pub fn all_prices(&self) -> PriceMap {
        self.catalog.prices()
    }

    /// Add `peer_id` and push it a snapshot of current prices.
    ///
    /// Returns false, without pushing anything, when the id is this node or
    /// already known. A peer that fails the snapshot push is evicted straight
    /// away, same as a failed point update.
    #[instrument(skip(self, handle), fields(broker = %self.broker_id))]
    pub async fn register_peer_handle(&self, peer_id: &str, handle: PeerHandle) -> bool {
        if !self.peers.insert(peer_id, handle.clone()) {
            return false;
        }
        let snapshot = self.catalog.prices();
        match handle.sync_bulk(&snapshot).await {
            Ok(()) => info!(peer = peer_id, symbols = snapshot.len(), "Sent bootstrap sync"),
            Err(e) => self.peers.evict(peer_id, &e),
        }
        true
    }

    /// Ask the broker at `endpoint` to start replicating to this node.
    /// Returns the remote broker's id.
    pub async fn connect_to_peer(&self, endpoint: &Endpoint) -> RpcResult<String> {
        let own = self
            .endpoint
            .as_ref()
            .ok_or_else(|| RpcError::Unavailable(format!("{} has no advertised endpoint", self.broker_id)))?;
        let remote = self.connector.lookup(endpoint).await?;
        remote.register_peer(&self.broker_id, own).await?;
        let remote_id = remote.get_broker_id().await?;
        info!(broker = %self.broker_id, peer = %remote_id, %endpoint, "Connected to broker");
        Ok(remote_id)
    }

    /// Wait for every in-flight fan-out and collect the reports.
    pub async fn flush_replication(&self) -> Vec<FanOutReport> {
        let pending: Vec<_> = std::mem::take(&mut *self.replication.lock());
        let mut reports = Vec::with_capacity(pending.len());
        for handle in pending {
            match handle.await {
                Ok(report) => reports.push(report),
                Err(e) => warn!(broker = %self.broker_id, error = %e, "Replication task failed"),
            }
        }
        reports
    }

    fn replicate(&self, symbol: String, new_price: f64) {
        if self.peers.is_empty() {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(broker = %self.broker_id, %symbol, "No runtime available, skipping replication");
            return;
        };
        let peers = self.peers.clone();
        let task = runtime.spawn(async move { peers.fan_out(&symbol, new_price).await });

        let mut pending = self.replication.lock();
        pending.retain(|h| !h.is_finished());
        pending.push(task);
    }
}

#[async_trait]
impl TradingService for BrokerNode {
    async fn buy(&self, symbol: &str, quantity: u64, client_id: &str) -> RpcResult<bool> {
        Ok(self.buy_stock(symbol, quantity, client_id))
    }

    async fn sell(&self, symbol: &str, quantity: u64, client_id: &str) -> RpcResult<bool> {
        Ok(self.sell_stock(symbol, quantity, client_id))
    }

    async fn get_price(&self, symbol: &str) -> RpcResult<f64> {
        Ok(self.price(symbol))
    }

    async fn get_all_prices(&self) -> RpcResult<PriceMap> {
        Ok(self.all_prices())
    }

    async fn register_peer(&self, peer_id: &str, endpoint: &Endpoint) -> RpcResult<()> {
        if peer_id == self.broker_id || self.peers.contains(peer_id) {
            return Ok(());
        }
        let handle = self.connector.lookup(endpoint).await?;
        self.register_peer_handle(peer_id, handle).await;
        Ok(())
    }

    async fn push_update(&self, symbol: &str, new_price: f64, source_broker_id: &str) -> RpcResult<()> {
        self.catalog.apply_remote_update(symbol, new_price, source_broker_id);
        Ok(())
    }

    async fn sync_bulk(&self, prices: &PriceMap) -> RpcResult<()> {
        self.catalog.merge_bulk(prices);
        Ok(())
    }

    async fn is_alive(&self) -> RpcResult<bool> {
        Ok(true)
    }

    async fn get_broker_id(&self) -> RpcResult<String> {
        Ok(self.broker_id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_seed;
    use crate::testing::{shared, FailingPeer, RecordingPeer, StaticConnector};

    fn node(id: &str) -> BrokerNode {
        BrokerNode::new(id, default_seed(), Arc::new(StaticConnector::new()))
    }

    #[tokio::test]
    async fn test_trade_replicates_to_peers() {
        let node = node("broker1");
        let (peer, handle) = shared(RecordingPeer::new("broker2"));
        node.register_peer_handle("broker2", handle).await;

        assert!(node.buy_stock("AAPL", 10, "c1"));
        assert!(node.sell_stock("AAPL", 5, "c1"));
        node.flush_replication().await;

        let updates = peer.updates();
        assert_eq!(updates.len(), 2);
        assert!((updates[0].1 - 151.5).abs() < 1e-9);
        assert!((updates[1].1 - 151.12125).abs() < 1e-9);
        assert!(updates.iter().all(|(s, _, src)| s == "AAPL" && src == "broker1"));
    }

    #[tokio::test]
    async fn test_rejected_trade_is_not_replicated() {
        let node = node("broker1");
        let (peer, handle) = shared(RecordingPeer::new("broker2"));
        node.register_peer_handle("broker2", handle).await;

        assert!(!node.buy_stock("AMZN", 301, "c1"));
        assert!(!node.buy_stock("NOPE", 1, "c1"));
        node.flush_replication().await;

        assert!(peer.updates().is_empty());
    }

    #[tokio::test]
    async fn test_register_pushes_full_snapshot_once() {
        let node = node("broker1");
        node.sell_stock("NFLX", 3, "c1");
        let (peer, handle) = shared(RecordingPeer::new("broker2"));

        assert!(node.register_peer_handle("broker2", handle.clone()).await);
        assert!(!node.register_peer_handle("broker2", handle).await);

        let syncs = peer.syncs();
        assert_eq!(syncs.len(), 1);
        assert_eq!(syncs[0], node.all_prices());
        assert_eq!(
            syncs[0].keys().cloned().collect::<Vec<_>>(),
            vec!["AAPL", "AMZN", "GOOGL", "MSFT", "NFLX", "TSLA"]
        );
        assert_eq!(node.peer_ids(), vec!["broker2".to_string()]);
    }

    #[tokio::test]
    async fn test_register_self_is_noop() {
        let node = node("broker1");
        let (peer, handle) = shared(RecordingPeer::new("broker1"));
        assert!(!node.register_peer_handle("broker1", handle).await);
        assert!(peer.syncs().is_empty());
        assert!(node.peer_ids().is_empty());
    }

    #[tokio::test]
    async fn test_failed_bootstrap_evicts_peer() {
        let node = node("broker1");
        node.register_peer_handle("broker2", Arc::new(FailingPeer)).await;
        assert!(node.peer_ids().is_empty());
    }

    #[tokio::test]
    async fn test_dead_peer_evicted_after_trade() {
        let node = node("broker1");
        let (healthy, handle) = shared(RecordingPeer::new("broker2"));
        node.register_peer_handle("broker2", handle).await;
        // Registered through the set directly so the bootstrap push cannot evict it first.
        node.peers.insert("broker3", Arc::new(FailingPeer));

        assert!(node.buy_stock("MSFT", 1, "c1"));
        let reports = node.flush_replication().await;
        assert_eq!(reports[0].evicted, vec!["broker3".to_string()]);
        assert_eq!(node.peer_ids(), vec!["broker2".to_string()]);

        assert!(node.sell_stock("MSFT", 1, "c1"));
        let reports = node.flush_replication().await;
        assert_eq!(reports[0], FanOutReport { delivered: 1, evicted: vec![] });
        assert_eq!(healthy.updates().len(), 2);
    }

    #[tokio::test]
    async fn test_rpc_register_resolves_endpoint() {
        let connector = Arc::new(StaticConnector::new());
        let (peer, handle) = shared(RecordingPeer::new("broker2"));
        let ep = Endpoint::new("localhost", 1100);
        connector.add(ep.clone(), handle);
        let node = BrokerNode::new("broker1", default_seed(), connector.clone());

        node.register_peer("broker2", &ep).await.unwrap();
        node.register_peer("broker2", &ep).await.unwrap();
        node.register_peer("broker1", &ep).await.unwrap();

        assert_eq!(connector.lookups(), 1);
        assert_eq!(peer.syncs().len(), 1);
    }

    #[tokio::test]
    async fn test_rpc_register_unknown_endpoint_fails() {
        let node = node("broker1");
        let err = node.register_peer("broker9", &Endpoint::new("nowhere", 1)).await;
        assert!(matches!(err, Err(RpcError::Unavailable(_))));
        assert!(node.peer_ids().is_empty());
    }

    #[tokio::test]
    async fn test_remote_update_and_sync() {
        let node = node("broker1");
        node.push_update("AAPL", 99.0, "broker2").await.unwrap();
        node.push_update("AAPL", 5.0, "broker1").await.unwrap();
        assert_eq!(node.get_price("AAPL").await.unwrap(), 99.0);

        let incoming: PriceMap = [("AAPL".to_string(), 50.0), ("TSLA".to_string(), 800.0)].into_iter().collect();
        node.sync_bulk(&incoming).await.unwrap();
        assert_eq!(node.price("AAPL"), 99.0);
        assert_eq!(node.price("TSLA"), 800.0);
        assert_eq!(node.price("UNKNOWN"), 0.0);
    }

    #[tokio::test]
    async fn test_connect_to_peer_registers_self_remotely() {
        let connector = Arc::new(StaticConnector::new());
        let remote_ep = Endpoint::new("localhost", 1100);
        let own_ep = Endpoint::new("localhost", 1099);

        let remote = Arc::new(BrokerNode::new("broker2", Vec::new(), connector.clone()));
        let local =
            Arc::new(BrokerNode::new("broker1", default_seed(), connector.clone()).with_endpoint(own_ep.clone()));
        connector.add(remote_ep.clone(), remote.clone());
        connector.add(own_ep, local.clone());

        assert_eq!(local.connect_to_peer(&remote_ep).await.unwrap(), "broker2");
        assert_eq!(remote.peer_ids(), vec!["broker1".to_string()]);
        assert!(local.peer_ids().is_empty());

        // broker2 bootstrapped broker1 with its (empty) catalog; a trade on broker2 reaches broker1.
        assert!(remote.sell_stock("AAPL", 10, "c1"));
        remote.flush_replication().await;
        assert!((local.price("AAPL") - 100.0 * (1.0 - 10.0 * 0.0005)).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_connect_without_endpoint_fails() {
        let node = node("broker1");
        assert!(node.connect_to_peer(&Endpoint::new("localhost", 1100)).await.is_err());
    }
}
