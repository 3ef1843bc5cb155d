use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, instrument};

use crate::engine::types::PriceMap;
use crate::rpc::wire::{PointUpdate, PriceResponse, RegisterPeerRequest, TradeRequest, TradeResponse};
use crate::rpc::{Connector, Endpoint, PeerHandle, RpcError, RpcResult, TradingService};

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// A broker reached over HTTP.
#[derive(Debug, Clone)]
pub struct RemoteBroker {
    endpoint: Endpoint,
    base_url: Url,
    http: Client,
}

impl RemoteBroker {
    pub fn new(endpoint: Endpoint, http: Client) -> RpcResult<Self> {
        let base_url = Url::parse(&endpoint.base_url())
            .map_err(|e| RpcError::Unavailable(format!("{endpoint}: {e}")))?;
        Ok(Self { endpoint, base_url, http })
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    fn url(&self, segments: &[&str]) -> RpcResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| RpcError::Unavailable(format!("{} cannot carry a path", self.base_url)))?
            .extend(segments);
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(&self, segments: &[&str]) -> RpcResult<T> {
        let resp = self.http.get(self.url(segments)?).send().await?;
        Ok(ensure_success(resp).await?.json::<T>().await?)
    }

    async fn post_json<B, T>(&self, segments: &[&str], body: &B) -> RpcResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let resp = self.http.post(self.url(segments)?).json(body).send().await?;
        Ok(ensure_success(resp).await?.json::<T>().await?)
    }

    async fn post_unit<B: Serialize + ?Sized>(&self, segments: &[&str], body: &B) -> RpcResult<()> {
        let resp = self.http.post(self.url(segments)?).json(body).send().await?;
        ensure_success(resp).await?;
        Ok(())
    }
}

async fn ensure_success(resp: Response) -> RpcResult<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(RpcError::Status { code: status.as_u16(), body })
}

#[async_trait]
impl TradingService for RemoteBroker {
    #[instrument(level = "debug", skip(self), fields(remote = %self.endpoint))]
    async fn buy(&self, symbol: &str, quantity: u64, client_id: &str) -> RpcResult<bool> {
        let req = TradeRequest { symbol: symbol.to_string(), quantity, client_id: client_id.to_string() };
        let resp: TradeResponse = self.post_json(&["buy"], &req).await?;
        Ok(resp.ok)
    }

    #[instrument(level = "debug", skip(self), fields(remote = %self.endpoint))]
    async fn sell(&self, symbol: &str, quantity: u64, client_id: &str) -> RpcResult<bool> {
        let req = TradeRequest { symbol: symbol.to_string(), quantity, client_id: client_id.to_string() };
        let resp: TradeResponse = self.post_json(&["sell"], &req).await?;
        Ok(resp.ok)
    }

    async fn get_price(&self, symbol: &str) -> RpcResult<f64> {
        let resp: PriceResponse = self.get_json(&["price", symbol]).await?;
        Ok(resp.price)
    }

    async fn get_all_prices(&self) -> RpcResult<PriceMap> {
        self.get_json(&["prices"]).await
    }

    #[instrument(level = "debug", skip(self), fields(remote = %self.endpoint))]
    async fn register_peer(&self, peer_id: &str, endpoint: &Endpoint) -> RpcResult<()> {
        let req = RegisterPeerRequest { peer_id: peer_id.to_string(), endpoint: endpoint.clone() };
        self.post_unit(&["peers"], &req).await
    }

    async fn push_update(&self, symbol: &str, new_price: f64, source_broker_id: &str) -> RpcResult<()> {
        let req = PointUpdate {
            symbol: symbol.to_string(),
            new_price,
            source_broker_id: source_broker_id.to_string(),
        };
        self.post_unit(&["update"], &req).await
    }

    async fn sync_bulk(&self, prices: &PriceMap) -> RpcResult<()> {
        debug!(endpoint = %self.endpoint, symbols = prices.len(), "Pushing bulk sync");
        self.post_unit(&["sync"], prices).await
    }

    async fn is_alive(&self) -> RpcResult<bool> {
        self.get_json(&["alive"]).await
    }

    async fn get_broker_id(&self) -> RpcResult<String> {
        self.get_json(&["id"]).await
    }
}

/// Looks brokers up by endpoint and talks to them over HTTP.
#[derive(Debug, Clone)]
pub struct HttpConnector {
    http: Client,
}

impl HttpConnector {
    pub fn new(request_timeout: Duration) -> RpcResult<Self> {
        let http = Client::builder().timeout(request_timeout).build()?;
        Ok(Self { http })
    }
}

#[async_trait]
impl Connector for HttpConnector {
    async fn lookup(&self, endpoint: &Endpoint) -> RpcResult<PeerHandle> {
        let remote = RemoteBroker::new(endpoint.clone(), self.http.clone())?;
        Ok(Arc::new(remote))
    }
}
