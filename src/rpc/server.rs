use std::future::Future;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::engine::types::PriceMap;
use crate::rpc::wire::{PointUpdate, PriceResponse, RegisterPeerRequest, TradeRequest, TradeResponse};
use crate::rpc::{PeerHandle, RpcError, SERVICE_NAME};

struct ApiError(RpcError);

impl From<RpcError> for ApiError {
    fn from(err: RpcError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        warn!(error = %self.0, "Request failed");
        (StatusCode::BAD_GATEWAY, self.0.to_string()).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// Routes for one broker, published under `/TradingService`.
pub fn router(service: PeerHandle) -> Router {
    let api = Router::new()
        .route("/buy", post(buy))
        .route("/sell", post(sell))
        .route("/price/:symbol", get(price))
        .route("/prices", get(all_prices))
        .route("/peers", post(register_peer))
        .route("/update", post(push_update))
        .route("/sync", post(sync_bulk))
        .route("/alive", get(alive))
        .route("/id", get(broker_id));

    Router::new()
        .nest(&format!("/{SERVICE_NAME}"), api)
        .layer(TraceLayer::new_for_http())
        .with_state(service)
}

pub async fn serve(listener: TcpListener, service: PeerHandle) -> std::io::Result<()> {
    serve_with_shutdown(listener, service, std::future::pending()).await
}

pub async fn serve_with_shutdown<F>(listener: TcpListener, service: PeerHandle, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    info!(addr = ?listener.local_addr().ok(), service = SERVICE_NAME, "Serving broker");
    axum::serve(listener, router(service)).with_graceful_shutdown(shutdown).await
}

async fn buy(State(svc): State<PeerHandle>, Json(req): Json<TradeRequest>) -> ApiResult<Json<TradeResponse>> {
    let ok = svc.buy(&req.symbol, req.quantity, &req.client_id).await?;
    Ok(Json(TradeResponse { ok }))
}

async fn sell(State(svc): State<PeerHandle>, Json(req): Json<TradeRequest>) -> ApiResult<Json<TradeResponse>> {
    let ok = svc.sell(&req.symbol, req.quantity, &req.client_id).await?;
    Ok(Json(TradeResponse { ok }))
}

async fn price(State(svc): State<PeerHandle>, Path(symbol): Path<String>) -> ApiResult<Json<PriceResponse>> {
    let price = svc.get_price(&symbol).await?;
    Ok(Json(PriceResponse { price }))
}

async fn all_prices(State(svc): State<PeerHandle>) -> ApiResult<Json<PriceMap>> {
    Ok(Json(svc.get_all_prices().await?))
}

async fn register_peer(
    State(svc): State<PeerHandle>,
    Json(req): Json<RegisterPeerRequest>,
) -> ApiResult<StatusCode> {
    svc.register_peer(&req.peer_id, &req.endpoint).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn push_update(State(svc): State<PeerHandle>, Json(update): Json<PointUpdate>) -> ApiResult<StatusCode> {
    svc.push_update(&update.symbol, update.new_price, &update.source_broker_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn sync_bulk(State(svc): State<PeerHandle>, Json(prices): Json<PriceMap>) -> ApiResult<StatusCode> {
    svc.sync_bulk(&prices).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn alive(State(svc): State<PeerHandle>) -> ApiResult<Json<bool>> {
    Ok(Json(svc.is_alive().await?))
}

async fn broker_id(State(svc): State<PeerHandle>) -> ApiResult<Json<String>> {
    Ok(Json(svc.get_broker_id().await?))
}
