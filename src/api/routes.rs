use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::{
    extract::{Query, State as AxumState, WebSocketUpgrade},
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use crate::domain::Trade;
use crate::orchestrator::{Orchestrator, StatusSnapshot};

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
}

#[derive(Debug, Deserialize)]
pub struct TradesQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct TradesResponse {
    pub trades: Vec<Trade>,
    pub total: i64,
}

#[derive(Debug, Serialize)]
pub struct MetricsResponse {
    pub metrics: std::collections::HashMap<String, String>,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub success: bool,
    pub message: String,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/status", get(get_status))
        .route("/api/trades", get(get_trades))
        .route("/api/orderbook", get(get_orderbook))
        .route("/api/market", get(get_market))
        .route("/api/metrics", get(get_metrics))
        .route("/api/panic", post(panic_close))
        .route("/api/halt", post(halt_trading))
        .route("/api/resume", post(resume_trading))
        .route("/api/start", post(start_trading))
        .route("/api/stop", post(stop_trading))
        .route("/ws/live", get(websocket_live))
        .route("/health", get(health_check))
        .route("/", get(root))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn get_status(
    AxumState(state): AxumState<AppState>,
) -> Result<Json<StatusSnapshot>, StatusCode> {
    state.orchestrator.get_status().await.map(Json).map_err(|e| {
        warn!(error = %e, "error getting status");
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

async fn get_trades(
    Query(params): Query<TradesQuery>,
    AxumState(state): AxumState<AppState>,
) -> Result<Json<TradesResponse>, StatusCode> {
    let limit = params.limit.unwrap_or(20);
    let trades = state
        .orchestrator
        .store_handle()
        .get_recent_trades(limit)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    let total = state
        .orchestrator
        .store_handle()
        .get_trade_count()
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(Json(TradesResponse { trades, total }))
}

async fn get_orderbook(
    AxumState(state): AxumState<AppState>,
) -> Result<Json<crate::domain::OrderBook>, StatusCode> {
    let market = state
        .orchestrator
        .store_handle()
        .get_market()
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::NOT_FOUND)?;

    let book = state
        .orchestrator
        .fetch_order_book(&market)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(Json(book))
}

async fn get_market(
    AxumState(state): AxumState<AppState>,
) -> Result<Json<crate::domain::Market>, StatusCode> {
    let market = state
        .orchestrator
        .store_handle()
        .get_market()
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(market))
}

async fn get_metrics(
    AxumState(state): AxumState<AppState>,
) -> Result<Json<MetricsResponse>, StatusCode> {
    let metrics = state
        .orchestrator
        .get_metrics()
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(Json(MetricsResponse { metrics }))
}

async fn panic_close(
    AxumState(state): AxumState<AppState>,
) -> Result<Json<MessageResponse>, StatusCode> {
    state
        .orchestrator
        .panic_close()
        .await
        .map(|_| {
            Json(MessageResponse {
                success: true,
                message: "Emergency liquidation initiated".to_string(),
            })
        })
        .map_err(|e| {
            warn!(error = %e, "panic close failed");
            StatusCode::INTERNAL_SERVER_ERROR
        })
}

async fn halt_trading(
    AxumState(state): AxumState<AppState>,
) -> Result<Json<MessageResponse>, StatusCode> {
    state
        .orchestrator
        .halt_trading()
        .await
        .map(|_| Json(MessageResponse { success: true, message: "Trading halted".to_string() }))
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

async fn resume_trading(
    AxumState(state): AxumState<AppState>,
) -> Result<Json<MessageResponse>, StatusCode> {
    state
        .orchestrator
        .resume_trading()
        .await
        .map(|_| Json(MessageResponse { success: true, message: "Trading resumed".to_string() }))
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

async fn start_trading(
    AxumState(state): AxumState<AppState>,
) -> Result<Json<MessageResponse>, StatusCode> {
    if state.orchestrator.is_running() {
        return Ok(Json(MessageResponse {
            success: false,
            message: "Trading service already running".to_string(),
        }));
    }
    state
        .orchestrator
        .start()
        .await
        .map(|_| {
            Json(MessageResponse {
                success: true,
                message: "Trading service started".to_string(),
            })
        })
        .map_err(|e| {
            warn!(error = %e, "failed to start trading service");
            StatusCode::INTERNAL_SERVER_ERROR
        })
}

async fn stop_trading(
    AxumState(state): AxumState<AppState>,
) -> Result<Json<MessageResponse>, StatusCode> {
    state
        .orchestrator
        .stop()
        .await
        .map(|_| {
            Json(MessageResponse {
                success: true,
                message: "Trading service stopped".to_string(),
            })
        })
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

async fn websocket_live(
    ws: WebSocketUpgrade,
    AxumState(state): AxumState<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| live_stream(socket, state))
}

#[derive(Serialize)]
struct LiveUpdate {
    r#type: &'static str,
    timestamp: String,
    status: Option<StatusSnapshot>,
    metrics: std::collections::HashMap<String, String>,
    last_trade: Option<Trade>,
}

async fn live_stream(mut socket: WebSocket, state: AppState) {
    info!("websocket client connected");
    loop {
        let status = state.orchestrator.get_status().await.ok();
        let metrics = state.orchestrator.get_metrics().await.unwrap_or_default();
        let last_trade = state
            .orchestrator
            .store_handle()
            .get_recent_trades(1)
            .await
            .ok()
            .and_then(|mut v| v.pop());

        let update = LiveUpdate {
            r#type: "update",
            timestamp: chrono::Utc::now().to_rfc3339(),
            status,
            metrics,
            last_trade,
        };

        let payload = match serde_json::to_string(&update) {
            Ok(p) => p,
            Err(_) => break,
        };
        if socket.send(Message::Text(payload)).await.is_err() {
            break;
        }

        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
    }
    info!("websocket client disconnected");
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "gabagool-accumulator",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

async fn root() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "service": "Gabagool Accumulator",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running",
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::store::StateStore;
    use crate::venue::MockVenueClient;
    use tempfile::NamedTempFile;

    async fn test_state() -> AppState {
        let file = NamedTempFile::new().unwrap();
        let store = Arc::new(StateStore::new(file.path().to_str().unwrap()).unwrap());
        let venue = Arc::new(MockVenueClient::new(Default::default()));
        let config = AppConfig::from_env().unwrap();
        AppState {
            orchestrator: Arc::new(Orchestrator::new(store, venue, config)),
        }
    }

    #[tokio::test]
    async fn status_reports_not_running_before_start() {
        let state = test_state().await;
        let status = state.orchestrator.get_status().await.unwrap();
        assert!(!status.running);
        assert!(!status.halted);
    }
}
