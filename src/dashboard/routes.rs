//! Dashboard API route handlers.
//!
//! All endpoints return JSON read straight from the repository. The `/ws`
//! endpoint forwards every repository write event to the client.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, warn};

use crate::storage::Repository;
use crate::types::{Coin, HoldingRecord, ScoutRecord, Trade};

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

pub struct DashboardState {
    pub repo: Arc<dyn Repository>,
    pub strategy: &'static str,
    pub bridge: String,
}

impl DashboardState {
    pub fn new(repo: Arc<dyn Repository>, strategy: &'static str, bridge: impl Into<String>) -> Self {
        Self {
            repo,
            strategy,
            bridge: bridge.into(),
        }
    }
}

pub type AppState = Arc<DashboardState>;

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub strategy: &'static str,
    pub bridge: String,
    pub holding: Option<HoldingRecord>,
    pub open_trades: Vec<Trade>,
}

#[derive(Debug, Deserialize)]
pub struct LimitParams {
    pub limit: Option<i64>,
}

impl LimitParams {
    fn resolve(&self) -> i64 {
        self.limit.unwrap_or(50).clamp(1, 1000)
    }
}

/// Repository failures surface as a 500 with the error text.
pub struct ApiError(anyhow::Error);

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        error!(error = %self.0, "Dashboard query failed");
        (StatusCode::INTERNAL_SERVER_ERROR, self.0.to_string()).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

// ---------------------------------------------------------------------------
// Route handlers
// ---------------------------------------------------------------------------

/// GET /api/status
pub async fn get_status(State(state): State<AppState>) -> ApiResult<StatusResponse> {
    let holding = state.repo.current_holding().await?;
    let open_trades = state.repo.get_open_trades().await?;
    Ok(Json(StatusResponse {
        strategy: state.strategy,
        bridge: state.bridge.clone(),
        holding,
        open_trades,
    }))
}

/// GET /api/trades?limit=N
pub async fn get_trades(
    State(state): State<AppState>,
    Query(params): Query<LimitParams>,
) -> ApiResult<Vec<Trade>> {
    Ok(Json(state.repo.get_trades(params.resolve()).await?))
}

/// GET /api/scout-history?limit=N
pub async fn get_scout_history(
    State(state): State<AppState>,
    Query(params): Query<LimitParams>,
) -> ApiResult<Vec<ScoutRecord>> {
    Ok(Json(state.repo.get_scout_history(params.resolve()).await?))
}

/// GET /api/coins
pub async fn get_coins(State(state): State<AppState>) -> ApiResult<Vec<Coin>> {
    Ok(Json(state.repo.get_coins(false).await?))
}

/// GET /health
pub async fn health() -> StatusCode {
    StatusCode::OK
}

/// GET /ws
pub async fn ws_updates(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| forward_updates(socket, state))
}

async fn forward_updates(socket: WebSocket, state: AppState) {
    let mut rx = state.repo.subscribe();
    let (mut sender, mut receiver) = socket.split();
    debug!("Update stream client connected");

    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Ok(event) => {
                    let Ok(text) = serde_json::to_string(&event) else {
                        continue;
                    };
                    if sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Update stream client lagging, events dropped");
                }
                Err(RecvError::Closed) => break,
            },
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(Message::Ping(data))) => {
                    let _ = sender.send(Message::Pong(data)).await;
                }
                Some(Ok(_)) => {}
            },
        }
    }

    debug!("Update stream client disconnected");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
