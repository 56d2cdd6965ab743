//! REST routes over the indexed corpus.
//!
//! - `GET /api/events` - filtered, paginated event listing
//! - `GET /api/stats` - aggregate statistics
//! - `GET /ws` - live event push (see [`super::ws`])
//! - `GET /health` - liveness probe
//!
//! Address filters are normalized to lowercase before matching, so callers
//! may pass checksummed addresses.

use std::fmt;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::middleware;
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::broadcast;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::rate_limit::{IpRateLimiter, rate_limit_middleware};
use super::ws::ws_handler;
use crate::error::ApiError;
use crate::ports::EventStore;
use crate::types::{EthAddress, EventPage, EventQuery, TransferEvent, TransferStats};

/// Upper bound on `pageSize`.
const MAX_PAGE_SIZE: u32 = 500;

// ═══════════════════════════════════════════════════════════════════════════════
// APP STATE
// ═══════════════════════════════════════════════════════════════════════════════

/// Shared state for all routes.
#[derive(Clone)]
pub struct AppState {
    /// Read access to the indexed corpus.
    pub store: Arc<dyn EventStore>,
    /// Live event channel the WebSocket handler subscribes to.
    pub events_tx: broadcast::Sender<TransferEvent>,
    /// IP-keyed request throttle.
    pub limiter: Arc<IpRateLimiter>,
}

impl fmt::Debug for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppState")
            .field("store", &"<EventStore>")
            .field("subscribers", &self.events_tx.receiver_count())
            .field("limiter", &self.limiter)
            .finish()
    }
}

/// Build the API router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/events", get(get_events))
        .route("/api/stats", get(get_stats))
        .route("/ws", get(ws_handler))
        .route("/health", get(health))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ═══════════════════════════════════════════════════════════════════════════════
// HANDLERS
// ═══════════════════════════════════════════════════════════════════════════════

/// Query parameters for `GET /api/events`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct EventsParams {
    from: Option<String>,
    to: Option<String>,
    start_block: Option<u64>,
    end_block: Option<u64>,
    page: u32,
    page_size: u32,
}

impl Default for EventsParams {
    fn default() -> Self {
        Self {
            from: None,
            to: None,
            start_block: None,
            end_block: None,
            page: 1,
            page_size: 50,
        }
    }
}

impl EventsParams {
    fn into_query(self) -> Result<EventQuery, ApiError> {
        if self.page == 0 {
            return Err(ApiError::BadRequest("page must be at least 1".into()));
        }
        if self.page_size == 0 || self.page_size > MAX_PAGE_SIZE {
            return Err(ApiError::BadRequest(format!(
                "pageSize must be between 1 and {MAX_PAGE_SIZE}"
            )));
        }
        if let (Some(start), Some(end)) = (self.start_block, self.end_block)
            && start > end
        {
            return Err(ApiError::BadRequest(
                "startBlock cannot exceed endBlock".into(),
            ));
        }

        let from = parse_address("from", self.from)?;
        let to = parse_address("to", self.to)?;

        Ok(EventQuery {
            from,
            to,
            start_block: self.start_block,
            end_block: self.end_block,
            page: self.page,
            page_size: self.page_size,
        })
    }
}

fn parse_address(name: &str, raw: Option<String>) -> Result<Option<EthAddress>, ApiError> {
    raw.map(|s| {
        EthAddress::from_hex(&s)
            .map_err(|e| ApiError::BadRequest(format!("invalid {name} address: {e}")))
    })
    .transpose()
}

/// `GET /api/events`
async fn get_events(
    State(state): State<AppState>,
    Query(params): Query<EventsParams>,
) -> Result<Json<EventPage>, ApiError> {
    let query = params.into_query()?;
    let page = state.store.get_events(&query).await?;
    Ok(Json(page))
}

/// `GET /api/stats`
async fn get_stats(State(state): State<AppState>) -> Result<Json<TransferStats>, ApiError> {
    let stats = state.store.get_stats().await?;
    Ok(Json(stats))
}

/// `GET /health`
async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════
