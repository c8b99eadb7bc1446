//! Read-only JSON API over the offer store.

use std::sync::Arc;

use axum::{
    extract::{Path as AxumPath, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::Utc;
use dealhub_storage::{OfferStore, PgOfferStore};
use dealhub_sync::{select_reminders, ReminderError, SourceRegistry, SyncConfig};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{error, info};
use uuid::Uuid;

pub const CRATE_NAME: &str = "dealhub-web";

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn OfferStore>,
    pub sources: SourceRegistry,
    pub reminder_days: i64,
}

impl AppState {
    pub fn new(store: Arc<dyn OfferStore>, sources: SourceRegistry) -> Self {
        Self {
            store,
            sources,
            reminder_days: 3,
        }
    }

    pub fn with_reminder_days(mut self, days: i64) -> Self {
        self.reminder_days = days;
        self
    }
}

#[derive(Debug, Deserialize, Default)]
struct ExpiringQuery {
    days: Option<i64>,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/coupons", get(coupons_handler))
        .route("/coupons/expiring", get(expiring_handler))
        .route("/coupons/{id}", get(coupon_detail_handler))
        .route("/sources", get(sources_handler))
        .with_state(Arc::new(state))
}

pub async fn serve(state: AppState, port: u16) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "api listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

pub async fn serve_from_env() -> anyhow::Result<()> {
    let config = SyncConfig::from_env();
    let store = PgOfferStore::connect(&config.database_url).await?;
    let sources = SourceRegistry::load(&config.sources_file).await?;
    let state = AppState::new(Arc::new(store), sources).with_reminder_days(config.reminder_window_days);
    serve(state, config.web_port).await
}

async fn health_handler() -> Response {
    Json(json!({ "status": "ok" })).into_response()
}

async fn coupons_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.store.list_active().await {
        Ok(offers) => Json(offers).into_response(),
        Err(err) => server_error(err),
    }
}

async fn coupon_detail_handler(State(state): State<Arc<AppState>>, AxumPath(id): AxumPath<Uuid>) -> Response {
    match state.store.get(id).await {
        Ok(Some(offer)) => Json(offer).into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, Json(json!({ "error": "coupon not found" }))).into_response(),
        Err(err) => server_error(err),
    }
}

async fn expiring_handler(State(state): State<Arc<AppState>>, Query(query): Query<ExpiringQuery>) -> Response {
    let days = query.days.unwrap_or(state.reminder_days);
    match select_reminders(state.store.as_ref(), Utc::now(), days).await {
        Ok(offers) => Json(offers).into_response(),
        Err(err @ ReminderError::Window(_)) => {
            (StatusCode::BAD_REQUEST, Json(json!({ "error": err.to_string() }))).into_response()
        }
        Err(err) => server_error(err),
    }
}

async fn sources_handler(State(state): State<Arc<AppState>>) -> Response {
    Json(&state.sources).into_response()
}

fn server_error(err: impl std::fmt::Display) -> Response {
    error!(error = %err, "request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": err.to_string() })),
    )
        .into_response()
}
