use std::sync::Arc;
use std::time::Instant;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;
use squadup_core::{RosterStats, RosterStore};
use tracing::{error, info};

#[derive(Clone)]
pub struct HealthState {
    store: Arc<RosterStore>,
    started_at: Instant,
}

impl HealthState {
    pub fn new(store: Arc<RosterStore>) -> Self {
        Self { store, started_at: Instant::now() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: HealthCheck,
    pub roster: HealthCheck,
    pub uptime_secs: u64,
    pub checked_at: String,
}

pub fn router(store: Arc<RosterStore>) -> Router {
    Router::new().route("/health", get(health)).with_state(HealthState::new(store))
}

pub async fn spawn(bind_address: &str, port: u16, store: Arc<RosterStore>) -> std::io::Result<()> {
    let address = format!("{bind_address}:{port}");
    let listener = tokio::net::TcpListener::bind(&address).await?;

    info!(
        event_name = "system.health.start",
        correlation_id = "bootstrap",
        bind_address = %address,
        "health endpoint started"
    );

    tokio::spawn(async move {
        if let Err(error) = axum::serve(listener, router(store)).await {
            error!(
                event_name = "system.health.error",
                correlation_id = "bootstrap",
                error = %error,
                "health endpoint server terminated unexpectedly"
            );
        }
    });

    Ok(())
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let stats = state.store.stats().await;

    let payload = HealthResponse {
        status: "ready",
        service: HealthCheck {
            status: "ready",
            detail: "squadup-server runtime initialized".to_string(),
        },
        roster: HealthCheck { status: "ready", detail: roster_detail(stats) },
        uptime_secs: state.started_at.elapsed().as_secs(),
        checked_at: Utc::now().to_rfc3339(),
    };

    (StatusCode::OK, Json(payload))
}

fn roster_detail(stats: RosterStats) -> String {
    let RosterStats { tracked, full, in_flight } = stats;
    let noun = if tracked == 1 { "request" } else { "requests" };
    if in_flight == 0 {
        format!("tracking {tracked} match {noun} ({full} full)")
    } else {
        format!("tracking {tracked} match {noun} ({full} full, {in_flight} in flight)")
    }
}
