use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

use crate::engine::Engine;
use crate::state::DeviceState;
use crate::supervisor::LinkState;

pub type SharedEngine = Arc<Engine>;

#[derive(Debug, Serialize)]
struct StateView {
    link: LinkState,
    light_slider: f32,
    device: DeviceState,
}

#[derive(Debug, Deserialize)]
struct LightRequest {
    level: f32,
}

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

pub fn router(engine: SharedEngine) -> Router {
    Router::new()
        .route("/api/state", get(api_state))
        .route("/api/connect", post(api_connect))
        .route("/api/water", post(api_water))
        .route("/api/water-date", post(api_water_date))
        .route("/api/override", post(api_override))
        .route("/api/light", post(api_light))
        .with_state(engine)
}

async fn api_state(State(engine): State<SharedEngine>) -> impl IntoResponse {
    Json(StateView {
        link: engine.link_state(),
        light_slider: engine.light_slider(),
        device: (*engine.snapshot()).clone(),
    })
}

async fn api_connect(State(engine): State<SharedEngine>) -> StatusCode {
    engine.connect();
    StatusCode::ACCEPTED
}

async fn api_water(State(engine): State<SharedEngine>) -> StatusCode {
    engine.water();
    StatusCode::ACCEPTED
}

async fn api_water_date(State(engine): State<SharedEngine>) -> StatusCode {
    engine.request_last_water_date();
    StatusCode::ACCEPTED
}

async fn api_override(State(engine): State<SharedEngine>) -> StatusCode {
    engine.toggle_light_override();
    StatusCode::ACCEPTED
}

async fn api_light(
    State(engine): State<SharedEngine>,
    Json(req): Json<LightRequest>,
) -> impl IntoResponse {
    if !req.level.is_finite() {
        return (StatusCode::UNPROCESSABLE_ENTITY, "level must be a finite number");
    }
    engine.set_light_level(req.level);
    (StatusCode::ACCEPTED, "")
}

// ---------------------------------------------------------------------------
// Server entry-point
// ---------------------------------------------------------------------------

pub async fn serve(engine: SharedEngine, port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind web port {port}"))?;

    info!(%addr, "control api listening");

    axum::serve(listener, router(engine))
        .await
        .context("web server error")
}

// ===========================================================================
// Tests
// ===========================================================================
