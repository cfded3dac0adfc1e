use super::{websocket_listener, HubHandle, HubStatus};
use crate::model::{Result, SessionToken, Settings, SettingsPatch};
use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, instrument};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegenerateResponse {
    pub success: bool,
    pub session_key: SessionToken,
}

#[derive(Debug, Serialize)]
pub struct SettingsResponse {
    pub success: bool,
    pub settings: Settings,
}

/// Node handshake on `/` (and `/ws`) plus the administrative API.
#[instrument(skip(hub))]
pub fn create_hub_router(hub: HubHandle) -> Router {
    debug!("Creating hub routes");
    Router::new()
        .route("/", get(websocket_listener::handle_websocket))
        .route("/ws", get(websocket_listener::handle_websocket))
        .route("/api/status", get(status))
        .route("/api/regenerate", post(regenerate))
        .route("/api/settings", post(update_settings))
        .with_state(hub)
}

async fn status(State(hub): State<HubHandle>) -> Result<Json<HubStatus>> {
    Ok(Json(hub.status().await?))
}

async fn regenerate(State(hub): State<HubHandle>) -> Result<Json<RegenerateResponse>> {
    let session_key = hub.rotate().await?;
    info!(%session_key, "New session key generated");
    Ok(Json(RegenerateResponse {
        success: true,
        session_key,
    }))
}

async fn update_settings(
    State(hub): State<HubHandle>,
    Json(body): Json<Value>,
) -> Result<Json<SettingsResponse>> {
    let patch = SettingsPatch::from_value(body)?;
    let settings = hub.update_settings(patch).await?;
    Ok(Json(SettingsResponse {
        success: true,
        settings,
    }))
}
