use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use serde_json::{json, Value};

use crate::app::AppState;

/// `GET /channels/status` — per-channel health summary plus the fixed
/// middleware chain length (§6 "Channel health").
pub async fn status(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "initialized": true,
        "channels": state.registry.list_channels(),
        "middleware_count": state.middleware_count,
    }))
}

/// `GET /channels/manifests`.
pub async fn list_manifests(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({ "manifests": state.registry.list_manifests() }))
}

/// `GET /channels/manifests/{id}`.
pub async fn get_manifest(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> impl IntoResponse {
    match state.registry.get_manifest(&id) {
        Some(manifest) => Json(json!(manifest)).into_response(),
        None => (StatusCode::NOT_FOUND, Json(json!({ "error": format!("unknown channel: {id}") }))).into_response(),
    }
}

/// `POST /channels/manifests/{id}/validate` — body is the proposed config
/// as a flat JSON object; response is `{valid, error?}`.
pub async fn validate_manifest(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(config): Json<HashMap<String, Value>>,
) -> impl IntoResponse {
    match state.registry.validate_config(&id, &config) {
        Ok(()) => Json(json!({ "valid": true })),
        Err(e) => Json(json!({ "valid": false, "error": e.to_string() })),
    }
}

/// `POST /channels/manifests/{id}/test` — structured diagnostic: whether
/// the channel has a manifest, a saved config, and an active adapter
/// registered with the bus. Doesn't perform a live provider round-trip;
/// that would need outbound credentials this endpoint has no business
/// spending.
pub async fn test_manifest(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> impl IntoResponse {
    let Some(manifest) = state.registry.get_manifest(&id) else {
        return (StatusCode::NOT_FOUND, Json(json!({ "error": format!("unknown channel: {id}") }))).into_response();
    };

    let status_row = state.config_store.get_status(&id).ok().flatten();
    let adapter_registered = state.bus.channels().get(&id).is_some();

    Json(json!({
        "channel_id": id,
        "manifest_loaded": true,
        "webhook_paths": manifest.webhook_paths,
        "config_saved": status_row.is_some(),
        "config_status": status_row.as_ref().map(|r| r.status.clone()),
        "config_enabled": status_row.as_ref().map(|r| r.enabled),
        "adapter_registered": adapter_registered,
    }))
    .into_response()
}
