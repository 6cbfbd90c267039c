use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use tracing::warn;

use crate::app::AppState;
use crate::http::header_str;

/// `POST /webhook/telegram`. Always returns 200 — Telegram disables a
/// webhook after enough non-2xx responses, and there's nothing the sender
/// can do differently on retry for a malformed update or a bad secret
/// token, so there is no value in distinguishing the failure modes here.
pub async fn handle(State(state): State<Arc<AppState>>, headers: HeaderMap, body: Bytes) -> impl IntoResponse {
    let Some(adapter) = &state.telegram else {
        return StatusCode::NOT_FOUND;
    };

    let secret = header_str(&headers, "x-telegram-bot-api-secret-token").unwrap_or_default();
    let body_str = match std::str::from_utf8(&body) {
        Ok(s) => s,
        Err(_) => return StatusCode::OK,
    };

    match adapter.parse_update(secret, body_str) {
        Ok(Some(inbound)) => {
            state.route_inbound(inbound).await;
        }
        Ok(None) => {}
        Err(e) => warn!(error = %e, "telegram webhook rejected, acking anyway"),
    }
    StatusCode::OK
}
