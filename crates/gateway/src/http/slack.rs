use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json};
use gateway_core::time::utc_now_s;
use serde_json::json;
use tracing::warn;

use crate::app::AppState;
use crate::http::header_str;

/// `POST /webhook/slack`. Slack expects an ack within 3 seconds, so once a
/// message clears signature verification the rest of the pipeline
/// (middleware, command dispatch, reply) runs in a spawned task.
pub async fn handle(State(state): State<Arc<AppState>>, headers: HeaderMap, body: Bytes) -> impl IntoResponse {
    let Some(adapter) = &state.slack else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let timestamp = header_str(&headers, "x-slack-request-timestamp").unwrap_or_default();
    let signature = header_str(&headers, "x-slack-signature").unwrap_or_default();
    let body_str = match std::str::from_utf8(&body) {
        Ok(s) => s,
        Err(_) => return StatusCode::BAD_REQUEST.into_response(),
    };

    match adapter.parse_event(timestamp, body_str, signature, utc_now_s()) {
        Ok(gateway_slack::SlackParseOutcome::Challenge(challenge)) => {
            Json(json!({ "challenge": challenge })).into_response()
        }
        Ok(gateway_slack::SlackParseOutcome::Ignored) => StatusCode::OK.into_response(),
        Ok(gateway_slack::SlackParseOutcome::Message(inbound)) => {
            let state = state.clone();
            tokio::spawn(async move { state.route_inbound(inbound).await });
            StatusCode::OK.into_response()
        }
        Err(e) if e.code() == "AUTHENTICATION" => {
            warn!(error = %e, "slack webhook signature rejected");
            StatusCode::UNAUTHORIZED.into_response()
        }
        Err(e) => {
            warn!(error = %e, "slack webhook payload malformed");
            StatusCode::OK.into_response()
        }
    }
}
