use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Form, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use tracing::warn;

use crate::app::AppState;
use crate::http::header_str;

/// `POST /webhook/whatsapp_twilio`. Twilio retries aggressively on
/// non-2xx, so only an authentication failure gets rejected outright —
/// every other outcome (malformed payload, downstream processing error)
/// still acks 200 once the signature has checked out.
pub async fn handle(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Form(params): Form<HashMap<String, String>>,
) -> impl IntoResponse {
    let Some(adapter) = &state.whatsapp else {
        return StatusCode::NOT_FOUND;
    };

    let signature = header_str(&headers, "x-twilio-signature").unwrap_or_default();
    let url = format!("{}/webhook/whatsapp_twilio", state.config.http.public_base_url);

    match adapter.parse_event(&url, signature, &params) {
        Ok(inbound) => {
            state.route_inbound(inbound).await;
            StatusCode::OK
        }
        Err(e) if e.code() == "AUTHENTICATION" => {
            warn!(error = %e, "whatsapp webhook signature rejected");
            StatusCode::UNAUTHORIZED
        }
        Err(e) => {
            warn!(error = %e, "whatsapp webhook payload malformed, acking anyway");
            StatusCode::OK
        }
    }
}
