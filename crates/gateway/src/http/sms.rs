use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Form, Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use tracing::warn;

use crate::app::AppState;
use crate::http::header_str;

/// `POST /webhook/sms/twilio/{path_token}`. The path token picks the
/// adapter instance before any signature is checked — an unknown token
/// never reaches `parse_event`.
pub async fn handle(
    State(state): State<Arc<AppState>>,
    Path(path_token): Path<String>,
    headers: HeaderMap,
    Form(params): Form<HashMap<String, String>>,
) -> impl IntoResponse {
    let Some(adapter) = state.sms.get(&path_token) else {
        return StatusCode::NOT_FOUND;
    };

    let signature = header_str(&headers, "x-twilio-signature").unwrap_or_default();
    let url = format!("{}/webhook/sms/twilio/{path_token}", state.config.http.public_base_url);

    match adapter.parse_event(&url, signature, &params) {
        Ok(Some(inbound)) => {
            state.route_inbound(inbound).await;
            StatusCode::OK
        }
        Ok(None) => StatusCode::OK,
        Err(e) if e.code() == "AUTHENTICATION" => {
            warn!(error = %e, "sms webhook signature rejected");
            StatusCode::UNAUTHORIZED
        }
        Err(e) => {
            warn!(error = %e, "sms webhook payload malformed, acking anyway");
            StatusCode::OK
        }
    }
}
