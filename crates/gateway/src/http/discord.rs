use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json};
use serde_json::json;
use tracing::warn;

use crate::app::AppState;
use crate::http::header_str;

const INTERACTION_TYPE_PONG: i64 = 1;
const INTERACTION_TYPE_DEFERRED_CHANNEL_MESSAGE: i64 = 5;

/// `POST /webhook/discord/interactions`. Discord requires an ack within 3
/// seconds, so an application command is acknowledged with a "deferred"
/// response type and the actual command processing (plus the edit to the
/// deferred reply) happens in a spawned task. Discord's `Channel::send_message`
/// is a v1 no-op, so the reply goes out through `edit_original_response`
/// directly rather than `bus.send_outbound`.
pub async fn handle(State(state): State<Arc<AppState>>, headers: HeaderMap, body: Bytes) -> impl IntoResponse {
    let Some(adapter) = state.discord.clone() else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let signature = header_str(&headers, "x-signature-ed25519").unwrap_or_default();
    let timestamp = header_str(&headers, "x-signature-timestamp").unwrap_or_default();
    let body_str = match std::str::from_utf8(&body) {
        Ok(s) => s,
        Err(_) => return StatusCode::BAD_REQUEST.into_response(),
    };

    match adapter.parse_interaction(signature, timestamp, body_str) {
        Ok(gateway_discord::DiscordOutcome::Pong) => {
            Json(json!({ "type": INTERACTION_TYPE_PONG })).into_response()
        }
        Ok(gateway_discord::DiscordOutcome::Ignored) => StatusCode::OK.into_response(),
        Ok(gateway_discord::DiscordOutcome::Deferred { application_id, token, message }) => {
            let state = state.clone();
            let adapter = adapter.clone();
            tokio::spawn(async move {
                let channel_id = message.channel_id.clone();
                let user_key = message.user_key.clone();
                let conversation_key = message.conversation_key.clone();

                let context = state.bus.process_inbound(&message).await;
                if !context.is_continue() {
                    return;
                }

                let Some(text) = message.text.as_deref() else { return };
                let reply = state.commands.process_command(text, &channel_id, &user_key, &conversation_key);
                let reply_text = reply.text.unwrap_or_default();
                if !adapter.edit_original_response(&application_id, &token, &reply_text).await {
                    warn!(channel_id = %channel_id, "failed to edit deferred discord response");
                }
            });
            Json(json!({ "type": INTERACTION_TYPE_DEFERRED_CHANNEL_MESSAGE })).into_response()
        }
        Err(e) if e.code() == "AUTHENTICATION" => {
            warn!(error = %e, "discord interaction signature rejected");
            StatusCode::UNAUTHORIZED.into_response()
        }
        Err(e) => {
            warn!(error = %e, "discord interaction payload malformed");
            StatusCode::BAD_REQUEST.into_response()
        }
    }
}
