use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use gateway_bus::MessageBus;
use gateway_channels::{ChannelConfigStore, ChannelRegistry};
use gateway_commands::CommandProcessor;
use gateway_core::{GatewayConfig, InboundMessage};
use gateway_discord::DiscordAdapter;
use gateway_middleware::PolicyEnforcer;
use gateway_sessions::SessionRouter;
use gateway_slack::SlackAdapter;
use gateway_sms::SmsAdapter;
use gateway_telegram::TelegramAdapter;
use gateway_whatsapp::WhatsAppAdapter;
use tower_http::trace::TraceLayer;
use tracing::debug;

/// Central shared state — passed as `Arc<AppState>` to every handler.
/// Per-channel adapters are kept as dedicated fields (rather than looked
/// up solely through `bus.channels()`) because webhook ingress needs the
/// adapter's `parse_event`/`parse_update`/`parse_interaction` methods,
/// which aren't part of the uniform [`gateway_channels::Channel`] trait.
pub struct AppState {
    pub config: GatewayConfig,
    pub registry: ChannelRegistry,
    pub config_store: ChannelConfigStore,
    pub bus: Arc<MessageBus>,
    pub commands: CommandProcessor,
    pub policy: PolicyEnforcer,
    pub whatsapp: Option<Arc<WhatsAppAdapter>>,
    pub telegram: Option<Arc<TelegramAdapter>>,
    pub slack: Option<Arc<SlackAdapter>>,
    pub discord: Option<Arc<DiscordAdapter>>,
    pub sms: HashMap<String, Arc<SmsAdapter>>,
    pub middleware_count: usize,
}

impl AppState {
    /// Shared tail of the webhook algorithm for every channel whose ingress
    /// doesn't need to defer its HTTP response (WhatsApp, Telegram, Email,
    /// SMS). Runs the message through the bus, and if it survives the
    /// middleware chain and reads as a slash command, dispatches it and
    /// sends the reply back out through the bus.
    pub async fn route_inbound(&self, message: InboundMessage) {
        let channel_id = message.channel_id.clone();
        let user_key = message.user_key.clone();
        let conversation_key = message.conversation_key.clone();

        if let Ok(resolved) = SessionRouter::new(&self.registry).resolve(&message) {
            debug!(
                session_lookup_key = %resolved.session_lookup_key,
                title_hint = ?resolved.title_hint,
                "resolved session routing context"
            );
        }

        let context = self.bus.process_inbound(&message).await;
        if !context.is_continue() {
            return;
        }

        let Some(text) = message.text.as_deref() else { return };
        if !CommandProcessor::is_command(text) {
            return;
        }

        let reply = self.commands.process_command(text, &channel_id, &user_key, &conversation_key);
        self.bus.send_outbound(&reply).await;
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/webhook/whatsapp_twilio", post(crate::http::whatsapp::handle))
        .route("/webhook/telegram", post(crate::http::telegram::handle))
        .route("/webhook/slack", post(crate::http::slack::handle))
        .route("/webhook/discord/interactions", post(crate::http::discord::handle))
        .route("/webhook/sms/twilio/{path_token}", post(crate::http::sms::handle))
        .route("/channels/status", get(crate::http::management::status))
        .route("/channels/manifests", get(crate::http::management::list_manifests))
        .route("/channels/manifests/{id}", get(crate::http::management::get_manifest))
        .route("/channels/manifests/{id}/validate", post(crate::http::management::validate_manifest))
        .route("/channels/manifests/{id}/test", post(crate::http::management::test_manifest))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
