use async_trait::async_trait;
use gateway_core::OutboundMessage;

/// Implemented by every channel adapter (WhatsApp, Telegram, Slack,
/// Discord, Email, SMS). Ingress is adapter-specific (`parse_event`,
/// `parse_update`, `parse_interaction`, `poll`) and deliberately not part
/// of this trait — only the bus-facing send path is uniform.
#[async_trait]
pub trait Channel: Send + Sync {
    fn get_channel_id(&self) -> &str;

    /// Deliver an outbound message through the channel. Returns `false`
    /// (never an error) on delivery failure — the bus records this as
    /// `status=error` in the processing context rather than propagating
    /// a typed error across the adapter boundary.
    async fn send_message(&self, message: &OutboundMessage) -> bool;
}
