use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use crate::channel::Channel;

/// Holds the `channel_id → adapter` map the bus dispatches outbound sends
/// through. Unlike the long-lived-connection channels this is adapted
/// from, webhook-driven adapters don't need connect/disconnect lifecycle
/// management here — each adapter manages its own provider client.
#[derive(Default)]
pub struct ChannelManager {
    channels: HashMap<String, Arc<dyn Channel>>,
}

impl ChannelManager {
    pub fn new() -> Self {
        Self { channels: HashMap::new() }
    }

    pub fn register(&mut self, channel: Arc<dyn Channel>) {
        let id = channel.get_channel_id().to_string();
        info!(channel_id = %id, "registering channel adapter");
        self.channels.insert(id, channel);
    }

    pub fn get(&self, channel_id: &str) -> Option<Arc<dyn Channel>> {
        self.channels.get(channel_id).cloned()
    }

    pub fn channel_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.channels.keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use gateway_core::OutboundMessage;

    struct StubChannel(&'static str);

    #[async_trait]
    impl Channel for StubChannel {
        fn get_channel_id(&self) -> &str {
            self.0
        }

        async fn send_message(&self, _message: &OutboundMessage) -> bool {
            true
        }
    }

    #[test]
    fn register_and_lookup() {
        let mut manager = ChannelManager::new();
        manager.register(Arc::new(StubChannel("telegram")));
        assert!(manager.get("telegram").is_some());
        assert!(manager.get("discord").is_none());
        assert_eq!(manager.channel_ids(), vec!["telegram".to_string()]);
    }
}
