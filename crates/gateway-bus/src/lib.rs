use std::sync::Arc;

use gateway_channels::ChannelManager;
use gateway_core::time::utc_now_s;
use gateway_core::{InboundMessage, OutboundMessage};
use gateway_middleware::{Middleware, ProcessingContext, ProcessingStatus};
use tracing::{debug, error, info};

type InboundHandler = Box<dyn Fn(&InboundMessage) + Send + Sync>;

/// Central message bus: routes inbound and outbound messages through an
/// ordered middleware chain and then to the registered channel adapter.
/// Execution is strictly sequential — any middleware returning a status
/// other than [`ProcessingStatus::Continue`] short-circuits the rest of
/// the chain.
pub struct MessageBus {
    middleware: Vec<Arc<dyn Middleware>>,
    channels: ChannelManager,
    inbound_handlers: Vec<InboundHandler>,
}

impl MessageBus {
    pub fn new(channels: ChannelManager) -> Self {
        Self {
            middleware: Vec::new(),
            channels,
            inbound_handlers: Vec::new(),
        }
    }

    pub fn add_middleware(&mut self, middleware: Arc<dyn Middleware>) {
        self.middleware.push(middleware);
    }

    pub fn add_inbound_handler(&mut self, handler: impl Fn(&InboundMessage) + Send + Sync + 'static) {
        self.inbound_handlers.push(Box::new(handler));
    }

    pub fn channels(&self) -> &ChannelManager {
        &self.channels
    }

    pub async fn process_inbound(&self, message: &InboundMessage) -> ProcessingContext {
        let mut context = ProcessingContext::new(message.message_id.clone(), message.channel_id.clone());

        debug!(message_id = %message.message_id, channel_id = %message.channel_id, "processing inbound message");

        for middleware in &self.middleware {
            context = middleware.process_inbound(message, context).await;

            match context.status {
                ProcessingStatus::Stop | ProcessingStatus::Reject => {
                    info!(
                        message_id = %message.message_id,
                        status = ?context.status,
                        "inbound message short-circuited"
                    );
                    return context;
                }
                ProcessingStatus::Error => {
                    error!(
                        message_id = %message.message_id,
                        error = ?context.error,
                        "error processing inbound message"
                    );
                    return context;
                }
                ProcessingStatus::Continue => {}
            }
        }

        for handler in &self.inbound_handlers {
            handler(message);
        }

        debug!(message_id = %message.message_id, "inbound message processed successfully");
        context
    }

    pub async fn send_outbound(&self, message: &OutboundMessage) -> ProcessingContext {
        let synthetic_id = format!("out_{}_{}", message.channel_id, utc_now_s());
        let mut context = ProcessingContext::new(synthetic_id, message.channel_id.clone());

        debug!(channel_id = %message.channel_id, "sending outbound message");

        for middleware in &self.middleware {
            context = middleware.process_outbound(message, context).await;

            match context.status {
                ProcessingStatus::Stop | ProcessingStatus::Reject => {
                    info!(
                        message_id = %context.message_id,
                        status = ?context.status,
                        "outbound message short-circuited"
                    );
                    return context;
                }
                ProcessingStatus::Error => {
                    error!(
                        message_id = %context.message_id,
                        error = ?context.error,
                        "error processing outbound message"
                    );
                    return context;
                }
                ProcessingStatus::Continue => {}
            }
        }

        let Some(adapter) = self.channels.get(&message.channel_id) else {
            error!(channel_id = %message.channel_id, "no adapter registered for channel");
            context.status = ProcessingStatus::Error;
            context.error = Some(format!("no adapter for channel: {}", message.channel_id));
            return context;
        };

        if adapter.send_message(message).await {
            debug!(channel_id = %message.channel_id, "outbound message sent");
        } else {
            context.status = ProcessingStatus::Error;
            context.error = Some("adapter failed to send message".to_string());
        }

        context
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use gateway_channels::Channel;
    use gateway_core::MessageType;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    struct StubChannel {
        id: &'static str,
        should_succeed: bool,
    }

    #[async_trait]
    impl Channel for StubChannel {
        fn get_channel_id(&self) -> &str {
            self.id
        }

        async fn send_message(&self, _message: &OutboundMessage) -> bool {
            self.should_succeed
        }
    }

    struct RejectingMiddleware;

    #[async_trait]
    impl Middleware for RejectingMiddleware {
        async fn process_inbound(&self, _message: &InboundMessage, mut context: ProcessingContext) -> ProcessingContext {
            context.status = ProcessingStatus::Reject;
            context.error = Some("rejected".to_string());
            context
        }

        async fn process_outbound(&self, _message: &OutboundMessage, context: ProcessingContext) -> ProcessingContext {
            context
        }
    }

    struct CountingMiddleware(Arc<AtomicUsize>);

    #[async_trait]
    impl Middleware for CountingMiddleware {
        async fn process_inbound(&self, _message: &InboundMessage, context: ProcessingContext) -> ProcessingContext {
            self.0.fetch_add(1, Ordering::SeqCst);
            context
        }

        async fn process_outbound(&self, _message: &OutboundMessage, context: ProcessingContext) -> ProcessingContext {
            self.0.fetch_add(1, Ordering::SeqCst);
            context
        }
    }

    fn inbound() -> InboundMessage {
        InboundMessage::new(
            "telegram",
            "u1",
            "u1",
            "m1",
            chrono::Utc::now(),
            MessageType::Text,
            Some("hi".into()),
            vec![],
            None,
            serde_json::Value::Null,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn middleware_short_circuits_on_reject() {
        let mut bus = MessageBus::new(ChannelManager::new());
        let count = Arc::new(AtomicUsize::new(0));
        bus.add_middleware(Arc::new(RejectingMiddleware));
        bus.add_middleware(Arc::new(CountingMiddleware(count.clone())));

        let context = bus.process_inbound(&inbound()).await;
        assert_eq!(context.status, ProcessingStatus::Reject);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn inbound_handlers_run_after_middleware_passes() {
        let mut bus = MessageBus::new(ChannelManager::new());
        let called = Arc::new(AtomicBool::new(false));
        let called_clone = called.clone();
        bus.add_inbound_handler(move |_msg| called_clone.store(true, Ordering::SeqCst));

        let context = bus.process_inbound(&inbound()).await;
        assert!(context.is_continue());
        assert!(called.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn send_outbound_errors_when_no_adapter_registered() {
        let bus = MessageBus::new(ChannelManager::new());
        let message = OutboundMessage::text("telegram", "u1", "u1", "hi");
        let context = bus.send_outbound(&message).await;
        assert_eq!(context.status, ProcessingStatus::Error);
        assert!(context.error.unwrap().contains("no adapter"));
    }

    #[tokio::test]
    async fn send_outbound_reports_adapter_failure() {
        let mut channels = ChannelManager::new();
        channels.register(Arc::new(StubChannel { id: "telegram", should_succeed: false }));
        let bus = MessageBus::new(channels);

        let message = OutboundMessage::text("telegram", "u1", "u1", "hi");
        let context = bus.send_outbound(&message).await;
        assert_eq!(context.status, ProcessingStatus::Error);
    }

    #[tokio::test]
    async fn send_outbound_succeeds_through_registered_adapter() {
        let mut channels = ChannelManager::new();
        channels.register(Arc::new(StubChannel { id: "telegram", should_succeed: true }));
        let bus = MessageBus::new(channels);

        let message = OutboundMessage::text("telegram", "u1", "u1", "hi");
        let context = bus.send_outbound(&message).await;
        assert!(context.is_continue());
    }

    #[tokio::test]
    async fn middleware_order_is_preserved() {
        let mut bus = MessageBus::new(ChannelManager::new());
        let order = Arc::new(StdMutex::new(Vec::new()));

        struct TaggingMiddleware(&'static str, Arc<StdMutex<Vec<&'static str>>>);
        #[async_trait]
        impl Middleware for TaggingMiddleware {
            async fn process_inbound(&self, _m: &InboundMessage, context: ProcessingContext) -> ProcessingContext {
                self.1.lock().unwrap().push(self.0);
                context
            }
            async fn process_outbound(&self, _m: &OutboundMessage, context: ProcessingContext) -> ProcessingContext {
                context
            }
        }

        bus.add_middleware(Arc::new(TaggingMiddleware("first", order.clone())));
        bus.add_middleware(Arc::new(TaggingMiddleware("second", order.clone())));
        bus.process_inbound(&inbound()).await;

        assert_eq!(*order.lock().unwrap(), vec!["first", "second"]);
    }
}
