use std::collections::HashMap;

use async_trait::async_trait;
use gateway_core::{InboundMessage, OutboundMessage};
use serde_json::Value;

/// Status of message processing through the middleware chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    Continue,
    Stop,
    Reject,
    Error,
}

/// Threaded through the middleware chain. Middlewares are pure with
/// respect to the message itself and may only mutate this context.
#[derive(Debug, Clone)]
pub struct ProcessingContext {
    pub message_id: String,
    pub channel_id: String,
    pub metadata: HashMap<String, Value>,
    pub status: ProcessingStatus,
    pub error: Option<String>,
}

impl ProcessingContext {
    pub fn new(message_id: impl Into<String>, channel_id: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            channel_id: channel_id.into(),
            metadata: HashMap::new(),
            status: ProcessingStatus::Continue,
            error: None,
        }
    }

    pub fn is_continue(&self) -> bool {
        self.status == ProcessingStatus::Continue
    }

    pub fn set_metadata(&mut self, key: &str, value: impl Into<Value>) {
        self.metadata.insert(key.to_string(), value.into());
    }
}

/// A processing stage in the bus's middleware chain. Execution is strictly
/// sequential in registered order; any status other than `Continue`
/// short-circuits the remaining chain.
#[async_trait]
pub trait Middleware: Send + Sync {
    async fn process_inbound(
        &self,
        message: &InboundMessage,
        context: ProcessingContext,
    ) -> ProcessingContext;

    async fn process_outbound(
        &self,
        message: &OutboundMessage,
        context: ProcessingContext,
    ) -> ProcessingContext;
}
