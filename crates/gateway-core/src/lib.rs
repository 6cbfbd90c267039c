pub mod config;
pub mod error;
pub mod message;
pub mod time;

pub use config::GatewayConfig;
pub use error::GatewayError;
pub use message::{Attachment, AttachmentType, InboundMessage, Location, MessageType, OutboundMessage};
