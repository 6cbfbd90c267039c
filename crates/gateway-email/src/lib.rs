pub mod channel;
pub mod cursor;
pub mod envelope;
pub mod imap_smtp;
pub mod poller;
pub mod provider;

pub use channel::EmailChannelAdapter;
pub use cursor::CursorStore;
pub use envelope::{EmailEnvelope, EnvelopeAttachment};
pub use imap_smtp::ImapSmtpProvider;
pub use poller::EmailPoller;
pub use provider::{EmailProvider, OutboundEmail, SendResult};
