use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use gateway_bus::MessageBus;
use gateway_core::time::{from_epoch_ms, to_epoch_ms, utc_now_ms};
use gateway_core::{InboundMessage, MessageType};
use gateway_core::Result;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::cursor::CursorStore;
use crate::envelope::EmailEnvelope;
use crate::provider::EmailProvider;

const MIN_POLL_INTERVAL_SECS: u64 = 30;
const MAX_POLL_INTERVAL_SECS: u64 = 3600;
const FIRST_POLL_WINDOW_HOURS: i64 = 24;
const SEEN_MESSAGE_ID_CAPACITY: usize = 10_000;
const FETCH_LIMIT: usize = 100;

fn clamp_poll_interval(seconds: u64) -> u64 {
    if seconds < MIN_POLL_INTERVAL_SECS {
        warn!(requested = seconds, "poll interval too low, clamping to {MIN_POLL_INTERVAL_SECS}s");
        MIN_POLL_INTERVAL_SECS
    } else if seconds > MAX_POLL_INTERVAL_SECS {
        warn!(requested = seconds, "poll interval too high, clamping to {MAX_POLL_INTERVAL_SECS}s");
        MAX_POLL_INTERVAL_SECS
    } else {
        seconds
    }
}

fn envelope_to_inbound(channel_id: &str, envelope: &EmailEnvelope) -> Result<InboundMessage> {
    let conversation_key = envelope.thread_root();
    let message_id = format!("email_{}", envelope.message_id.trim_start_matches('<').trim_end_matches('>'));

    let text = envelope.text_body.clone().or_else(|| {
        envelope.html_body.as_ref().map(|html| strip_html_tags(html))
    });

    let raw = serde_json::json!({
        "provider_message_id": envelope.provider_message_id,
        "message_id": envelope.message_id,
        "subject": envelope.subject,
        "from_name": envelope.from_name,
        "to_addresses": envelope.to_addresses,
        "cc_addresses": envelope.cc_addresses,
        "in_reply_to": envelope.in_reply_to,
        "references": envelope.references,
        "html_body": envelope.html_body,
    });

    let mut inbound = InboundMessage::new(
        channel_id.to_string(),
        envelope.from_address.to_lowercase(),
        conversation_key.clone(),
        message_id,
        envelope.date,
        MessageType::Text,
        text,
        vec![],
        None,
        raw,
    )?;
    inbound.metadata.insert("subject".into(), envelope.subject.clone().into());
    inbound.metadata.insert("thread_root".into(), conversation_key.into());
    inbound
        .metadata
        .insert("provider_message_id".into(), envelope.provider_message_id.clone().into());
    Ok(inbound)
}

fn strip_html_tags(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out
}

/// Polls an [`EmailProvider`] on a fixed interval, converts each new
/// envelope to an [`InboundMessage`], and routes it through the bus.
/// Per-envelope failures are logged and skipped — the loop never exits on
/// an individual message's exception.
pub struct EmailPoller {
    channel_id: String,
    provider: Arc<dyn EmailProvider>,
    bus: Arc<MessageBus>,
    cursor_store: CursorStore,
    mailbox_folder: String,
    poll_interval_secs: u64,
    seen_message_ids: Mutex<HashSet<String>>,
}

impl EmailPoller {
    pub fn new(
        channel_id: impl Into<String>,
        provider: Arc<dyn EmailProvider>,
        bus: Arc<MessageBus>,
        cursor_store: CursorStore,
        poll_interval_secs: u64,
    ) -> Self {
        Self {
            channel_id: channel_id.into(),
            provider,
            bus,
            cursor_store,
            mailbox_folder: "INBOX".to_string(),
            poll_interval_secs: clamp_poll_interval(poll_interval_secs),
            seen_message_ids: Mutex::new(HashSet::new()),
        }
    }

    fn is_duplicate(&self, message_id: &str) -> bool {
        let mut seen = self.seen_message_ids.lock().unwrap();
        if seen.contains(message_id) {
            return true;
        }
        seen.insert(message_id.to_string());
        if seen.len() > SEEN_MESSAGE_ID_CAPACITY {
            let keep: HashSet<String> = seen.iter().skip(SEEN_MESSAGE_ID_CAPACITY / 2).cloned().collect();
            *seen = keep;
        }
        false
    }

    /// Runs one poll tick: fetch since cursor, convert, dedupe, route.
    /// Never returns `Err` for per-envelope failures — only a cursor-store
    /// or provider-connection failure propagates.
    pub async fn poll_once(&self) -> usize {
        let since_ms = match self.cursor_store.get_last_poll_time_ms(&self.channel_id) {
            Ok(Some(ms)) => ms,
            Ok(None) => to_epoch_ms(Utc::now() - ChronoDuration::hours(FIRST_POLL_WINDOW_HOURS)),
            Err(e) => {
                error!(channel_id = %self.channel_id, error = %e, "cursor lookup failed, skipping tick");
                return 0;
            }
        };
        let since = from_epoch_ms(since_ms).unwrap_or_else(Utc::now);

        let envelopes = match self.provider.fetch_messages(&self.mailbox_folder, since, FETCH_LIMIT).await {
            Ok(envelopes) => envelopes,
            Err(e) => {
                error!(channel_id = %self.channel_id, error = %e, "email fetch failed, will retry next tick");
                return 0;
            }
        };
        debug!(channel_id = %self.channel_id, count = envelopes.len(), "fetched email envelopes");

        let mut processed = 0;
        let mut last_message_id = None;
        for envelope in &envelopes {
            let inbound = match envelope_to_inbound(&self.channel_id, envelope) {
                Ok(inbound) => inbound,
                Err(e) => {
                    warn!(channel_id = %self.channel_id, from = %envelope.from_address, error = %e, "failed to convert envelope, skipping");
                    continue;
                }
            };

            if self.is_duplicate(&inbound.message_id) {
                debug!(message_id = %inbound.message_id, "duplicate email, skipping");
                continue;
            }

            self.bus.process_inbound(&inbound).await;
            last_message_id = Some(inbound.message_id.clone());
            processed += 1;
        }

        if let Err(e) = self.cursor_store.update_cursor(&self.channel_id, utc_now_ms(), last_message_id.as_deref()) {
            error!(channel_id = %self.channel_id, error = %e, "failed to persist poll cursor");
        }

        processed
    }

    /// Background polling loop. Sleeps in 1s increments so shutdown is
    /// responsive within a second.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(channel_id = %self.channel_id, interval_secs = self.poll_interval_secs, "email poller started");

        loop {
            let processed = self.poll_once().await;
            if processed > 0 {
                info!(channel_id = %self.channel_id, processed, "email poll tick processed messages");
            }

            let mut remaining = self.poll_interval_secs;
            while remaining > 0 {
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_secs(1)) => {
                        remaining -= 1;
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            info!(channel_id = %self.channel_id, "email poller shutting down");
                            return;
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{OutboundEmail, SendResult};
    use async_trait::async_trait;
    use chrono::DateTime;
    use rusqlite::Connection;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedProvider {
        envelopes: Vec<EmailEnvelope>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EmailProvider for FixedProvider {
        async fn validate_credentials(&self) -> Result<()> {
            Ok(())
        }

        async fn fetch_messages(&self, _folder: &str, _since: DateTime<Utc>, _limit: usize) -> Result<Vec<EmailEnvelope>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.envelopes.clone())
        }

        async fn send_message(&self, _email: OutboundEmail<'_>) -> Result<SendResult> {
            unimplemented!()
        }

        async fn mark_as_read(&self, _provider_message_id: &str) -> Result<bool> {
            Ok(true)
        }
    }

    fn envelope(message_id: &str, from: &str) -> EmailEnvelope {
        EmailEnvelope {
            provider_message_id: "1".into(),
            message_id: message_id.into(),
            in_reply_to: None,
            references: None,
            from_address: from.into(),
            from_name: None,
            to_addresses: vec!["agent@example.com".into()],
            cc_addresses: vec![],
            subject: "Hello".into(),
            date: Utc::now(),
            text_body: Some("hi there".into()),
            html_body: None,
            attachments: vec![],
        }
    }

    fn bus() -> Arc<MessageBus> {
        Arc::new(MessageBus::new(gateway_channels::ChannelManager::new()))
    }

    #[tokio::test]
    async fn poll_once_processes_new_envelope_and_advances_cursor() {
        let provider = Arc::new(FixedProvider {
            envelopes: vec![envelope("<abc@mail>", "User@Example.com")],
            calls: AtomicUsize::new(0),
        });
        let cursor_store = CursorStore::new(Connection::open_in_memory().unwrap()).unwrap();
        let poller = EmailPoller::new("email1", provider, bus(), cursor_store, 10);

        let processed = poller.poll_once().await;
        assert_eq!(processed, 1);
        assert!(poller.cursor_store.get_last_poll_time_ms("email1").unwrap().is_some());
    }

    #[tokio::test]
    async fn poll_once_skips_duplicate_message_ids_on_second_tick() {
        let provider = Arc::new(FixedProvider {
            envelopes: vec![envelope("<dup@mail>", "user@example.com")],
            calls: AtomicUsize::new(0),
        });
        let cursor_store = CursorStore::new(Connection::open_in_memory().unwrap()).unwrap();
        let poller = EmailPoller::new("email1", provider, bus(), cursor_store, 10);

        assert_eq!(poller.poll_once().await, 1);
        assert_eq!(poller.poll_once().await, 0);
    }

    #[test]
    fn clamp_poll_interval_enforces_bounds() {
        assert_eq!(clamp_poll_interval(5), MIN_POLL_INTERVAL_SECS);
        assert_eq!(clamp_poll_interval(999_999), MAX_POLL_INTERVAL_SECS);
        assert_eq!(clamp_poll_interval(120), 120);
    }

    #[test]
    fn envelope_to_inbound_uses_thread_root_as_conversation_key() {
        let mut env = envelope("<child@mail>", "user@example.com");
        env.references = Some("<root@mail> <child@mail>".into());
        let inbound = envelope_to_inbound("email1", &env).unwrap();
        assert_eq!(inbound.conversation_key, "root@mail");
        assert_eq!(inbound.message_id, "email_child@mail");
        assert_eq!(inbound.user_key, "user@example.com");
    }
}
