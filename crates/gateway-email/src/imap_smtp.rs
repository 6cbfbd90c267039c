use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use futures_util::StreamExt;
use gateway_core::{GatewayError, Result};
use lettre::message::header::{ContentType, Header, HeaderName, HeaderValue};
use lettre::message::{Mailbox, Message as LettreMessage, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Tokio1Executor};
use mail_parser::MessageParser;
use tokio::net::TcpStream;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;
use tracing::{debug, warn};

use crate::envelope::{EmailEnvelope, EnvelopeAttachment};
use crate::provider::{EmailProvider, OutboundEmail, SendResult};

const EMAIL_CHANNEL: &str = "email";

fn transport_err(e: impl std::fmt::Display) -> GatewayError {
    GatewayError::Transport { channel: EMAIL_CHANNEL.into(), reason: e.to_string() }
}

#[derive(Clone)]
struct InReplyTo(String);

impl Header for InReplyTo {
    fn name() -> HeaderName {
        HeaderName::new_from_ascii_str("In-Reply-To")
    }
    fn parse(s: &str) -> std::result::Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        Ok(InReplyTo(s.to_string()))
    }
    fn display(&self) -> HeaderValue {
        HeaderValue::new(Self::name(), self.0.clone())
    }
}

#[derive(Clone)]
struct References(String);

impl Header for References {
    fn name() -> HeaderName {
        HeaderName::new_from_ascii_str("References")
    }
    fn parse(s: &str) -> std::result::Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        Ok(References(s.to_string()))
    }
    fn display(&self) -> HeaderValue {
        HeaderValue::new(Self::name(), self.0.clone())
    }
}

/// Generic IMAP (fetch)/SMTP (send) provider — the app-password workhorse
/// behind every non-OAuth email channel, Gmail and Outlook included.
pub struct ImapSmtpProvider {
    imap_host: String,
    imap_port: u16,
    smtp_host: String,
    smtp_port: u16,
    username: String,
    password: String,
}

impl ImapSmtpProvider {
    pub fn new(
        imap_host: impl Into<String>,
        imap_port: u16,
        smtp_host: impl Into<String>,
        smtp_port: u16,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            imap_host: imap_host.into(),
            imap_port,
            smtp_host: smtp_host.into(),
            smtp_port,
            username: username.into(),
            password: password.into(),
        }
    }

    async fn connect_imap(&self) -> Result<async_imap::Session<tokio_rustls::client::TlsStream<TcpStream>>> {
        let tcp = TcpStream::connect((self.imap_host.as_str(), self.imap_port))
            .await
            .map_err(transport_err)?;

        let mut root_store = RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let tls_config = ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth();
        let connector = TlsConnector::from(Arc::new(tls_config));
        let domain = ServerName::try_from(self.imap_host.clone())
            .map_err(|_| GatewayError::Config(format!("invalid IMAP host {}", self.imap_host)))?;
        let tls_stream = connector.connect(domain, tcp).await.map_err(transport_err)?;

        let client = async_imap::Client::new(tls_stream);
        client
            .login(&self.username, &self.password)
            .await
            .map_err(|(e, _)| GatewayError::Authentication(e.to_string()))
    }
}

#[async_trait]
impl EmailProvider for ImapSmtpProvider {
    async fn validate_credentials(&self) -> Result<()> {
        let mut session = self.connect_imap().await?;
        session.logout().await.map_err(transport_err)?;
        Ok(())
    }

    async fn fetch_messages(&self, folder: &str, since: DateTime<Utc>, limit: usize) -> Result<Vec<EmailEnvelope>> {
        let mut session = self.connect_imap().await?;
        session.select(folder).await.map_err(transport_err)?;

        let search_query = format!("SINCE {}", since.format("%d-%b-%Y"));
        let uids = session.uid_search(&search_query).await.map_err(transport_err)?;

        let mut uid_list: Vec<u32> = uids.into_iter().collect();
        uid_list.sort_unstable();
        if uid_list.len() > limit {
            uid_list = uid_list.split_off(uid_list.len() - limit);
        }
        if uid_list.is_empty() {
            let _ = session.logout().await;
            return Ok(Vec::new());
        }

        let sequence = uid_list.iter().map(|u| u.to_string()).collect::<Vec<_>>().join(",");
        let fetch_stream = session.uid_fetch(&sequence, "(RFC822 UID)").await.map_err(transport_err)?;
        let fetches: Vec<_> = fetch_stream.collect().await;

        let mut envelopes = Vec::new();
        for fetch in fetches {
            let fetch = match fetch {
                Ok(f) => f,
                Err(e) => {
                    warn!(error = %e, "imap fetch item failed, skipping");
                    continue;
                }
            };
            let Some(body) = fetch.body() else { continue };
            let uid = fetch.uid.unwrap_or(0);
            match parse_rfc822(body, uid) {
                Ok(envelope) => envelopes.push(envelope),
                Err(e) => warn!(uid, error = %e, "failed to parse email envelope, skipping"),
            }
        }

        let _ = session.logout().await;
        Ok(envelopes)
    }

    async fn send_message(&self, email: OutboundEmail<'_>) -> Result<SendResult> {
        let from: Mailbox = self
            .username
            .parse()
            .map_err(|e| GatewayError::Config(format!("invalid SMTP username as From address: {e}")))?;

        let mut builder = LettreMessage::builder().from(from).subject(email.subject);
        for to in email.to_addresses {
            let mailbox: Mailbox = to
                .parse()
                .map_err(|e| GatewayError::Validation(format!("invalid To address {to}: {e}")))?;
            builder = builder.to(mailbox);
        }
        if let Some(cc_addresses) = email.cc_addresses {
            for cc in cc_addresses {
                let mailbox: Mailbox = cc
                    .parse()
                    .map_err(|e| GatewayError::Validation(format!("invalid Cc address {cc}: {e}")))?;
                builder = builder.cc(mailbox);
            }
        }
        if let Some(in_reply_to) = email.in_reply_to {
            builder = builder.header(InReplyTo(in_reply_to.to_string()));
        }
        if let Some(references) = email.references {
            builder = builder.header(References(references.to_string()));
        }

        let message = match email.html_body {
            Some(html) => builder
                .multipart(
                    MultiPart::alternative()
                        .singlepart(SinglePart::plain(email.text_body.unwrap_or_default().to_string()))
                        .singlepart(SinglePart::html(html.to_string())),
                )
                .map_err(|e| GatewayError::Validation(e.to_string()))?,
            None => builder
                .header(ContentType::TEXT_PLAIN)
                .body(email.text_body.unwrap_or_default().to_string())
                .map_err(|e| GatewayError::Validation(e.to_string()))?,
        };

        let message_id = message.headers().get_raw("Message-Id").map(|s| s.to_string());

        let mailer = AsyncSmtpTransport::<Tokio1Executor>::relay(&self.smtp_host)
            .map_err(|e| GatewayError::Config(e.to_string()))?
            .port(self.smtp_port)
            .credentials(Credentials::new(self.username.clone(), self.password.clone()))
            .build();

        mailer.send(message).await.map_err(transport_err)?;
        debug!(smtp_host = %self.smtp_host, "email sent");

        Ok(SendResult { provider_message_id: None, message_id: message_id.unwrap_or_default() })
    }

    async fn mark_as_read(&self, provider_message_id: &str) -> Result<bool> {
        let Ok(uid) = provider_message_id.parse::<u32>() else {
            return Ok(false);
        };
        let mut session = self.connect_imap().await?;
        session.select("INBOX").await.map_err(transport_err)?;
        let result = session.uid_store(uid.to_string(), "+FLAGS (\\Seen)").await.map_err(transport_err);
        let _ = session.logout().await;
        result.map(|_| true)
    }
}

fn parse_rfc822(body: &[u8], uid: u32) -> Result<EmailEnvelope> {
    let message = MessageParser::default()
        .parse(body)
        .ok_or_else(|| GatewayError::Validation("unparseable RFC 822 message".into()))?;

    let message_id = message
        .message_id()
        .ok_or_else(|| GatewayError::Validation("message missing Message-ID".into()))?
        .to_string();
    let in_reply_to = message.in_reply_to().as_text().map(|s| s.to_string());
    let references = message.references().as_text_list().map(|refs| refs.join(" "));

    let from = message
        .from()
        .and_then(|addrs| addrs.first())
        .ok_or_else(|| GatewayError::Validation("message missing From".into()))?;
    let from_address = from
        .address()
        .ok_or_else(|| GatewayError::Validation("From header missing address".into()))?
        .to_lowercase();
    let from_name = from.name().map(|n| n.to_string());

    let to_addresses = message
        .to()
        .map(|addrs| addrs.iter().filter_map(|a| a.address().map(|s| s.to_string())).collect())
        .unwrap_or_default();
    let cc_addresses = message
        .cc()
        .map(|addrs| addrs.iter().filter_map(|a| a.address().map(|s| s.to_string())).collect())
        .unwrap_or_default();

    let subject = message.subject().unwrap_or_default().to_string();
    let date = message
        .date()
        .and_then(|d| Utc.timestamp_opt(d.to_timestamp(), 0).single())
        .unwrap_or_else(Utc::now);

    let text_body = message.body_text(0).map(|s| s.to_string());
    let html_body = message.body_html(0).map(|s| s.to_string());

    let attachments = message
        .attachments()
        .map(|attachment| EnvelopeAttachment {
            file_name: attachment.attachment_name().map(|s| s.to_string()),
            content_type: attachment.content_type().map(|ct| ct.ctype().to_string()),
            size_bytes: attachment.contents().len() as u64,
        })
        .collect();

    Ok(EmailEnvelope {
        provider_message_id: uid.to_string(),
        message_id,
        in_reply_to,
        references,
        from_address,
        from_name,
        to_addresses,
        cc_addresses,
        subject,
        date,
        text_body,
        html_body,
        attachments,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_reply_to_header_uses_expected_field_name() {
        assert_eq!(InReplyTo::name().to_string(), "In-Reply-To");
        let header = InReplyTo::parse("<abc@mail>").unwrap();
        assert_eq!(header.0, "<abc@mail>");
    }

    #[test]
    fn references_header_uses_expected_field_name() {
        assert_eq!(References::name().to_string(), "References");
        let header = References::parse("<a@mail> <b@mail>").unwrap();
        assert_eq!(header.0, "<a@mail> <b@mail>");
    }

    #[test]
    fn parse_rfc822_extracts_thread_and_sender() {
        let raw = b"From: Jane Doe <jane@example.com>\r\n\
Message-ID: <msg1@mail>\r\n\
References: <root@mail> <mid@mail>\r\n\
Subject: Hello\r\n\
Date: Mon, 1 Feb 2026 10:30:00 +0000\r\n\
\r\n\
Hi there.\r\n";
        let envelope = parse_rfc822(raw, 99).unwrap();
        assert_eq!(envelope.from_address, "jane@example.com");
        assert_eq!(envelope.from_name.as_deref(), Some("Jane Doe"));
        assert_eq!(envelope.thread_root(), "root@mail");
        assert_eq!(envelope.provider_message_id, "99");
        assert_eq!(envelope.text_body.as_deref(), Some("Hi there.\r\n"));
    }
}
