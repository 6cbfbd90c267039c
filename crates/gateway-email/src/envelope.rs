use chrono::{DateTime, Utc};

/// Standardized email representation every provider converts into, mirroring
/// the key fields of RFC 5322 plus the provider's own message handle.
#[derive(Debug, Clone)]
pub struct EmailEnvelope {
    /// Provider-specific handle (IMAP UID, Gmail message id, ...), used for
    /// `mark_as_read` — never surfaced to the rest of the gateway.
    pub provider_message_id: String,
    pub message_id: String,
    pub in_reply_to: Option<String>,
    pub references: Option<String>,
    pub from_address: String,
    pub from_name: Option<String>,
    pub to_addresses: Vec<String>,
    pub cc_addresses: Vec<String>,
    pub subject: String,
    pub date: DateTime<Utc>,
    pub text_body: Option<String>,
    pub html_body: Option<String>,
    pub attachments: Vec<EnvelopeAttachment>,
}

#[derive(Debug, Clone)]
pub struct EnvelopeAttachment {
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub size_bytes: u64,
}

fn strip_brackets(id: &str) -> &str {
    id.trim().trim_start_matches('<').trim_end_matches('>')
}

impl EmailEnvelope {
    /// Frozen thread-detection algorithm: first token of `References`
    /// (stripped), else `In-Reply-To` (stripped), else `Message-ID` itself.
    pub fn thread_root(&self) -> String {
        if let Some(references) = &self.references {
            if let Some(first) = references.split_whitespace().next() {
                return strip_brackets(first).to_string();
            }
        }
        if let Some(in_reply_to) = &self.in_reply_to {
            return strip_brackets(in_reply_to).to_string();
        }
        strip_brackets(&self.message_id).to_string()
    }

    /// `In-Reply-To`/`References` headers for a reply to this envelope.
    pub fn reply_headers(&self) -> (String, String) {
        let current = format!("<{}>", strip_brackets(&self.message_id));
        let in_reply_to = current.clone();

        let mut references: Vec<String> = self
            .references
            .as_deref()
            .map(|r| r.split_whitespace().map(|s| s.to_string()).collect())
            .unwrap_or_default();
        if !references.contains(&current) {
            references.push(current);
        }
        (in_reply_to, references.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_envelope() -> EmailEnvelope {
        EmailEnvelope {
            provider_message_id: "42".into(),
            message_id: "<msg1@mail.example.com>".into(),
            in_reply_to: None,
            references: None,
            from_address: "user@example.com".into(),
            from_name: None,
            to_addresses: vec!["agent@example.com".into()],
            cc_addresses: vec![],
            subject: "Hi".into(),
            date: Utc::now(),
            text_body: Some("hi".into()),
            html_body: None,
            attachments: vec![],
        }
    }

    #[test]
    fn thread_root_prefers_first_reference() {
        let mut env = base_envelope();
        env.references = Some("<root@mail> <mid@mail> <msg1@mail.example.com>".into());
        env.in_reply_to = Some("<mid@mail>".into());
        assert_eq!(env.thread_root(), "root@mail");
    }

    #[test]
    fn thread_root_falls_back_to_in_reply_to_without_references() {
        let mut env = base_envelope();
        env.in_reply_to = Some("<parent@mail>".into());
        assert_eq!(env.thread_root(), "parent@mail");
    }

    #[test]
    fn thread_root_falls_back_to_message_id_for_new_thread() {
        let env = base_envelope();
        assert_eq!(env.thread_root(), "msg1@mail.example.com");
    }

    #[test]
    fn reply_headers_append_current_id_to_existing_references() {
        let mut env = base_envelope();
        env.references = Some("<root@mail>".into());
        let (in_reply_to, references) = env.reply_headers();
        assert_eq!(in_reply_to, "<msg1@mail.example.com>");
        assert_eq!(references, "<root@mail> <msg1@mail.example.com>");
    }
}
