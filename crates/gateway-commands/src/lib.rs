use chrono::{TimeZone, Utc};
use gateway_channels::SessionScope;
use gateway_core::OutboundMessage;
use gateway_sessions::{Session, SessionStore, STATUS_ACTIVE};
use tracing::instrument;

const DEFAULT_LIST_LIMIT: i64 = 10;
const MIN_LIST_LIMIT: i64 = 1;
const MAX_LIST_LIMIT: i64 = 50;

const HELP_TEXT: &str = "\
🤖 Gateway Commands - Available Commands

📋 Session Management:
  /session new         - Create and activate new session
  /session id          - Show current active session
  /session list [N]    - List recent N sessions (default: 10)
  /session use <id>    - Switch to specific session
  /session close       - Close current session

ℹ️ Help:
  /help                - Show this help message

💡 Tips:
- Sessions keep your conversation context separate
- All messages are associated with your active session
- You can switch between sessions anytime

🔒 Security:
- This channel is configured for chat-only mode
- Execution commands require explicit approval
";

/// Channel-agnostic slash-command processor. Wraps a [`SessionStore`] to
/// turn `/session ...` and `/help` text into [`OutboundMessage`] replies,
/// the same way across every channel adapter.
pub struct CommandProcessor {
    session_store: SessionStore,
}

impl CommandProcessor {
    pub fn new(session_store: SessionStore) -> Self {
        Self { session_store }
    }

    pub fn is_command(text: &str) -> bool {
        text.trim_start().starts_with('/')
    }

    #[instrument(skip(self, text))]
    pub fn process_command(
        &self,
        text: &str,
        channel_id: &str,
        user_key: &str,
        conversation_key: &str,
    ) -> OutboundMessage {
        let (command, subcommand, args) = split_command(text.trim());
        let command = command.to_lowercase();

        match command.as_str() {
            "/session" => {
                let Some(subcommand) = subcommand else {
                    return self.error_response(
                        channel_id,
                        user_key,
                        conversation_key,
                        "Usage: /session [new|id|list|use|close]",
                    );
                };
                let subcommand = subcommand.to_lowercase();
                let args = args.as_deref().filter(|s| !s.is_empty());
                self.handle_session_command(&subcommand, args, channel_id, user_key, conversation_key)
            }
            "/help" => self.handle_help_command(channel_id, user_key, conversation_key),
            _ => self.error_response(
                channel_id,
                user_key,
                conversation_key,
                &format!("Unknown command: {command}\nType /help for available commands."),
            ),
        }
    }

    fn handle_session_command(
        &self,
        subcommand: &str,
        args: Option<&str>,
        channel_id: &str,
        user_key: &str,
        conversation_key: &str,
    ) -> OutboundMessage {
        match subcommand {
            "new" => self.session_new(channel_id, user_key, conversation_key),
            "id" => self.session_id(channel_id, user_key, conversation_key),
            "list" => self.session_list(channel_id, user_key, conversation_key, args),
            "use" => match args {
                None => self.error_response(
                    channel_id,
                    user_key,
                    conversation_key,
                    "Usage: /session use <session_id>",
                ),
                Some(session_id) => self.session_use(channel_id, user_key, conversation_key, session_id),
            },
            "close" => self.session_close(channel_id, user_key, conversation_key),
            other => self.error_response(
                channel_id,
                user_key,
                conversation_key,
                &format!("Unknown session command: {other}\nAvailable: new, id, list, use, close"),
            ),
        }
    }

    fn session_new(&self, channel_id: &str, user_key: &str, conversation_key: &str) -> OutboundMessage {
        let session_id = match self.session_store.create_session(
            channel_id,
            user_key,
            conversation_key,
            SessionScope::User,
            None,
            None,
            None,
        ) {
            Ok(id) => id,
            Err(e) => {
                return self.error_response(
                    channel_id,
                    user_key,
                    conversation_key,
                    &format!("Failed to create session: {e}"),
                )
            }
        };

        let text = format!(
            "✅ New session created: {session_id} (active)\n\n\
             All messages will now be associated with this session."
        );
        self.reply(channel_id, user_key, conversation_key, text, |m| {
            m.insert("command".into(), "session_new".into());
            m.insert("session_id".into(), session_id.clone().into());
        })
    }

    fn session_id(&self, channel_id: &str, user_key: &str, conversation_key: &str) -> OutboundMessage {
        let session = self
            .session_store
            .get_active_session(channel_id, user_key, Some(conversation_key))
            .unwrap_or(None);

        let (text, session_id) = match &session {
            Some(session) => (
                format!(
                    "📋 Current active session: {}\n\n\
                     Created: {}\n\
                     Status: {}\n\
                     Messages: {}",
                    session.session_id,
                    format_epoch_ms(session.created_at),
                    session.status,
                    session.message_count,
                ),
                Some(session.session_id.clone()),
            ),
            None => (
                "ℹ️ No active session.\n\nCreate one with: /session new".to_string(),
                None,
            ),
        };

        self.reply(channel_id, user_key, conversation_key, text, |m| {
            m.insert("command".into(), "session_id".into());
            m.insert("session_id".into(), session_id.clone().into());
        })
    }

    fn session_list(
        &self,
        channel_id: &str,
        user_key: &str,
        conversation_key: &str,
        args: Option<&str>,
    ) -> OutboundMessage {
        let limit = args
            .and_then(|s| s.parse::<i64>().ok())
            .map(|n| n.clamp(MIN_LIST_LIMIT, MAX_LIST_LIMIT))
            .unwrap_or(DEFAULT_LIST_LIMIT);

        let sessions = self
            .session_store
            .list_sessions(channel_id, user_key, None, limit)
            .unwrap_or_default();
        let active_id = self
            .session_store
            .get_active_session(channel_id, user_key, Some(conversation_key))
            .unwrap_or(None)
            .map(|s| s.session_id);

        let count = sessions.len();
        let text = if sessions.is_empty() {
            "ℹ️ No sessions found.\n\nCreate one with: /session new".to_string()
        } else {
            let mut lines = vec![format!("📋 Recent sessions (showing {count}):\n")];
            for session in &sessions {
                lines.push(format_session_list_entry(session, active_id.as_deref()));
            }
            lines.push("\nSwitch with: /session use <session_id>".to_string());
            lines.join("\n")
        };

        self.reply(channel_id, user_key, conversation_key, text, |m| {
            m.insert("command".into(), "session_list".into());
            m.insert("count".into(), (count as i64).into());
        })
    }

    fn session_use(
        &self,
        channel_id: &str,
        user_key: &str,
        conversation_key: &str,
        session_id: &str,
    ) -> OutboundMessage {
        let session_id = session_id.trim();
        let session = match self.session_store.get_session(session_id).unwrap_or(None) {
            Some(session) => session,
            None => {
                return self.error_response(
                    channel_id,
                    user_key,
                    conversation_key,
                    &format!(
                        "❌ Session not found: {session_id}\n\n\
                         List available sessions with: /session list"
                    ),
                )
            }
        };

        if session.channel_id != channel_id || session.user_key != user_key {
            return self.error_response(
                channel_id,
                user_key,
                conversation_key,
                &format!("❌ Session {session_id} does not belong to you."),
            );
        }

        let text = match self.session_store.switch_session(channel_id, user_key, conversation_key, session_id) {
            Ok(()) => format!(
                "✅ Switched to session: {session_id}\n\n\
                 All messages will now be associated with this session."
            ),
            Err(e) => format!("❌ Failed to switch to session: {e}"),
        };

        self.reply(channel_id, user_key, conversation_key, text, |m| {
            m.insert("command".into(), "session_use".into());
            m.insert("session_id".into(), session_id.into());
        })
    }

    fn session_close(&self, channel_id: &str, user_key: &str, conversation_key: &str) -> OutboundMessage {
        let session = match self
            .session_store
            .get_active_session(channel_id, user_key, Some(conversation_key))
            .unwrap_or(None)
        {
            Some(session) => session,
            None => {
                return self.error_response(
                    channel_id,
                    user_key,
                    conversation_key,
                    "ℹ️ No active session to close.",
                )
            }
        };

        let session_id = session.session_id;
        let text = match self.session_store.archive_session(&session_id) {
            Ok(()) => format!(
                "✅ Session closed: {session_id}\n\n\
                 The session has been archived. Create a new session with: /session new"
            ),
            Err(e) => format!("❌ Failed to close session: {e}"),
        };

        self.reply(channel_id, user_key, conversation_key, text, |m| {
            m.insert("command".into(), "session_close".into());
            m.insert("session_id".into(), session_id.clone().into());
        })
    }

    fn handle_help_command(&self, channel_id: &str, user_key: &str, conversation_key: &str) -> OutboundMessage {
        self.reply(channel_id, user_key, conversation_key, HELP_TEXT.to_string(), |m| {
            m.insert("command".into(), "help".into());
        })
    }

    fn error_response(
        &self,
        channel_id: &str,
        user_key: &str,
        conversation_key: &str,
        error_message: &str,
    ) -> OutboundMessage {
        self.reply(channel_id, user_key, conversation_key, error_message.to_string(), |m| {
            m.insert("error".into(), true.into());
        })
    }

    fn reply(
        &self,
        channel_id: &str,
        user_key: &str,
        conversation_key: &str,
        text: String,
        set_metadata: impl FnOnce(&mut std::collections::HashMap<String, serde_json::Value>),
    ) -> OutboundMessage {
        let mut message = OutboundMessage::text(channel_id, user_key, conversation_key, text);
        set_metadata(&mut message.metadata);
        message
    }
}

/// Splits into at most 3 whitespace-separated parts the way Python's
/// `text.split(maxsplit=2)` does: whitespace runs collapse, and the third
/// part (if present) keeps any internal whitespace intact.
fn split_command(text: &str) -> (String, Option<String>, Option<String>) {
    let rest = text.trim_start();
    let (command, rest) = take_token(rest);
    let (subcommand, rest) = match rest {
        Some(rest) => {
            let (tok, rest) = take_token(rest);
            (tok, rest)
        }
        None => (None, None),
    };
    let remainder = rest
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);
    (command.unwrap_or_default(), subcommand, remainder)
}

/// Takes the next whitespace-delimited token and the remainder after it.
/// Returns `None` for both when `text` (after trimming) is empty.
fn take_token(text: &str) -> (Option<String>, Option<&str>) {
    let text = text.trim_start();
    if text.is_empty() {
        return (None, None);
    }
    match text.find(char::is_whitespace) {
        Some(idx) => (Some(text[..idx].to_string()), Some(&text[idx..])),
        None => (Some(text.to_string()), None),
    }
}

fn format_epoch_ms(ms: i64) -> String {
    Utc.timestamp_millis_opt(ms)
        .single()
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn format_session_list_entry(session: &Session, active_id: Option<&str>) -> String {
    let is_active = active_id == Some(session.session_id.as_str());
    let marker = if is_active { "🟢" } else { "⚪" };
    let status = if is_active {
        "(active)".to_string()
    } else {
        format!("({})", if session.status.is_empty() { STATUS_ACTIVE } else { &session.status })
    };
    let title_str = session
        .title
        .as_deref()
        .filter(|t| !t.is_empty())
        .map(|t| format!(" - {t}"))
        .unwrap_or_default();

    format!(
        "{marker} {} {status}{title_str}\n   Created: {} | Messages: {}",
        session.session_id,
        Utc.timestamp_millis_opt(session.created_at)
            .single()
            .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "unknown".to_string()),
        session.message_count,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    fn processor() -> CommandProcessor {
        let store = SessionStore::new(Connection::open_in_memory().unwrap()).unwrap();
        CommandProcessor::new(store)
    }

    #[test]
    fn is_command_detects_leading_slash() {
        assert!(CommandProcessor::is_command("/help"));
        assert!(CommandProcessor::is_command("  /help"));
        assert!(!CommandProcessor::is_command("hello"));
        assert!(!CommandProcessor::is_command(""));
    }

    #[test]
    fn session_new_creates_and_activates() {
        let cp = processor();
        let reply = cp.process_command("/session new", "telegram", "u1", "u1");
        assert_eq!(reply.metadata.get("command").unwrap(), "session_new");
        assert!(reply.text.unwrap().contains("New session created"));
    }

    #[test]
    fn session_id_reports_no_active_session_initially() {
        let cp = processor();
        let reply = cp.process_command("/session id", "telegram", "u1", "u1");
        assert!(reply.text.unwrap().contains("No active session"));
    }

    #[test]
    fn session_list_clamps_limit_to_fifty() {
        let cp = processor();
        cp.process_command("/session new", "telegram", "u1", "u1");
        let reply = cp.process_command("/session list 999", "telegram", "u1", "u1");
        assert_eq!(reply.metadata.get("count").unwrap(), 1);
    }

    #[test]
    fn session_use_rejects_session_from_another_user() {
        let cp = processor();
        let create = cp.process_command("/session new", "telegram", "u1", "u1");
        let session_id = create.metadata.get("session_id").unwrap().as_str().unwrap().to_string();

        let reply = cp.process_command(&format!("/session use {session_id}"), "telegram", "u2", "u2");
        assert!(reply.text.unwrap().contains("does not belong to you"));
    }

    #[test]
    fn session_use_switches_active_session() {
        let cp = processor();
        let first = cp.process_command("/session new", "telegram", "u1", "u1");
        let first_id = first.metadata.get("session_id").unwrap().as_str().unwrap().to_string();
        cp.process_command("/session new", "telegram", "u1", "u1");

        let reply = cp.process_command(&format!("/session use {first_id}"), "telegram", "u1", "u1");
        assert!(reply.text.unwrap().contains("Switched to session"));

        let id_reply = cp.process_command("/session id", "telegram", "u1", "u1");
        assert!(id_reply.text.unwrap().contains(&first_id));
    }

    #[test]
    fn session_close_archives_active_session() {
        let cp = processor();
        cp.process_command("/session new", "telegram", "u1", "u1");
        let reply = cp.process_command("/session close", "telegram", "u1", "u1");
        assert!(reply.text.unwrap().contains("Session closed"));

        let reply = cp.process_command("/session close", "telegram", "u1", "u1");
        assert!(reply.text.unwrap().contains("No active session to close"));
    }

    #[test]
    fn unknown_command_mentions_help() {
        let cp = processor();
        let reply = cp.process_command("/bogus", "telegram", "u1", "u1");
        assert!(reply.text.unwrap().contains("/help"));
    }

    #[test]
    fn help_command_returns_help_text() {
        let cp = processor();
        let reply = cp.process_command("/help", "telegram", "u1", "u1");
        assert!(reply.text.unwrap().contains("Available Commands"));
    }
}
