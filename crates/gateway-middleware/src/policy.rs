use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use gateway_core::{time::utc_now_ms, InboundMessage, OutboundMessage};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tracing::warn;

use crate::audit::AuditStore;
use crate::context::{Middleware, ProcessingContext, ProcessingStatus};

const VIOLATION_RING_CAPACITY: usize = 1000;
const EXECUTE_KEYWORDS: [&str; 6] = ["execute", "run", "exec", "system", "shell", "command"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityMode {
    ChatOnly,
    ChatExecRestricted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    Chat,
    Execute,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationType {
    CommandNotWhitelisted,
    OperationDenied,
}

/// Per-channel security policy. `mode=chat_only` always forces
/// `allow_execute=false`, and `chat` is always present in
/// `allowed_operations` regardless of what's passed in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityPolicy {
    pub mode: SecurityMode,
    pub allow_execute: bool,
    pub allowed_commands: Vec<String>,
    pub require_admin_token: bool,
    pub admin_token_hash: Option<String>,
    pub allowed_operations: Vec<OperationType>,
    pub rate_limit_per_minute: i64,
    pub block_on_violation: bool,
}

impl SecurityPolicy {
    pub fn new(
        mode: SecurityMode,
        allow_execute: bool,
        allowed_commands: Vec<String>,
        require_admin_token: bool,
        admin_token_hash: Option<String>,
        mut allowed_operations: Vec<OperationType>,
        rate_limit_per_minute: i64,
        block_on_violation: bool,
    ) -> Self {
        let allow_execute = if mode == SecurityMode::ChatOnly { false } else { allow_execute };

        if !allowed_operations.contains(&OperationType::Chat) {
            allowed_operations.push(OperationType::Chat);
        }
        if !allow_execute {
            allowed_operations.retain(|op| *op != OperationType::Execute);
        }

        Self {
            mode,
            allow_execute,
            allowed_commands,
            require_admin_token,
            admin_token_hash,
            allowed_operations,
            rate_limit_per_minute,
            block_on_violation,
        }
    }

    pub fn chat_only() -> Self {
        Self::new(
            SecurityMode::ChatOnly,
            false,
            Vec::new(),
            false,
            None,
            vec![OperationType::Chat],
            20,
            true,
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityViolation {
    pub violation_type: ViolationType,
    pub channel_id: String,
    pub user_key: String,
    pub detail: String,
    pub blocked: bool,
    pub timestamp_ms: i64,
}

/// Checks ambient environment variables for signs this process is reachable
/// from outside the local machine — a deploy onto Railway/Heroku/Vercel/AWS
/// Lambda/Kubernetes changes the blast radius of a permissive policy.
pub struct RemoteExposureDetector;

impl RemoteExposureDetector {
    const EXPOSURE_ENV_VARS: [&'static str; 6] = [
        "GATEWAY_REMOTE_MODE",
        "RAILWAY_ENVIRONMENT",
        "HEROKU_APP_NAME",
        "VERCEL",
        "AWS_EXECUTION_ENV",
        "KUBERNETES_SERVICE_HOST",
    ];

    pub fn is_remote_exposed() -> bool {
        Self::EXPOSURE_ENV_VARS.iter().any(|var| std::env::var(var).is_ok())
    }

    pub fn get_exposure_warning() -> Option<String> {
        if Self::is_remote_exposed() {
            Some(
                "this process appears reachable from outside the local machine; \
                 review security policy before enabling execute operations"
                    .to_string(),
            )
        } else {
            None
        }
    }
}

/// Generates a fresh admin token plus its SHA-256 hash (store the hash,
/// hand the token to the operator once).
pub fn generate_admin_token() -> (String, String) {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    let token = URL_SAFE_NO_PAD.encode(bytes);
    let hash = hex::encode(Sha256::digest(token.as_bytes()));
    (token, hash)
}

pub fn verify_admin_token(token: &str, expected_hash: &str) -> bool {
    let actual_hash = hex::encode(Sha256::digest(token.as_bytes()));
    actual_hash.as_bytes().ct_eq(expected_hash.as_bytes()).into()
}

#[derive(Debug, Clone, Default)]
pub struct PolicyStats {
    pub total_violations: usize,
    pub blocked_count: usize,
    pub by_type: HashMap<String, usize>,
    pub by_channel: HashMap<String, usize>,
    pub policies_configured: usize,
}

/// Enforces [`SecurityPolicy`] per channel. Inbound rule 1 (command
/// whitelist) can reject; inbound rule 2 (execute-keyword heuristic) only
/// ever warns.
pub struct PolicyEnforcer {
    policies: Mutex<HashMap<String, SecurityPolicy>>,
    violations: Mutex<VecDeque<SecurityViolation>>,
    audit_store: Option<AuditStore>,
}

impl PolicyEnforcer {
    pub fn new(audit_store: Option<AuditStore>) -> Self {
        Self {
            policies: Mutex::new(HashMap::new()),
            violations: Mutex::new(VecDeque::new()),
            audit_store,
        }
    }

    pub fn set_channel_policy(&self, channel_id: impl Into<String>, policy: SecurityPolicy) {
        self.policies.lock().unwrap().insert(channel_id.into(), policy);
    }

    pub fn get_policy_for_channel(&self, channel_id: &str) -> Option<SecurityPolicy> {
        self.policies.lock().unwrap().get(channel_id).cloned()
    }

    fn log_violation(&self, violation: SecurityViolation) {
        warn!(
            channel_id = %violation.channel_id,
            violation_type = ?violation.violation_type,
            blocked = violation.blocked,
            "security policy violation"
        );

        if let Some(store) = &self.audit_store {
            let detail = serde_json::to_value(&violation).unwrap_or(serde_json::Value::Null);
            if let Err(e) = store.log_event("violation", &violation.channel_id, &violation.user_key, &detail) {
                warn!(error = %e, "failed to write security violation to audit sink");
            }
        }

        let mut ring = self.violations.lock().unwrap();
        if ring.len() >= VIOLATION_RING_CAPACITY {
            ring.pop_front();
        }
        ring.push_back(violation);
    }

    pub fn get_violations(&self, channel_id: Option<&str>, limit: usize) -> Vec<SecurityViolation> {
        let ring = self.violations.lock().unwrap();
        ring.iter()
            .rev()
            .filter(|v| channel_id.map(|c| c == v.channel_id).unwrap_or(true))
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn get_stats(&self) -> PolicyStats {
        let ring = self.violations.lock().unwrap();
        let mut stats = PolicyStats {
            policies_configured: self.policies.lock().unwrap().len(),
            ..Default::default()
        };
        stats.total_violations = ring.len();
        for v in ring.iter() {
            if v.blocked {
                stats.blocked_count += 1;
            }
            *stats.by_type.entry(format!("{:?}", v.violation_type)).or_insert(0) += 1;
            *stats.by_channel.entry(v.channel_id.clone()).or_insert(0) += 1;
        }
        stats
    }

    fn check_inbound(&self, message: &InboundMessage, policy: &SecurityPolicy) -> Option<SecurityViolation> {
        let text = message.text.as_deref()?;
        let trimmed = text.trim();

        if let Some(command) = trimmed.strip_prefix('/') {
            let command_token = format!("/{}", command.split_whitespace().next().unwrap_or(""));
            let whitelisted = policy
                .allowed_commands
                .iter()
                .any(|prefix| command_token.starts_with(prefix.as_str()));
            if !whitelisted {
                return Some(SecurityViolation {
                    violation_type: ViolationType::CommandNotWhitelisted,
                    channel_id: message.channel_id.clone(),
                    user_key: message.user_key.clone(),
                    detail: format!("command {command_token} is not whitelisted"),
                    blocked: policy.block_on_violation,
                    timestamp_ms: utc_now_ms(),
                });
            }
            return None;
        }

        let lowered = trimmed.to_lowercase();
        let mentions_execute = EXECUTE_KEYWORDS.iter().any(|kw| lowered.contains(kw));
        if mentions_execute && !policy.allowed_operations.contains(&OperationType::Execute) {
            return Some(SecurityViolation {
                violation_type: ViolationType::OperationDenied,
                channel_id: message.channel_id.clone(),
                user_key: message.user_key.clone(),
                detail: "message references execute-like keywords".to_string(),
                blocked: false,
                timestamp_ms: utc_now_ms(),
            });
        }

        None
    }
}

#[async_trait]
impl Middleware for PolicyEnforcer {
    async fn process_inbound(
        &self,
        message: &InboundMessage,
        mut context: ProcessingContext,
    ) -> ProcessingContext {
        let Some(policy) = self.get_policy_for_channel(&message.channel_id) else {
            return context;
        };

        if let Some(violation) = self.check_inbound(message, &policy) {
            context.set_metadata(
                "security_violation",
                serde_json::to_value(&violation).unwrap_or(serde_json::Value::Null),
            );
            let blocked = violation.blocked;
            self.log_violation(violation);
            if blocked {
                context.status = ProcessingStatus::Reject;
            }
        }

        context
    }

    async fn process_outbound(
        &self,
        _message: &OutboundMessage,
        context: ProcessingContext,
    ) -> ProcessingContext {
        context
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::Value;

    fn inbound(text: &str) -> InboundMessage {
        InboundMessage::new(
            "c1",
            "u1",
            "u1",
            "m1",
            Utc::now(),
            gateway_core::MessageType::Text,
            Some(text.to_string()),
            vec![],
            None,
            Value::Null,
        )
        .unwrap()
    }

    #[test]
    fn chat_only_forces_allow_execute_false() {
        let policy = SecurityPolicy::new(
            SecurityMode::ChatOnly,
            true,
            vec![],
            false,
            None,
            vec![OperationType::Execute],
            20,
            true,
        );
        assert!(!policy.allow_execute);
        assert!(!policy.allowed_operations.contains(&OperationType::Execute));
    }

    #[test]
    fn chat_is_always_allowed() {
        let policy = SecurityPolicy::new(
            SecurityMode::ChatExecRestricted,
            false,
            vec![],
            false,
            None,
            vec![],
            20,
            true,
        );
        assert!(policy.allowed_operations.contains(&OperationType::Chat));
    }

    #[tokio::test]
    async fn rejects_non_whitelisted_command_when_blocking() {
        let enforcer = PolicyEnforcer::new(None);
        enforcer.set_channel_policy("c1", SecurityPolicy::chat_only());
        let ctx = ProcessingContext::new("m1", "c1");
        let ctx = enforcer.process_inbound(&inbound("/danger now"), ctx).await;
        assert_eq!(ctx.status, ProcessingStatus::Reject);
    }

    #[tokio::test]
    async fn execute_keyword_only_warns() {
        let enforcer = PolicyEnforcer::new(None);
        enforcer.set_channel_policy("c1", SecurityPolicy::chat_only());
        let ctx = ProcessingContext::new("m1", "c1");
        let ctx = enforcer.process_inbound(&inbound("please execute the plan"), ctx).await;
        assert_eq!(ctx.status, ProcessingStatus::Continue);
        assert!(ctx.metadata.contains_key("security_violation"));
    }

    #[test]
    fn admin_token_round_trips() {
        let (token, hash) = generate_admin_token();
        assert!(verify_admin_token(&token, &hash));
        assert!(!verify_admin_token("wrong-token", &hash));
    }
}
