pub mod audit;
pub mod context;
pub mod dedupe;
pub mod policy;
pub mod rate_limit;

pub use audit::{AuditEntry, AuditMiddleware, AuditStats, AuditStore};
pub use context::{Middleware, ProcessingContext, ProcessingStatus};
pub use dedupe::{DedupeMiddleware, DedupeStats, DedupeStore};
pub use policy::{
    generate_admin_token, verify_admin_token, OperationType, PolicyEnforcer, PolicyStats,
    RemoteExposureDetector, SecurityMode, SecurityPolicy, SecurityViolation, ViolationType,
};
pub use rate_limit::{RateLimitMiddleware, RateLimitStats, RateLimitStore};
