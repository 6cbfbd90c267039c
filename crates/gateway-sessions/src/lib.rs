pub mod router;
pub mod store;

pub use router::{ResolvedContext, SessionRouter};
pub use store::{
    scope_from_str, scope_to_str, Session, SessionHistoryEntry, SessionStore, STATUS_ACTIVE,
    STATUS_ARCHIVED, STATUS_INACTIVE,
};
