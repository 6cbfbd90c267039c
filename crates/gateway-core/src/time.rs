use chrono::{DateTime, Utc};

/// Current UTC time as epoch milliseconds.
///
/// Every persisted timestamp in the gateway is an epoch-ms integer — see
/// DATA MODEL in SPEC_FULL.md. Keeping one conversion point avoids the
/// float-vs-int drift that crept into the original Python implementation.
pub fn utc_now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Current UTC time as epoch seconds, used by the synthetic outbound
/// message id (`out_{channel_id}_{utc_now_s}`).
pub fn utc_now_s() -> i64 {
    Utc::now().timestamp()
}

pub fn from_epoch_ms(ms: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
}

pub fn to_epoch_ms(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}
