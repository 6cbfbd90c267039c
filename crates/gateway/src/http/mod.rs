use axum::http::HeaderMap;

pub mod discord;
pub mod management;
pub mod slack;
pub mod sms;
pub mod telegram;
pub mod whatsapp;

/// Case-insensitive header lookup returning the raw string value.
pub fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}
