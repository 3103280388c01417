//! What a connection knows about the HTTP request that opened it.

use std::collections::HashMap;

use axum::http::HeaderMap;
use axum::http::header::{ACCEPT_LANGUAGE, COOKIE, USER_AGENT};
use serde_json::Value;

/// Header set by the fronting proxy with the client address.
pub const REAL_IP_HEADER: &str = "x-real-ip";

/// Request attributes captured at upgrade time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpgradeInfo {
    /// Client address as reported by the proxy.
    pub ip: Option<String>,
    /// `User-Agent` header.
    pub user_agent: Option<String>,
    /// `Accept-Language` header.
    pub accept_language: Option<String>,
    /// Raw `Cookie` header.
    pub cookie: Option<String>,
    /// Unix time (seconds) the transport was accepted.
    pub connected_at: i64,
}

impl UpgradeInfo {
    /// Captures the relevant headers of an upgrade request.
    #[must_use]
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let text = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        Self {
            ip: text(REAL_IP_HEADER),
            user_agent: text(USER_AGENT.as_str()),
            accept_language: text(ACCEPT_LANGUAGE.as_str()),
            cookie: text(COOKIE.as_str()),
            connected_at: chrono::Utc::now().timestamp(),
        }
    }

    /// Fields replicated through the metadata bridge, in recording order.
    /// The cookie is left out: it carries the session credential.
    #[must_use]
    pub fn fields(&self) -> Vec<(&'static str, Option<Value>)> {
        vec![
            ("IP", self.ip.clone().map(Value::from)),
            ("userAgent", self.user_agent.clone().map(Value::from)),
            ("acceptLanguage", self.accept_language.clone().map(Value::from)),
            ("connectionTime", Some(Value::from(self.connected_at))),
        ]
    }

    /// Cookies of the request, by name.
    #[must_use]
    pub fn cookies(&self) -> HashMap<String, String> {
        self.cookie.as_deref().map(parse_cookies).unwrap_or_default()
    }
}

/// Parses a `Cookie` header into name/value pairs. The first occurrence of
/// a name wins; surrounding double quotes are stripped from values.
#[must_use]
pub fn parse_cookies(header: &str) -> HashMap<String, String> {
    let mut cookies = HashMap::new();
    for pair in header.split(';') {
        let Some((name, value)) = pair.split_once('=') else {
            continue;
        };
        let name = name.trim();
        if name.is_empty() {
            continue;
        }
        let value = value.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|v| v.strip_suffix('"'))
            .unwrap_or(value);
        cookies
            .entry(name.to_string())
            .or_insert_with(|| value.to_string());
    }
    cookies
}
