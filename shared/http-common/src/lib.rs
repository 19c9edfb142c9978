//! Shared HTTP utilities for the URL shortener workspace.
//!
//! Provides framework-agnostic JSON error bodies, cookie building, time formatting and short-URL construction used by api-server.

use chrono::{DateTime, SecondsFormat, Utc};
use cookie::{Cookie, SameSite};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

// ============================================================================
// JSON Response Helpers (framework-agnostic)
// ============================================================================

/// Create a structured error JSON with a default message based on the code.
///
/// Returns: `{"error": {"code": "<code>", "message": "<default message>"}}`
pub fn json_err(code: &str) -> serde_json::Value {
    let message = match code {
        "not_found" => "Resource not found",
        "bad_request" => "Bad request",
        "invalid_request" => "Invalid request",
        "unauthorized" => "Authentication required",
        "conflict" => "Resource already exists",
        "unavailable" => "Service temporarily unavailable",
        "error" | "internal" => "Internal server error",
        _ => code, // Fallback to code as message for unknown codes
    };
    serde_json::json!({"error": {"code": code, "message": message}})
}

/// Create a structured error JSON with a custom message.
///
/// Returns: `{"error": {"code": "<code>", "message": "<message>"}}`
pub fn json_error_with_message(code: &str, message: &str) -> serde_json::Value {
    serde_json::json!({"error": {"code": code, "message": message}})
}

/// Body returned when an anonymous client has used up its creation quota.
///
/// Kept flat (`{"error": ..., "needAuth": true}`) because browser clients key
/// on `needAuth` to show the sign-up prompt.
pub fn json_quota_exceeded() -> serde_json::Value {
    serde_json::json!({"error": "Limit reached", "needAuth": true})
}

// ============================================================================
// Cookies
// ============================================================================

/// Attributes shared by every cookie the service sets.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CookieOptions {
    /// Hide the cookie from client-side scripts.
    pub http_only: bool,
    /// Only send over HTTPS.
    pub secure: bool,
}

/// Build a cookie scoped to the whole site. The value is percent-encoded when
/// the cookie is rendered with [`Cookie::encoded`].
pub fn build_cookie(
    name: &str,
    value: impl Into<String>,
    max_age: Duration,
    opts: CookieOptions,
) -> Cookie<'static> {
    let max_age = i64::try_from(max_age.as_secs()).unwrap_or(i64::MAX);
    Cookie::build((name.to_string(), value.into()))
        .path("/")
        .max_age(cookie::time::Duration::seconds(max_age))
        .http_only(opts.http_only)
        .secure(opts.secure)
        .same_site(SameSite::Lax)
        .build()
}

/// Build a cookie that removes `name` from the client.
pub fn removal_cookie(name: &str, opts: CookieOptions) -> Cookie<'static> {
    let mut c = Cookie::build((name.to_string(), String::new()))
        .path("/")
        .http_only(opts.http_only)
        .secure(opts.secure)
        .same_site(SameSite::Lax)
        .build();
    c.make_removal();
    c
}

// ============================================================================
// URL Building
// ============================================================================

/// Build the public short URL for `short_id`.
///
/// Prefers the configured `base_url`; otherwise falls back to
/// `http://{host}/url/{id}` or `/url/{id}` if host is empty.
pub fn build_short_url(base_url: Option<&str>, host: &str, short_id: &str) -> String {
    if let Some(base) = base_url.filter(|b| !b.is_empty()) {
        return format!("{}/url/{}", base.trim_end_matches('/'), short_id);
    }
    if host.is_empty() {
        format!("/url/{}", short_id)
    } else {
        format!("http://{}/url/{}", host, short_id)
    }
}

// ============================================================================
// Time Utilities
// ============================================================================

/// Convert SystemTime to RFC3339 string (millisecond precision, UTC).
pub fn system_time_to_rfc3339(t: SystemTime) -> String {
    let dt: DateTime<Utc> = t.into();
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Milliseconds since the UNIX epoch, the unit visit timestamps are reported in.
pub fn system_time_to_millis(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_err() {
        let err = json_err("not_found");
        assert_eq!(err, serde_json::json!({"error": {"code": "not_found", "message": "Resource not found"}}));

        // Unknown code falls back to code as message
        let err = json_err("custom_error");
        assert_eq!(err, serde_json::json!({"error": {"code": "custom_error", "message": "custom_error"}}));
    }

    #[test]
    fn test_json_error_with_message() {
        let err = json_error_with_message("bad_request", "Invalid input");
        assert_eq!(
            err,
            serde_json::json!({"error": {"code": "bad_request", "message": "Invalid input"}})
        );
    }

    #[test]
    fn test_quota_body() {
        assert_eq!(json_quota_exceeded()["needAuth"], serde_json::json!(true));
    }

    #[test]
    fn test_build_cookie() {
        let opts = CookieOptions { http_only: false, secure: false };
        let c = build_cookie("anon_urls", "[\"abc12345\"]", Duration::from_secs(604800), opts);
        assert_eq!(c.value(), "[\"abc12345\"]");
        assert_eq!(c.path(), Some("/"));
        assert_eq!(c.same_site(), Some(SameSite::Lax));
        assert_eq!(c.max_age(), Some(cookie::time::Duration::seconds(604800)));
        assert_ne!(c.http_only(), Some(true));

        let rendered = c.encoded().to_string();
        assert!(rendered.contains("Max-Age=604800"));
        assert!(!rendered.contains('"'));
        let parsed = Cookie::parse_encoded(rendered).unwrap();
        assert_eq!(parsed.value(), "[\"abc12345\"]");
    }

    #[test]
    fn test_removal_cookie() {
        let secure = CookieOptions { http_only: true, secure: true };
        let c = removal_cookie("uid", secure);
        assert_eq!(c.value(), "");
        assert_eq!(c.max_age(), Some(cookie::time::Duration::ZERO));
        assert_eq!(c.http_only(), Some(true));
        assert_eq!(c.secure(), Some(true));
        let rendered = c.to_string();
        assert!(rendered.starts_with("uid=;"));
        assert!(rendered.contains("Max-Age=0"));
    }

    #[test]
    fn test_build_short_url() {
        assert_eq!(build_short_url(Some("https://s.example/"), "ignored", "abc"), "https://s.example/url/abc");
        assert_eq!(build_short_url(None, "localhost:8002", "abc"), "http://localhost:8002/url/abc");
        assert_eq!(build_short_url(Some(""), "", "abc"), "/url/abc");
    }

    #[test]
    fn test_time_formats() {
        let t = UNIX_EPOCH + Duration::from_millis(1_500);
        assert_eq!(system_time_to_rfc3339(t), "1970-01-01T00:00:01.500Z");
        assert_eq!(system_time_to_millis(t), 1_500);
    }
}
