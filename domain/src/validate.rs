//! Lightweight input validation helpers. Keep logic minimal and deterministic.

use url::Url;

use crate::CoreError;

/// Longest target URL accepted.
pub const MAX_URL_LEN: usize = 2048;

/// Validate a target URL: non-empty, http/https scheme with a host, bounded
/// length, no whitespace or control characters.
/// Returns the normalized URL that should be stored. Its characters are all
/// legal in a `Location` header.
pub fn validate_target_url(s: &str) -> Result<String, CoreError> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return Err(CoreError::InvalidUrl("url is required".into()));
    }
    if trimmed.len() > MAX_URL_LEN {
        return Err(CoreError::InvalidUrl("too long".into()));
    }
    // The parser silently drops tabs and newlines, so reject them up front
    if trimmed.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(CoreError::InvalidUrl(
            "must not contain whitespace or control characters".into(),
        ));
    }

    let url = Url::parse(trimmed).map_err(|e| CoreError::InvalidUrl(e.to_string()))?;
    match url.scheme() {
        "http" | "https" => {}
        other => {
            return Err(CoreError::InvalidUrl(format!(
                "unsupported scheme '{other}', use http or https"
            )))
        }
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(CoreError::InvalidUrl("missing host".into()));
    }

    let normalized = url.as_str();
    if normalized.len() > MAX_URL_LEN {
        return Err(CoreError::InvalidUrl("too long".into()));
    }
    Ok(normalized.to_string())
}
