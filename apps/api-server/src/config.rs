//! Centralized configuration for api-server.
//!
//! All environment variables are loaded and validated at startup to fail fast
//! on misconfiguration rather than at request time.

use axum::http::HeaderValue;
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Minimum secret length below which a warning is logged.
const RECOMMENDED_SECRET_LEN: usize = 32;

/// Storage backend provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageProvider {
    /// In-memory storage (data lost on restart)
    Memory,
    /// SQLite file-based storage
    Sqlite,
}

impl StorageProvider {
    fn from_str(s: &str) -> Self {
        if s.eq_ignore_ascii_case("memory") {
            Self::Memory
        } else {
            Self::Sqlite
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl LogFormat {
    fn from_str(s: &str) -> Self {
        if s.eq_ignore_ascii_case("json") {
            Self::Json
        } else {
            Self::Pretty
        }
    }
}

/// Configuration error.
#[derive(Debug)]
pub struct ConfigError {
    pub field: &'static str,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Configuration error for {}: {}", self.field, self.message)
    }
}

impl std::error::Error for ConfigError {}

/// Server configuration loaded from environment variables.
///
/// All fields are validated at construction time.
#[derive(Clone)]
pub struct Config {
    /// Server port (default: 8002)
    pub port: u16,
    /// Secret used to sign session tokens (required)
    pub token_secret: String,
    /// Session token validity window (default: 7 days)
    pub token_ttl: Duration,
    /// CORS allow origin
    pub cors_allow_origin: HeaderValue,
    /// Storage provider
    pub storage_provider: StorageProvider,
    /// SQLite database path (when using sqlite storage)
    pub db_path: PathBuf,
    /// Log format
    pub log_format: LogFormat,
    /// Public base URL used to build short URLs
    pub base_url: Option<String>,
    /// Whether cookies carry the Secure attribute
    pub cookie_secure: bool,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("port", &self.port)
            .field("token_secret", &"<redacted>")
            .field("token_ttl", &self.token_ttl)
            .field("cors_allow_origin", &self.cors_allow_origin)
            .field("storage_provider", &self.storage_provider)
            .field("db_path", &self.db_path)
            .field("log_format", &self.log_format)
            .field("base_url", &self.base_url)
            .field("cookie_secure", &self.cookie_secure)
            .finish()
    }
}

impl Config {
    /// Load and validate configuration from environment variables.
    ///
    /// Fails fast on invalid configuration.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(var: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Port
        let port = match var("PORT") {
            Some(s) => s.parse().map_err(|_| ConfigError {
                field: "PORT",
                message: format!("'{}' is not a valid port", s),
            })?,
            None => 8002,
        };

        // Token secret: operator supplied, never defaulted
        let token_secret = var("TOKEN_SECRET")
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ConfigError {
                field: "TOKEN_SECRET",
                message: "Required; set it to a long random value".into(),
            })?;

        // Token validity window
        let token_ttl = match var("TOKEN_TTL_SECS") {
            Some(s) => match s.parse::<u64>() {
                Ok(n) if n > 0 => Duration::from_secs(n),
                _ => {
                    return Err(ConfigError {
                        field: "TOKEN_TTL_SECS",
                        message: format!("'{}' is not a positive number of seconds", s),
                    })
                }
            },
            None => session_token::DEFAULT_TTL,
        };

        // CORS allow origin
        let cors_origin_str = var("CORS_ALLOW_ORIGIN").unwrap_or_else(|| "*".into());
        let cors_allow_origin = if cors_origin_str == "*" {
            HeaderValue::from_static("*")
        } else {
            HeaderValue::from_str(&cors_origin_str).map_err(|e| ConfigError {
                field: "CORS_ALLOW_ORIGIN",
                message: format!("Invalid header value '{}': {}", cors_origin_str, e),
            })?
        };

        // Storage provider
        let storage_provider =
            StorageProvider::from_str(&var("STORAGE_PROVIDER").unwrap_or_else(|| "sqlite".into()));

        // DB path (for sqlite)
        let db_path = var("DB_PATH")
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./data/shortlinks.db"));

        // Log format
        let log_format = LogFormat::from_str(&var("LOG_FORMAT").unwrap_or_else(|| "pretty".into()));

        // Public base URL
        let base_url = var("BASE_URL").filter(|s| !s.is_empty());

        // Secure cookies
        let cookie_secure = var("COOKIE_SECURE")
            .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        Ok(Self {
            port,
            token_secret,
            token_ttl,
            cors_allow_origin,
            storage_provider,
            db_path,
            log_format,
            base_url,
            cookie_secure,
        })
    }

    /// Log warnings about insecure configuration.
    pub fn warn_if_insecure(&self) {
        if self.token_secret.len() < RECOMMENDED_SECRET_LEN {
            tracing::warn!(
                len = self.token_secret.len(),
                "TOKEN_SECRET is shorter than {} bytes; use a longer random value",
                RECOMMENDED_SECRET_LEN
            );
        }
        if !self.cookie_secure {
            tracing::warn!(
                "COOKIE_SECURE is not set: session cookies will be sent over plain HTTP. \
                 Enable it for production deployments."
            );
        }
        if self.storage_provider == StorageProvider::Memory {
            tracing::warn!("STORAGE_PROVIDER=memory: links and accounts are lost on restart");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn storage_provider_parsing() {
        assert_eq!(StorageProvider::from_str("memory"), StorageProvider::Memory);
        assert_eq!(StorageProvider::from_str("MEMORY"), StorageProvider::Memory);
        assert_eq!(StorageProvider::from_str("sqlite"), StorageProvider::Sqlite);
        assert_eq!(StorageProvider::from_str("anything"), StorageProvider::Sqlite);
    }

    #[test]
    fn log_format_parsing() {
        assert_eq!(LogFormat::from_str("pretty"), LogFormat::Pretty);
        assert_eq!(LogFormat::from_str("json"), LogFormat::Json);
        assert_eq!(LogFormat::from_str("JSON"), LogFormat::Json);
        assert_eq!(LogFormat::from_str("anything"), LogFormat::Pretty);
    }

    #[test]
    fn secret_is_required() {
        let err = load(&[]).unwrap_err();
        assert_eq!(err.field, "TOKEN_SECRET");
        let err = load(&[("TOKEN_SECRET", "")]).unwrap_err();
        assert_eq!(err.field, "TOKEN_SECRET");
    }

    #[test]
    fn defaults_apply() {
        let cfg = load(&[("TOKEN_SECRET", "s3cr3t")]).unwrap();
        assert_eq!(cfg.port, 8002);
        assert_eq!(cfg.token_ttl, session_token::DEFAULT_TTL);
        assert_eq!(cfg.storage_provider, StorageProvider::Sqlite);
        assert_eq!(cfg.db_path, PathBuf::from("./data/shortlinks.db"));
        assert_eq!(cfg.base_url, None);
        assert!(!cfg.cookie_secure);
        assert!(!format!("{:?}", cfg).contains("s3cr3t"));
    }

    #[test]
    fn invalid_values_fail_fast() {
        assert_eq!(load(&[("TOKEN_SECRET", "x"), ("PORT", "http")]).unwrap_err().field, "PORT");
        assert_eq!(
            load(&[("TOKEN_SECRET", "x"), ("TOKEN_TTL_SECS", "0")]).unwrap_err().field,
            "TOKEN_TTL_SECS"
        );
    }

    #[test]
    fn overrides_apply() {
        let cfg = load(&[
            ("TOKEN_SECRET", "x"),
            ("PORT", "9000"),
            ("TOKEN_TTL_SECS", "3600"),
            ("STORAGE_PROVIDER", "memory"),
            ("BASE_URL", "https://s.example"),
            ("COOKIE_SECURE", "true"),
        ])
        .unwrap();
        assert_eq!(cfg.port, 9000);
        assert_eq!(cfg.token_ttl, Duration::from_secs(3600));
        assert_eq!(cfg.storage_provider, StorageProvider::Memory);
        assert_eq!(cfg.base_url.as_deref(), Some("https://s.example"));
        assert!(cfg.cookie_secure);
    }
}
