//! session-token: signed, time-bounded identity tokens for account sessions.
//!
//! Purpose
//! - Issue an HS256 JWT carrying an account's stable id and email once the
//!   account has signed up or logged in.
//! - Verify presented tokens, failing closed: anything that does not verify
//!   becomes `Caller::Anonymous`, never an error.
//!
//! API
//! - `TokenService::new(secret, ttl)` → `Result<TokenService, TokenError>`
//! - `issue(&identity)` → `Result<String, TokenError>`
//! - `verify(token)` → `Caller`
//!
//! Notes
//! - Tokens are self-describing; there is no server-side session store, so a
//!   token lives exactly as long as its `exp` claim allows.
//! - The secret is operator configuration and must never be compiled in.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use domain::{AccountId, Caller, Identity, UserEmail};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Default validity window.
pub const DEFAULT_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("token secret must not be empty")]
    EmptySecret,
    #[error("token validity window must be positive")]
    ZeroTtl,
    #[error("failed to sign token: {0}")]
    Signing(#[from] jsonwebtoken::errors::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Claims {
    sub: String,
    email: String,
    iat: u64,
    exp: u64,
}

/// Issues and verifies session tokens with a server-held secret.
#[derive(Clone)]
pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    ttl: Duration,
}

impl TokenService {
    pub fn new(secret: &[u8], ttl: Duration) -> Result<Self, TokenError> {
        if secret.is_empty() {
            return Err(TokenError::EmptySecret);
        }
        if ttl.is_zero() {
            return Err(TokenError::ZeroTtl);
        }
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation,
            ttl,
        })
    }

    /// Validity window of issued tokens.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn issue(&self, identity: &Identity) -> Result<String, TokenError> {
        self.issue_at(identity, SystemTime::now())
    }

    /// Issue a token as if the current time were `now`.
    pub fn issue_at(&self, identity: &Identity, now: SystemTime) -> Result<String, TokenError> {
        let iat = unix_secs(now);
        let claims = Claims {
            sub: identity.id.as_str().to_string(),
            email: identity.email.as_str().to_string(),
            iat,
            exp: iat.saturating_add(self.ttl.as_secs()),
        };
        Ok(encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)?)
    }

    /// Resolve a presented token to a caller. Never fails: malformed, forged,
    /// expired or otherwise unusable tokens all yield `Caller::Anonymous`.
    pub fn verify(&self, token: &str) -> Caller {
        let token = token.trim();
        if token.is_empty() {
            return Caller::Anonymous;
        }
        let claims = match decode::<Claims>(token, &self.decoding_key, &self.validation) {
            Ok(data) => data.claims,
            Err(e) => {
                debug!(reason = ?e.kind(), "session token rejected");
                return Caller::Anonymous;
            }
        };
        match (AccountId::new(claims.sub), UserEmail::new(claims.email)) {
            (Ok(id), Ok(email)) => Caller::Authenticated(Identity { id, email }),
            _ => {
                debug!("session token carries an unusable identity");
                Caller::Anonymous
            }
        }
    }
}

fn unix_secs(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"test_secret_key_32_bytes_long!!!";

    fn identity() -> Identity {
        Identity {
            id: AccountId::new("acct-1").unwrap(),
            email: UserEmail::new("user@example.com").unwrap(),
        }
    }

    fn service() -> TokenService {
        TokenService::new(SECRET, DEFAULT_TTL).unwrap()
    }

    #[test]
    fn issue_then_verify() {
        let svc = service();
        let token = svc.issue(&identity()).unwrap();
        assert_eq!(svc.verify(&token), Caller::Authenticated(identity()));
    }

    #[test]
    fn garbage_is_anonymous() {
        let svc = service();
        for token in ["", "   ", "not-a-token", "a.b.c", "e30.e30.e30"] {
            assert_eq!(svc.verify(token), Caller::Anonymous, "token {token:?}");
        }
    }

    #[test]
    fn wrong_secret_is_anonymous() {
        let other = TokenService::new(b"another-secret-entirely-32-bytes", DEFAULT_TTL).unwrap();
        let token = other.issue(&identity()).unwrap();
        assert_eq!(service().verify(&token), Caller::Anonymous);
    }

    #[test]
    fn spliced_payload_is_anonymous() {
        let svc = service();
        let mine = svc.issue(&identity()).unwrap();
        let theirs = svc
            .issue(&Identity {
                id: AccountId::new("acct-2").unwrap(),
                email: UserEmail::new("other@example.com").unwrap(),
            })
            .unwrap();
        let m: Vec<&str> = mine.split('.').collect();
        let t: Vec<&str> = theirs.split('.').collect();
        let forged = format!("{}.{}.{}", m[0], t[1], m[2]);
        assert_eq!(svc.verify(&forged), Caller::Anonymous);
    }

    #[test]
    fn expired_is_anonymous() {
        let svc = TokenService::new(SECRET, Duration::from_secs(60)).unwrap();
        let issued = SystemTime::now() - Duration::from_secs(3600);
        let token = svc.issue_at(&identity(), issued).unwrap();
        assert_eq!(svc.verify(&token), Caller::Anonymous);
    }

    #[test]
    fn unusable_identity_is_anonymous() {
        let claims = Claims {
            sub: "acct-1".into(),
            email: "not-an-email".into(),
            iat: unix_secs(SystemTime::now()),
            exp: unix_secs(SystemTime::now()) + 600,
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(SECRET),
        )
        .unwrap();
        assert_eq!(service().verify(&token), Caller::Anonymous);
    }

    #[test]
    fn rejects_bad_configuration() {
        assert!(matches!(TokenService::new(b"", DEFAULT_TTL), Err(TokenError::EmptySecret)));
        assert!(matches!(TokenService::new(SECRET, Duration::ZERO), Err(TokenError::ZeroTtl)));
    }
}
