//! Account sign-up and login.
//!
//! Passwords are hashed with Argon2id and only ever stored as PHC strings.

use std::time::SystemTime;

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use domain::{Account, AccountId, AccountRepository, CoreError, UserEmail};
use tracing::info;

/// Shortest accepted password.
pub const MIN_PASSWORD_LEN: usize = 8;

#[derive(Debug, thiserror::Error)]
pub enum AccountError {
    #[error("{0}")]
    InvalidInput(String),
    #[error("an account with this email already exists")]
    EmailTaken,
    #[error("invalid email or password")]
    InvalidCredentials,
    #[error("password hashing failed: {0}")]
    Hashing(String),
    #[error(transparent)]
    Store(#[from] CoreError),
}

pub fn hash_password(password: &str) -> Result<String, AccountError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AccountError::Hashing(e.to_string()))
}

/// `false` for a wrong password and for an unparsable stored hash alike.
pub fn verify_password(password: &str, hash: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

/// Register a new account.
pub fn signup<R: AccountRepository>(
    repo: &R,
    name: &str,
    email: &str,
    password: &str,
    now: SystemTime,
) -> Result<Account, AccountError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(AccountError::InvalidInput("name is required".into()));
    }
    let email = UserEmail::new(email.trim())
        .map_err(|_| AccountError::InvalidInput("a valid email is required".into()))?;
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AccountError::InvalidInput(format!(
            "password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }

    let account = Account {
        id: AccountId::new(uuid::Uuid::new_v4().to_string())?,
        name: name.to_string(),
        email,
        password_hash: hash_password(password)?,
        created_at: now,
    };
    match repo.create(account.clone()) {
        Ok(()) => {
            info!(account_id = %account.id.as_str(), "account created");
            Ok(account)
        }
        Err(CoreError::AlreadyExists) => Err(AccountError::EmailTaken),
        Err(e) => Err(e.into()),
    }
}

/// Check credentials. Unknown emails and wrong passwords are indistinguishable.
pub fn login<R: AccountRepository>(
    repo: &R,
    email: &str,
    password: &str,
) -> Result<Account, AccountError> {
    let Ok(email) = UserEmail::new(email.trim()) else {
        return Err(AccountError::InvalidCredentials);
    };
    match repo.find_by_email(&email)? {
        Some(account) if verify_password(password, &account.password_hash) => Ok(account),
        _ => Err(AccountError::InvalidCredentials),
    }
}
