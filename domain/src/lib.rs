//! Domain library for the URL Shortener.
//!
//! Holds the domain types, ports (traits), and error definitions for link
//! identity, ownership and visit recording. Keep adapters and IO concerns out
//! of this crate; the only storage implementation living here is the
//! in-memory one used by tests and local runs.

use std::time::SystemTime;

/// Compact, URL-safe identifier standing in for a target URL.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ShortId(String);

impl ShortId {
    /// Longest identifier accepted from the outside world.
    pub const MAX_LEN: usize = 64;

    pub fn new<S: Into<String>>(s: S) -> Result<Self, CoreError> {
        let val = s.into();
        if val.is_empty() {
            return Err(CoreError::InvalidShortId("empty".into()));
        }
        if val.len() > Self::MAX_LEN {
            return Err(CoreError::InvalidShortId("too long".into()));
        }
        if !val.bytes().all(shortid::is_alphabet_byte) {
            return Err(CoreError::InvalidShortId("invalid characters".into()));
        }
        Ok(Self(val))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ShortId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Email address of an account holder.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UserEmail(String);

impl UserEmail {
    pub fn new<S: Into<String>>(s: S) -> Result<Self, CoreError> {
        let val = s.into();
        // Lightweight check; full RFC compliance not required here
        let Some((local, domain)) = val.rsplit_once('@') else {
            return Err(CoreError::InvalidEmail);
        };
        if local.is_empty() || domain.is_empty() || val.chars().any(char::is_whitespace) {
            return Err(CoreError::InvalidEmail);
        }
        Ok(Self(val))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Stable identifier of an authenticated account.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AccountId(String);

impl AccountId {
    pub fn new<S: Into<String>>(s: S) -> Result<Self, CoreError> {
        let val = s.into();
        if val.trim().is_empty() {
            return Err(CoreError::InvalidInput("empty account id".into()));
        }
        Ok(Self(val))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// An authenticated identity as asserted by a verified session token.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
    pub id: AccountId,
    pub email: UserEmail,
}

/// Who is making a request. Token verification always yields one of these;
/// anything that fails verification is `Anonymous`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Caller {
    Authenticated(Identity),
    Anonymous,
}

impl Caller {
    pub fn identity(&self) -> Option<&Identity> {
        match self {
            Caller::Authenticated(identity) => Some(identity),
            Caller::Anonymous => None,
        }
    }
}

/// One redirect traversal of a link.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct VisitEvent {
    pub timestamp: SystemTime,
}

/// Stored short link together with its visit history.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LinkRecord {
    pub short_id: ShortId,
    pub target_url: String,
    /// `None` means the link was created anonymously.
    pub created_by: Option<AccountId>,
    pub created_at: SystemTime,
    /// Append-only, in insertion order.
    pub visits: Vec<VisitEvent>,
}

impl LinkRecord {
    pub fn new(
        short_id: ShortId,
        target_url: String,
        created_by: Option<AccountId>,
        created_at: SystemTime,
    ) -> Self {
        Self {
            short_id,
            target_url,
            created_by,
            created_at,
            visits: Vec::new(),
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.created_by.is_none()
    }
}

/// A registered account. The password is only ever held as a hash.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Account {
    pub id: AccountId,
    pub name: String,
    pub email: UserEmail,
    pub password_hash: String,
    pub created_at: SystemTime,
}

impl Account {
    pub fn identity(&self) -> Identity {
        Identity {
            id: self.id.clone(),
            email: self.email.clone(),
        }
    }
}

/// Creator constraint used in store filters.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CreatorMatch {
    /// Only links with no creator.
    Anonymous,
    /// Only links created by this account.
    Account(AccountId),
}

/// Conjunctive filter over link records, evaluated by the store in a single
/// query. Unset fields match everything; an empty `short_ids` list matches
/// nothing.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LinkFilter {
    pub short_ids: Option<Vec<ShortId>>,
    pub created_by: Option<CreatorMatch>,
}

impl LinkFilter {
    pub fn by_id(id: &ShortId) -> Self {
        Self {
            short_ids: Some(vec![id.clone()]),
            created_by: None,
        }
    }

    /// The record with this id, only if `account` created it.
    pub fn owned_by(id: &ShortId, account: &AccountId) -> Self {
        Self {
            short_ids: Some(vec![id.clone()]),
            created_by: Some(CreatorMatch::Account(account.clone())),
        }
    }

    pub fn created_by(account: &AccountId) -> Self {
        Self {
            short_ids: None,
            created_by: Some(CreatorMatch::Account(account.clone())),
        }
    }

    /// Anonymous records among the given ids.
    pub fn anonymous_among(ids: &[ShortId]) -> Self {
        Self {
            short_ids: Some(ids.to_vec()),
            created_by: Some(CreatorMatch::Anonymous),
        }
    }

    pub fn matches(&self, record: &LinkRecord) -> bool {
        if let Some(ref ids) = self.short_ids {
            if !ids.contains(&record.short_id) {
                return false;
            }
        }
        match (&self.created_by, &record.created_by) {
            (None, _) => true,
            (Some(CreatorMatch::Anonymous), creator) => creator.is_none(),
            (Some(CreatorMatch::Account(want)), Some(have)) => want == have,
            (Some(CreatorMatch::Account(_)), None) => false,
        }
    }
}

/// Time source abstraction to make code testable.
pub trait Clock: Send + Sync {
    fn now(&self) -> SystemTime;
}

/// Wall-clock time.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// Source of fresh short identifiers.
pub trait IdGenerator: Send + Sync {
    fn generate(&self) -> ShortId;
}

/// Storage port for link records and their visit history.
///
/// Every method is a single atomic store operation; the engine never composes
/// a read with a later write on the same record.
pub trait LinkStore: Send + Sync {
    /// Insert a new record; `CoreError::AlreadyExists` if the id is taken.
    fn insert_unique(&self, record: LinkRecord) -> Result<(), CoreError>;
    fn find_one(&self, filter: &LinkFilter) -> Result<Option<LinkRecord>, CoreError>;
    /// Matching records, newest first.
    fn find_many(&self, filter: &LinkFilter) -> Result<Vec<LinkRecord>, CoreError>;
    /// Append a visit and return the updated record, or `None` if no record
    /// has this id. The stored sequence stays non-decreasing: an event older
    /// than the current tail is stamped with the tail's timestamp.
    fn append_visit(
        &self,
        id: &ShortId,
        event: VisitEvent,
    ) -> Result<Option<LinkRecord>, CoreError>;
    /// Delete the first record matching `filter`; `true` if one was removed.
    fn delete_one(&self, filter: &LinkFilter) -> Result<bool, CoreError>;
}

/// Storage port for accounts.
pub trait AccountRepository: Send + Sync {
    /// `CoreError::AlreadyExists` if the email is already registered.
    fn create(&self, account: Account) -> Result<(), CoreError>;
    fn find_by_email(&self, email: &UserEmail) -> Result<Option<Account>, CoreError>;
}

/// Core domain errors.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("invalid short id: {0}")]
    InvalidShortId(String),
    #[error("invalid user email")]
    InvalidEmail,
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("resource already exists")]
    AlreadyExists,
    #[error("not found")]
    NotFound,
    #[error("could not allocate a unique short id after {attempts} attempts")]
    CreationFailed { attempts: usize },
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
}

pub mod adapters;
pub mod quota;
pub mod service;
pub mod shortid;
pub mod validate;
