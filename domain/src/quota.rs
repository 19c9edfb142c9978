//! Anonymous creation quota, held entirely by the client.
//!
//! An anonymous visitor owns the links whose ids are listed in a small JSON
//! array the client presents with each request. Nothing is stored server
//! side: the client state is parsed on every request and a replacement is
//! handed back only when a link was actually created.

use std::time::{Duration, SystemTime};

use tracing::debug;

use crate::ShortId;

/// Maximum number of links an anonymous client may create.
pub const ANON_QUOTA_CAP: usize = 2;

/// Lifetime of the client state, reset on every write.
pub const ANON_QUOTA_MAX_AGE: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// The set of short ids an anonymous client claims to have created, in
/// creation order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AnonQuota {
    ids: Vec<ShortId>,
}

/// Replacement client state produced by [`AnonQuota::record`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QuotaUpdate {
    pub quota: AnonQuota,
    /// Serialized form to hand back to the client.
    pub value: String,
    pub max_age: Duration,
    pub expires_at: SystemTime,
}

impl AnonQuota {
    /// Parse client-presented state. Anything malformed, including a list
    /// longer than the cap, yields the empty set so the request proceeds as a
    /// first-time visitor.
    pub fn from_client_state(raw: Option<&str>) -> Self {
        let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
            return Self::default();
        };
        match Self::parse(raw) {
            Some(quota) => quota,
            None => {
                debug!(len = raw.len(), "discarding malformed anonymous quota state");
                Self::default()
            }
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        let values: Vec<String> = serde_json::from_str(raw).ok()?;
        let mut ids: Vec<ShortId> = Vec::with_capacity(values.len());
        for v in values {
            let id = ShortId::new(v).ok()?;
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        if ids.len() > ANON_QUOTA_CAP {
            return None;
        }
        Some(Self { ids })
    }

    pub fn ids(&self) -> &[ShortId] {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn remaining(&self) -> usize {
        ANON_QUOTA_CAP.saturating_sub(self.ids.len())
    }

    pub fn can_create(&self) -> bool {
        self.ids.len() < ANON_QUOTA_CAP
    }

    /// Return the state with `id` appended and the expiry horizon reset from
    /// `now`, or `None` when the quota is already full. The receiver is left
    /// untouched; callers only propagate the result once the link exists.
    pub fn record(&self, id: ShortId, now: SystemTime) -> Option<QuotaUpdate> {
        if !self.can_create() {
            debug!(held = self.ids.len(), "refusing to record past the anonymous cap");
            return None;
        }
        let mut ids = self.ids.clone();
        if !ids.contains(&id) {
            ids.push(id);
        }
        let quota = AnonQuota { ids };
        Some(QuotaUpdate {
            value: quota.to_client_state(),
            quota,
            max_age: ANON_QUOTA_MAX_AGE,
            expires_at: now + ANON_QUOTA_MAX_AGE,
        })
    }

    /// JSON array of id strings.
    pub fn to_client_state(&self) -> String {
        let strs: Vec<&str> = self.ids.iter().map(ShortId::as_str).collect();
        serde_json::to_string(&strs).unwrap_or_else(|_| "[]".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> ShortId {
        ShortId::new(s).unwrap()
    }

    #[test]
    fn parses_valid_state() {
        let q = AnonQuota::from_client_state(Some(r#"["abc12345","zz_-9XyQ"]"#));
        assert_eq!(q.ids(), &[id("abc12345"), id("zz_-9XyQ")]);
        assert!(!q.can_create());
        assert_eq!(q.remaining(), 0);
    }

    #[test]
    fn missing_or_malformed_state_is_empty() {
        for raw in [
            None,
            Some(""),
            Some("not json"),
            Some("{\"a\":1}"),
            Some("[1,2]"),
            Some("[\"bad/id\"]"),
            Some("[\"a\",\"b\",\"c\"]"),
        ] {
            let q = AnonQuota::from_client_state(raw);
            assert!(q.is_empty(), "expected empty for {raw:?}");
            assert!(q.can_create());
        }
    }

    #[test]
    fn duplicates_collapse() {
        let q = AnonQuota::from_client_state(Some(r#"["abc12345","abc12345"]"#));
        assert_eq!(q.len(), 1);
        assert!(q.can_create());
    }

    #[test]
    fn record_returns_new_state_without_mutating() {
        let now = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000);
        let q = AnonQuota::default();
        let update = q.record(id("abc12345"), now).unwrap();
        assert!(q.is_empty());
        assert_eq!(update.quota.len(), 1);
        assert_eq!(update.value, r#"["abc12345"]"#);
        assert_eq!(update.max_age, ANON_QUOTA_MAX_AGE);
        assert_eq!(update.expires_at, now + ANON_QUOTA_MAX_AGE);

        let reparsed = AnonQuota::from_client_state(Some(&update.value));
        assert_eq!(reparsed, update.quota);
    }

    #[test]
    fn cap_reached_after_two_records() {
        let now = SystemTime::UNIX_EPOCH;
        let first = AnonQuota::default().record(id("aaaaaaaa"), now).unwrap().quota;
        assert!(first.can_create());
        let second = first.record(id("bbbbbbbb"), now).unwrap().quota;
        assert_eq!(second.len(), ANON_QUOTA_CAP);
        assert!(!second.can_create());
    }

    #[test]
    fn recording_on_a_full_quota_is_refused() {
        let full = AnonQuota::from_client_state(Some(r#"["aaaaaaaa","bbbbbbbb"]"#));
        assert_eq!(full.record(id("cccccccc"), SystemTime::UNIX_EPOCH), None);
        assert_eq!(full.len(), ANON_QUOTA_CAP);
    }

    #[test]
    fn recording_a_held_id_keeps_the_set() {
        let q = AnonQuota::from_client_state(Some(r#"["aaaaaaaa"]"#));
        let update = q.record(id("aaaaaaaa"), SystemTime::UNIX_EPOCH).unwrap();
        assert_eq!(update.quota, q);
    }
}
