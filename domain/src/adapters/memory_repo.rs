use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::{
    Account, AccountRepository, CoreError, LinkFilter, LinkRecord, LinkStore, ShortId, UserEmail,
    VisitEvent,
};

/// In-memory link store. Every operation runs under one mutex, which gives the
/// same per-record atomicity a document store provides.
pub struct InMemoryLinkStore {
    inner: Mutex<BTreeMap<String, LinkRecord>>,
}

/// In-memory account repository keyed by email.
pub struct InMemoryAccountRepo {
    accounts: Mutex<BTreeMap<String, Account>>,
}

fn poisoned<T>(_: T) -> CoreError {
    CoreError::StoreUnavailable("mutex poisoned".into())
}

impl InMemoryLinkStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(BTreeMap::new()),
        }
    }
}

impl Default for InMemoryLinkStore {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkStore for InMemoryLinkStore {
    fn insert_unique(&self, record: LinkRecord) -> Result<(), CoreError> {
        let mut map = self.inner.lock().map_err(poisoned)?;
        let key = record.short_id.as_str().to_string();
        if map.contains_key(&key) {
            return Err(CoreError::AlreadyExists);
        }
        map.insert(key, record);
        Ok(())
    }

    fn find_one(&self, filter: &LinkFilter) -> Result<Option<LinkRecord>, CoreError> {
        let map = self.inner.lock().map_err(poisoned)?;
        Ok(map.values().find(|r| filter.matches(r)).cloned())
    }

    fn find_many(&self, filter: &LinkFilter) -> Result<Vec<LinkRecord>, CoreError> {
        let map = self.inner.lock().map_err(poisoned)?;
        let mut items: Vec<_> = map.values().filter(|r| filter.matches(r)).cloned().collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(items)
    }

    fn append_visit(
        &self,
        id: &ShortId,
        event: VisitEvent,
    ) -> Result<Option<LinkRecord>, CoreError> {
        let mut map = self.inner.lock().map_err(poisoned)?;
        Ok(map.get_mut(id.as_str()).map(|record| {
            let timestamp = match record.visits.last() {
                Some(last) if last.timestamp > event.timestamp => last.timestamp,
                _ => event.timestamp,
            };
            record.visits.push(VisitEvent { timestamp });
            record.clone()
        }))
    }

    fn delete_one(&self, filter: &LinkFilter) -> Result<bool, CoreError> {
        let mut map = self.inner.lock().map_err(poisoned)?;
        let key = map
            .iter()
            .find(|(_, r)| filter.matches(r))
            .map(|(k, _)| k.clone());
        Ok(key.and_then(|k| map.remove(&k)).is_some())
    }
}

impl InMemoryAccountRepo {
    pub fn new() -> Self {
        Self {
            accounts: Mutex::new(BTreeMap::new()),
        }
    }
}

impl Default for InMemoryAccountRepo {
    fn default() -> Self {
        Self::new()
    }
}

impl AccountRepository for InMemoryAccountRepo {
    fn create(&self, account: Account) -> Result<(), CoreError> {
        let mut map = self.accounts.lock().map_err(poisoned)?;
        let key = account.email.as_str().to_ascii_lowercase();
        if map.contains_key(&key) {
            return Err(CoreError::AlreadyExists);
        }
        map.insert(key, account);
        Ok(())
    }

    fn find_by_email(&self, email: &UserEmail) -> Result<Option<Account>, CoreError> {
        let map = self.accounts.lock().map_err(poisoned)?;
        Ok(map.get(&email.as_str().to_ascii_lowercase()).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AccountId;
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    fn record(id: &str, by: Option<&str>, secs: u64) -> LinkRecord {
        LinkRecord::new(
            ShortId::new(id).unwrap(),
            format!("https://e/{id}"),
            by.map(|a| AccountId::new(a).unwrap()),
            UNIX_EPOCH + Duration::from_secs(secs),
        )
    }

    #[test]
    fn insert_is_unique() {
        let store = InMemoryLinkStore::new();
        store.insert_unique(record("dup", None, 0)).unwrap();
        let err = store.insert_unique(record("dup", Some("alice"), 1)).unwrap_err();
        assert!(matches!(err, CoreError::AlreadyExists));
        let got = store.find_one(&LinkFilter::by_id(&ShortId::new("dup").unwrap())).unwrap().unwrap();
        assert!(got.created_by.is_none());
    }

    #[test]
    fn find_many_orders_newest_first() {
        let store = InMemoryLinkStore::new();
        for (i, id) in ["k0", "k1", "k2"].iter().enumerate() {
            store.insert_unique(record(id, Some("alice"), i as u64)).unwrap();
        }
        store.insert_unique(record("other", Some("bob"), 9)).unwrap();
        let alice = AccountId::new("alice").unwrap();
        let items = store.find_many(&LinkFilter::created_by(&alice)).unwrap();
        let ids: Vec<_> = items.iter().map(|r| r.short_id.as_str()).collect();
        assert_eq!(ids, vec!["k2", "k1", "k0"]);
    }

    #[test]
    fn append_visit_missing_is_none() {
        let store = InMemoryLinkStore::new();
        let ev = VisitEvent { timestamp: SystemTime::UNIX_EPOCH };
        assert!(store.append_visit(&ShortId::new("nope").unwrap(), ev).unwrap().is_none());
    }

    #[test]
    fn delete_respects_filter() {
        let store = InMemoryLinkStore::new();
        store.insert_unique(record("mine", Some("alice"), 0)).unwrap();
        let id = ShortId::new("mine").unwrap();
        let bob = AccountId::new("bob").unwrap();
        let alice = AccountId::new("alice").unwrap();
        assert!(!store.delete_one(&LinkFilter::owned_by(&id, &bob)).unwrap());
        assert!(store.delete_one(&LinkFilter::owned_by(&id, &alice)).unwrap());
        assert!(store.find_one(&LinkFilter::by_id(&id)).unwrap().is_none());
    }

    #[test]
    fn accounts_unique_by_email_case_insensitive() {
        let repo = InMemoryAccountRepo::new();
        let account = Account {
            id: AccountId::new("a1").unwrap(),
            name: "Ada".into(),
            email: UserEmail::new("Ada@Example.com").unwrap(),
            password_hash: "hash".into(),
            created_at: UNIX_EPOCH,
        };
        repo.create(account.clone()).unwrap();
        let mut again = account.clone();
        again.email = UserEmail::new("ada@example.com").unwrap();
        assert!(matches!(repo.create(again), Err(CoreError::AlreadyExists)));
        let found = repo.find_by_email(&UserEmail::new("ADA@example.com").unwrap()).unwrap();
        assert_eq!(found, Some(account));
    }
}
