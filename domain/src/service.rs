use tracing::{debug, info, warn};

use crate::quota::{AnonQuota, QuotaUpdate};
use crate::validate::validate_target_url;
use crate::{
    Caller, Clock, CoreError, IdGenerator, LinkFilter, LinkRecord, LinkStore, ShortId, VisitEvent,
};

/// Attempts at generating and inserting a fresh id before giving up.
pub const MAX_CREATE_ATTEMPTS: usize = 8;

/// A freshly created link. `quota_update` is set for anonymous callers and
/// must be handed back to the client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CreatedLink {
    pub record: LinkRecord,
    pub quota_update: Option<QuotaUpdate>,
}

/// Result of a creation request that did not fail outright.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CreateOutcome {
    Created(CreatedLink),
    /// The anonymous quota is used up; the caller has to authenticate.
    QuotaExceeded,
}

/// Visit statistics for one link.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Analytics {
    pub total_clicks: usize,
    pub visits: Vec<VisitEvent>,
}

/// Application service applying identity, ownership and quota rules on top
/// of a [`LinkStore`].
///
/// Holds no mutable state of its own: every operation is pure logic around at
/// most one atomic store call (the creation retry loop issues one insert per
/// attempt), so a shared instance can serve any number of concurrent
/// requests.
pub struct LinkService<S: LinkStore, G: IdGenerator, C: Clock> {
    store: S,
    ids: G,
    clock: C,
}

impl<S: LinkStore, G: IdGenerator, C: Clock> LinkService<S, G, C> {
    pub fn new(store: S, ids: G, clock: C) -> Self {
        Self { store, ids, clock }
    }

    #[cfg(test)]
    pub(crate) fn store(&self) -> &S {
        &self.store
    }

    pub fn now(&self) -> std::time::SystemTime {
        self.clock.now()
    }

    /// Create a short link for `target_url` on behalf of `caller`.
    ///
    /// Anonymous callers are checked against `quota` before anything else;
    /// their quota is never modified in place.
    pub fn create(
        &self,
        target_url: &str,
        caller: &Caller,
        quota: &AnonQuota,
    ) -> Result<CreateOutcome, CoreError> {
        if let Caller::Anonymous = caller {
            if !quota.can_create() {
                info!(held = quota.len(), "anonymous quota exceeded");
                return Ok(CreateOutcome::QuotaExceeded);
            }
        }

        let target_url = validate_target_url(target_url)?;
        let created_by = caller.identity().map(|i| i.id.clone());

        let record = self.insert_with_fresh_id(&target_url, created_by)?;
        let quota_update = match caller {
            Caller::Anonymous => quota.record(record.short_id.clone(), self.clock.now()),
            Caller::Authenticated(_) => None,
        };
        info!(
            short_id = %record.short_id,
            anonymous = record.is_anonymous(),
            "link created"
        );
        Ok(CreateOutcome::Created(CreatedLink {
            record,
            quota_update,
        }))
    }

    fn insert_with_fresh_id(
        &self,
        target_url: &str,
        created_by: Option<crate::AccountId>,
    ) -> Result<LinkRecord, CoreError> {
        for attempt in 1..=MAX_CREATE_ATTEMPTS {
            let record = LinkRecord::new(
                self.ids.generate(),
                target_url.to_string(),
                created_by.clone(),
                self.clock.now(),
            );
            match self.store.insert_unique(record.clone()) {
                Ok(()) => return Ok(record),
                Err(CoreError::AlreadyExists) => {
                    warn!(short_id = %record.short_id, attempt, "short id collision, retrying");
                }
                Err(e) => return Err(e),
            }
        }
        Err(CoreError::CreationFailed {
            attempts: MAX_CREATE_ATTEMPTS,
        })
    }

    /// Record a visit and return the target URL to redirect to.
    pub fn redirect(&self, id: &ShortId) -> Result<String, CoreError> {
        let event = VisitEvent {
            timestamp: self.clock.now(),
        };
        match self.store.append_visit(id, event)? {
            Some(record) => {
                debug!(short_id = %id, visits = record.visits.len(), "visit recorded");
                Ok(record.target_url)
            }
            None => Err(CoreError::NotFound),
        }
    }

    /// Visit count and history. Read-only.
    pub fn analytics(&self, id: &ShortId) -> Result<Analytics, CoreError> {
        let record = self
            .store
            .find_one(&LinkFilter::by_id(id))?
            .ok_or(CoreError::NotFound)?;
        Ok(Analytics {
            total_clicks: record.visits.len(),
            visits: record.visits,
        })
    }

    /// Delete a link owned by `caller`.
    ///
    /// Missing links, links owned by someone else and anonymous callers all
    /// yield the same `CoreError::NotFound`.
    pub fn delete(&self, id: &ShortId, caller: &Caller) -> Result<(), CoreError> {
        let Some(identity) = caller.identity() else {
            return Err(CoreError::NotFound);
        };
        if self.store.delete_one(&LinkFilter::owned_by(id, &identity.id))? {
            info!(short_id = %id, "link deleted");
            Ok(())
        } else {
            Err(CoreError::NotFound)
        }
    }

    /// Links visible to `caller`: everything an account created, or for an
    /// anonymous caller the ids held in `quota` that are still anonymous.
    pub fn list(&self, caller: &Caller, quota: &AnonQuota) -> Result<Vec<LinkRecord>, CoreError> {
        match caller {
            Caller::Authenticated(identity) => {
                self.store.find_many(&LinkFilter::created_by(&identity.id))
            }
            Caller::Anonymous if quota.is_empty() => Ok(Vec::new()),
            Caller::Anonymous => self
                .store
                .find_many(&LinkFilter::anonymous_among(quota.ids())),
        }
    }
}
