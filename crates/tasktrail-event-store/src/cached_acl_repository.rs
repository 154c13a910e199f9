//! ACL repository combining the durable ACL table with the permission cache.
//!
//! Lookups consult the principal's cached set first and batch-query the
//! store for whatever is missing. The cache is advisory: when it fails the
//! lookup is answered from the store alone.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{TimeDelta, Utc};
use tasktrail_core::acl::{
    AclEntry, AclRepository, AclStore, CachedPermission, PermissionCache, Permissions, Principal,
};
use tasktrail_core::error::DomainError;
use tasktrail_core::event::Stream;
use tasktrail_core::unit_of_work::{UnitOfWork, action};
use tracing::{Instrument, debug, warn};

/// Members kept per principal unless configured otherwise.
pub const DEFAULT_CAPACITY: usize = 100;

/// Hybrid ACL repository.
#[derive(Debug)]
pub struct CachedAclRepository<C, S> {
    cache: Arc<C>,
    store: S,
    namespace: String,
    capacity: usize,
    ttl: TimeDelta,
}

impl<C, S> CachedAclRepository<C, S>
where
    C: PermissionCache + 'static,
    S: AclStore,
{
    /// Creates a repository whose cache keys live under `namespace`.
    #[must_use]
    pub fn new(cache: Arc<C>, store: S, namespace: impl Into<String>) -> Self {
        Self {
            cache,
            store,
            namespace: namespace.into(),
            capacity: DEFAULT_CAPACITY,
            ttl: TimeDelta::hours(2),
        }
    }

    /// Overrides how many members each principal's set keeps.
    #[must_use]
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// The durable ACL store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Cached permissions of `principal` on `stream`, by stream id.
    async fn cached(&self, key: &str, stream: Stream) -> HashMap<String, (String, Permissions)> {
        let members = match self.cache.range(key, self.capacity).await {
            Ok(members) => members,
            Err(err) => {
                warn!(key, error = %err, "acl cache range failed, falling back to store");
                return HashMap::new();
            }
        };

        let mut cached = HashMap::with_capacity(members.len());
        for member in members {
            match member.parse::<CachedPermission>() {
                Ok(entry) if entry.stream == stream => {
                    cached.insert(entry.stream_id, (member, entry.permissions));
                }
                Ok(_) => {}
                Err(err) => warn!(key, member, error = %err, "skipping malformed acl cache member"),
            }
        }
        cached
    }

    async fn fetch(
        &self,
        stream: Stream,
        stream_ids: &[String],
        principal: &Principal,
    ) -> Result<Vec<AclEntry>, DomainError> {
        match stream_ids {
            [stream_id] => Ok(self
                .store
                .fetch_one(stream, stream_id, principal)
                .await?
                .into_iter()
                .collect()),
            _ => self.store.fetch_many(stream, stream_ids, principal).await,
        }
    }

    async fn lookup(
        &self,
        stream: Stream,
        stream_ids: &[String],
        principal: &Principal,
    ) -> Result<Permissions, DomainError> {
        let key = principal.cache_key(&self.namespace);
        let cached = self.cached(&key, stream).await;

        let mut granted = Permissions::ALL;
        let mut hits = Vec::new();
        let mut missing = Vec::new();
        for stream_id in stream_ids {
            match cached.get(stream_id) {
                Some((member, permissions)) => {
                    hits.push(member.clone());
                    granted &= *permissions;
                    if granted.is_empty() {
                        break;
                    }
                }
                None => missing.push(stream_id.clone()),
            }
        }

        let mut additions = Vec::new();
        if !granted.is_empty() && !missing.is_empty() {
            let fetched: HashMap<String, AclEntry> = self
                .fetch(stream, &missing, principal)
                .await?
                .into_iter()
                .map(|entry| (entry.stream_id.clone(), entry))
                .collect();

            for stream_id in &missing {
                match fetched.get(stream_id) {
                    Some(entry) => {
                        granted &= entry.permissions;
                        additions.push(entry.cache_member());
                    }
                    None => granted = Permissions::NONE,
                }
            }
        }

        let expire_at = Utc::now() + self.ttl;
        if let Err(err) = self
            .cache
            .touch(&key, &hits, &additions, expire_at, self.capacity)
            .await
        {
            warn!(key, error = %err, "acl cache touch failed");
        }

        debug!(
            %stream,
            ids = stream_ids.len(),
            hits = hits.len(),
            fetched = additions.len(),
            granted = granted.bits(),
            "acl lookup"
        );
        Ok(granted)
    }

    /// Evicts `removed` from the cache once the unit of work commits.
    fn evict_on_commit(&self, uow: &UnitOfWork, removed: &[AclEntry]) {
        if removed.is_empty() {
            return;
        }
        let members: Vec<(String, String)> = removed
            .iter()
            .map(|entry| (entry.principal.cache_key(&self.namespace), entry.cache_member()))
            .collect();
        let cache = Arc::clone(&self.cache);

        uow.register_commit_action([action(move || {
            let cache = Arc::clone(&cache);
            let members = members.clone();
            async move {
                if let Err(err) = cache.remove(&members).await {
                    warn!(evicted = members.len(), error = %err, "acl cache eviction failed");
                }
                Ok(())
            }
        })]);
    }
}

#[async_trait]
impl<C, S> AclRepository for CachedAclRepository<C, S>
where
    C: PermissionCache + 'static,
    S: AclStore,
{
    async fn create_acl_entry(
        &self,
        uow: &UnitOfWork,
        stream: Stream,
        stream_id: &str,
        principal: &Principal,
        permissions: Permissions,
    ) -> Result<AclEntry, DomainError> {
        let entry = AclEntry {
            stream,
            stream_id: stream_id.to_owned(),
            principal: principal.clone(),
            permissions,
        };
        self.store.insert(uow, &entry).instrument(uow.span()).await
    }

    async fn delete_acl_entry(
        &self,
        uow: &UnitOfWork,
        stream: Stream,
        stream_id: &str,
        principal: &Principal,
    ) -> Result<AclEntry, DomainError> {
        let removed = self
            .store
            .delete(uow, stream, stream_id, principal)
            .instrument(uow.span())
            .await?
            .ok_or_else(|| DomainError::NotFound {
                stream: "acl".to_owned(),
                id: format!("{stream}:{stream_id}"),
            })?;
        self.evict_on_commit(uow, std::slice::from_ref(&removed));
        Ok(removed)
    }

    async fn delete_acl_entries(
        &self,
        uow: &UnitOfWork,
        stream: Stream,
        stream_id: &str,
    ) -> Result<Vec<AclEntry>, DomainError> {
        let removed = self
            .store
            .delete_all(uow, stream, stream_id)
            .instrument(uow.span())
            .await?;
        self.evict_on_commit(uow, &removed);
        Ok(removed)
    }

    async fn permissions_for(
        &self,
        uow: &UnitOfWork,
        stream: Stream,
        stream_ids: &[String],
        principal: &Principal,
    ) -> Result<Permissions, DomainError> {
        if stream_ids.is_empty() {
            return Err(DomainError::Validation(
                "permission lookup requires at least one stream id".to_owned(),
            ));
        }
        self.lookup(stream, stream_ids, principal)
            .instrument(uow.span())
            .await
    }
}
