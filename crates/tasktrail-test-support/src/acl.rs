//! Test ACL fakes: in-memory permission cache, ACL store and ACL repository.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tasktrail_core::acl::{
    AclEntry, AclRepository, AclStore, PermissionCache, Permissions, Principal,
};
use tasktrail_core::error::DomainError;
use tasktrail_core::event::Stream;
use tasktrail_core::unit_of_work::{UnitOfWork, action};

#[derive(Debug, Default)]
struct SortedSet {
    scores: HashMap<String, f64>,
    expire_at: Option<DateTime<Utc>>,
}

impl SortedSet {
    /// Members, highest score first; ties broken by member.
    fn ranked(&self) -> Vec<(String, f64)> {
        let mut members: Vec<(String, f64)> = self
            .scores
            .iter()
            .map(|(member, score)| (member.clone(), *score))
            .collect();
        members.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        members
    }
}

/// A `PermissionCache` over in-process sorted sets. Counts calls and can be
/// switched into a failing mode to simulate an unreachable cache.
#[derive(Debug, Default)]
pub struct InMemoryPermissionCache {
    sets: Mutex<HashMap<String, SortedSet>>,
    failing: AtomicBool,
    range_calls: AtomicUsize,
    touch_calls: AtomicUsize,
    remove_calls: AtomicUsize,
}

impl InMemoryPermissionCache {
    /// Make every subsequent call fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Members of `key` with their scores, highest first.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn members(&self, key: &str) -> Vec<(String, f64)> {
        self.sets
            .lock()
            .unwrap()
            .get(key)
            .map(SortedSet::ranked)
            .unwrap_or_default()
    }

    /// The expiry last set on `key`.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn expire_at(&self, key: &str) -> Option<DateTime<Utc>> {
        self.sets
            .lock()
            .unwrap()
            .get(key)
            .and_then(|set| set.expire_at)
    }

    /// Number of `range` calls.
    pub fn range_calls(&self) -> usize {
        self.range_calls.load(Ordering::SeqCst)
    }

    /// Number of `touch` calls.
    pub fn touch_calls(&self) -> usize {
        self.touch_calls.load(Ordering::SeqCst)
    }

    /// Number of `remove` calls.
    pub fn remove_calls(&self) -> usize {
        self.remove_calls.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), DomainError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(DomainError::Infrastructure("cache unreachable".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl PermissionCache for InMemoryPermissionCache {
    async fn range(&self, key: &str, limit: usize) -> Result<Vec<String>, DomainError> {
        self.range_calls.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        Ok(self
            .members(key)
            .into_iter()
            .take(limit)
            .map(|(member, _)| member)
            .collect())
    }

    async fn touch(
        &self,
        key: &str,
        hits: &[String],
        additions: &[String],
        expire_at: DateTime<Utc>,
        capacity: usize,
    ) -> Result<(), DomainError> {
        self.touch_calls.fetch_add(1, Ordering::SeqCst);
        self.check()?;

        let mut sets = self.sets.lock().unwrap();
        let set = sets.entry(key.to_owned()).or_default();
        for member in hits {
            *set.scores.entry(member.clone()).or_insert(0.0) += 1.0;
        }
        let admitted = &additions[..additions.len().min(capacity)];
        for (member, _) in set.ranked().into_iter().skip(capacity - admitted.len()) {
            set.scores.remove(&member);
        }
        for member in admitted {
            set.scores.entry(member.clone()).or_insert(0.0);
        }
        set.expire_at = Some(expire_at);
        Ok(())
    }

    async fn remove(&self, entries: &[(String, String)]) -> Result<(), DomainError> {
        self.remove_calls.fetch_add(1, Ordering::SeqCst);
        self.check()?;

        let mut sets = self.sets.lock().unwrap();
        for (key, member) in entries {
            if let Some(set) = sets.get_mut(key) {
                set.scores.remove(member);
            }
        }
        Ok(())
    }
}

fn matches(entry: &AclEntry, stream: Stream, stream_id: &str, principal: &Principal) -> bool {
    entry.stream == stream && entry.stream_id == stream_id && entry.principal == *principal
}

/// An `AclStore` over an in-memory table. Writes apply immediately and
/// register a compensation that undoes them; reads are counted.
#[derive(Debug, Default)]
pub struct InMemoryAclStore {
    rows: Arc<Mutex<Vec<AclEntry>>>,
    queries: AtomicUsize,
}

impl InMemoryAclStore {
    /// A store holding `entries`.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    #[must_use]
    pub fn with_entries(entries: impl IntoIterator<Item = AclEntry>) -> Self {
        let store = Self::default();
        store.rows.lock().unwrap().extend(entries);
        store
    }

    /// Snapshot of every row.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn rows(&self) -> Vec<AclEntry> {
        self.rows.lock().unwrap().clone()
    }

    /// Number of `fetch_one` and `fetch_many` calls.
    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    fn restore_on_rollback(&self, uow: &UnitOfWork, removed: Vec<AclEntry>) {
        let rows = Arc::clone(&self.rows);
        uow.register_compensatory_action([action(move || {
            let rows = Arc::clone(&rows);
            let removed = removed.clone();
            async move {
                let mut rows = rows.lock().unwrap();
                for entry in removed {
                    if !rows.contains(&entry) {
                        rows.push(entry);
                    }
                }
                Ok(())
            }
        })]);
    }
}

#[async_trait]
impl AclStore for InMemoryAclStore {
    async fn insert(&self, uow: &UnitOfWork, entry: &AclEntry) -> Result<AclEntry, DomainError> {
        {
            let mut rows = self.rows.lock().unwrap();
            if rows
                .iter()
                .any(|row| matches(row, entry.stream, &entry.stream_id, &entry.principal))
            {
                return Err(DomainError::Validation(format!(
                    "acl entry already exists for {}:{}",
                    entry.stream, entry.stream_id
                )));
            }
            rows.push(entry.clone());
        }

        let rows = Arc::clone(&self.rows);
        let inserted = entry.clone();
        uow.register_compensatory_action([action(move || {
            let rows = Arc::clone(&rows);
            let inserted = inserted.clone();
            async move {
                rows.lock().unwrap().retain(|row| *row != inserted);
                Ok(())
            }
        })]);
        Ok(entry.clone())
    }

    async fn delete(
        &self,
        uow: &UnitOfWork,
        stream: Stream,
        stream_id: &str,
        principal: &Principal,
    ) -> Result<Option<AclEntry>, DomainError> {
        let removed = {
            let mut rows = self.rows.lock().unwrap();
            rows.iter()
                .position(|row| matches(row, stream, stream_id, principal))
                .map(|index| rows.remove(index))
        };
        if let Some(entry) = &removed {
            self.restore_on_rollback(uow, vec![entry.clone()]);
        }
        Ok(removed)
    }

    async fn delete_all(
        &self,
        uow: &UnitOfWork,
        stream: Stream,
        stream_id: &str,
    ) -> Result<Vec<AclEntry>, DomainError> {
        let removed: Vec<AclEntry> = {
            let mut rows = self.rows.lock().unwrap();
            let (removed, kept) = rows
                .drain(..)
                .partition(|row| row.stream == stream && row.stream_id == stream_id);
            *rows = kept;
            removed
        };
        self.restore_on_rollback(uow, removed.clone());
        Ok(removed)
    }

    async fn fetch_one(
        &self,
        stream: Stream,
        stream_id: &str,
        principal: &Principal,
    ) -> Result<Option<AclEntry>, DomainError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .find(|row| matches(row, stream, stream_id, principal))
            .cloned())
    }

    async fn fetch_many(
        &self,
        stream: Stream,
        stream_ids: &[String],
        principal: &Principal,
    ) -> Result<Vec<AclEntry>, DomainError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|row| {
                row.stream == stream
                    && row.principal == *principal
                    && stream_ids.contains(&row.stream_id)
            })
            .cloned()
            .collect())
    }
}

/// An `AclRepository` over a plain list, with no cache and no transaction.
/// Suitable for service-layer tests.
#[derive(Debug, Default)]
pub struct InMemoryAclRepository {
    entries: Mutex<Vec<AclEntry>>,
}

impl InMemoryAclRepository {
    /// A repository holding `entries`.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    #[must_use]
    pub fn with_entries(entries: impl IntoIterator<Item = AclEntry>) -> Self {
        let repo = Self::default();
        repo.entries.lock().unwrap().extend(entries);
        repo
    }

    /// Snapshot of every entry.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn entries(&self) -> Vec<AclEntry> {
        self.entries.lock().unwrap().clone()
    }
}

#[async_trait]
impl AclRepository for InMemoryAclRepository {
    async fn create_acl_entry(
        &self,
        _uow: &UnitOfWork,
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
        self.entries.lock().unwrap().push(entry.clone());
        Ok(entry)
    }

    async fn delete_acl_entry(
        &self,
        _uow: &UnitOfWork,
        stream: Stream,
        stream_id: &str,
        principal: &Principal,
    ) -> Result<AclEntry, DomainError> {
        let mut entries = self.entries.lock().unwrap();
        let index = entries
            .iter()
            .position(|entry| matches(entry, stream, stream_id, principal))
            .ok_or_else(|| DomainError::NotFound {
                stream: "acl".into(),
                id: format!("{stream}:{stream_id}"),
            })?;
        Ok(entries.remove(index))
    }

    async fn delete_acl_entries(
        &self,
        _uow: &UnitOfWork,
        stream: Stream,
        stream_id: &str,
    ) -> Result<Vec<AclEntry>, DomainError> {
        let mut entries = self.entries.lock().unwrap();
        let (removed, kept) = entries
            .drain(..)
            .partition(|entry| entry.stream == stream && entry.stream_id == stream_id);
        *entries = kept;
        Ok(removed)
    }

    async fn permissions_for(
        &self,
        _uow: &UnitOfWork,
        stream: Stream,
        stream_ids: &[String],
        principal: &Principal,
    ) -> Result<Permissions, DomainError> {
        let entries = self.entries.lock().unwrap();
        Ok(stream_ids.iter().fold(Permissions::ALL, |granted, id| {
            let found = entries
                .iter()
                .find(|entry| matches(entry, stream, id, principal))
                .map_or(Permissions::NONE, |entry| entry.permissions);
            granted & found
        }))
    }
}
