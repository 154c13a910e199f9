//! Access-control contracts.
//!
//! An ACL entry grants a principal a permission bitmask on one aggregate.
//! Batch checks AND-combine every looked-up entry, so a single missing or
//! insufficient entry denies the whole batch.

use std::fmt;
use std::ops::{BitAnd, BitAndAssign, BitOr};
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::event::Stream;
use crate::unit_of_work::UnitOfWork;

/// Permission bitmask stored in the `acl.permissions` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Permissions(i32);

impl Permissions {
    /// No access.
    pub const NONE: Self = Self(0);
    /// Read access.
    pub const READ: Self = Self(0b01);
    /// Write access.
    pub const WRITE: Self = Self(0b10);
    /// Every bit; the identity of the AND fold.
    pub const ALL: Self = Self(!0);

    /// Wraps a raw column value.
    #[must_use]
    pub const fn from_bits(bits: i32) -> Self {
        Self(bits)
    }

    /// The raw column value.
    #[must_use]
    pub const fn bits(self) -> i32 {
        self.0
    }

    /// Returns `true` if every bit of `other` is set.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns `true` if no bit is set.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitAnd for Permissions {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl BitAndAssign for Permissions {
    fn bitand_assign(&mut self, rhs: Self) {
        self.0 &= rhs.0;
    }
}

impl BitOr for Permissions {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// The kind of caller a principal represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserType {
    /// An end user.
    User,
    /// Another service acting on its own behalf.
    Application,
}

impl UserType {
    /// The value stored in the `acl.user_type` column.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Application => "application",
        }
    }
}

impl fmt::Display for UserType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UserType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "application" => Ok(Self::Application),
            other => Err(DomainError::Validation(format!("unknown user type: {other}"))),
        }
    }
}

/// The caller on whose behalf an operation runs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Principal {
    /// Caller kind.
    pub user_type: UserType,
    /// Caller identifier, unique within its kind.
    pub user_id: String,
}

impl Principal {
    /// Creates a principal.
    #[must_use]
    pub fn new(user_type: UserType, user_id: impl Into<String>) -> Self {
        Self {
            user_type,
            user_id: user_id.into(),
        }
    }

    /// Key of this principal's sorted set in the permission cache.
    #[must_use]
    pub fn cache_key(&self, namespace: &str) -> String {
        format!("{namespace}:acl:{}:{}", self.user_type, self.user_id)
    }

    /// The error returned when this principal lacks a permission on `stream`.
    #[must_use]
    pub fn denied(&self, stream: Stream) -> DomainError {
        DomainError::AccessDenied {
            stream: stream.to_string(),
            user_type: self.user_type.to_string(),
            user_id: self.user_id.clone(),
        }
    }
}

/// One row of the `acl` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclEntry {
    /// Aggregate type.
    pub stream: Stream,
    /// Aggregate instance.
    pub stream_id: String,
    /// Grantee.
    pub principal: Principal,
    /// Granted bits.
    pub permissions: Permissions,
}

impl AclEntry {
    /// The sorted-set member this entry is cached as.
    #[must_use]
    pub fn cache_member(&self) -> String {
        format!("{}:{}:{}", self.stream, self.stream_id, self.permissions.bits())
    }
}

/// A decoded permission-cache member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedPermission {
    /// Aggregate type.
    pub stream: Stream,
    /// Aggregate instance.
    pub stream_id: String,
    /// Cached bits.
    pub permissions: Permissions,
}

impl FromStr for CachedPermission {
    type Err = DomainError;

    /// Parses `stream:stream_id:permissions`. The stream id may itself
    /// contain `:`.
    fn from_str(member: &str) -> Result<Self, Self::Err> {
        let malformed = || DomainError::Validation(format!("malformed acl cache member: {member}"));

        let (stream, rest) = member.split_once(':').ok_or_else(malformed)?;
        let (stream_id, bits) = rest.rsplit_once(':').ok_or_else(malformed)?;
        if stream_id.is_empty() {
            return Err(malformed());
        }
        let bits = bits.parse::<i32>().map_err(|_| malformed())?;

        Ok(Self {
            stream: stream.parse()?,
            stream_id: stream_id.to_owned(),
            permissions: Permissions::from_bits(bits),
        })
    }
}

/// Access-control repository used by the service layer.
#[async_trait]
pub trait AclRepository: Send + Sync {
    /// Grants `permissions` to `principal` on one aggregate.
    async fn create_acl_entry(
        &self,
        uow: &UnitOfWork,
        stream: Stream,
        stream_id: &str,
        principal: &Principal,
        permissions: Permissions,
    ) -> Result<AclEntry, DomainError>;

    /// Revokes one principal's entry. `NotFound` if there is none.
    async fn delete_acl_entry(
        &self,
        uow: &UnitOfWork,
        stream: Stream,
        stream_id: &str,
        principal: &Principal,
    ) -> Result<AclEntry, DomainError>;

    /// Revokes every principal's entry on one aggregate.
    async fn delete_acl_entries(
        &self,
        uow: &UnitOfWork,
        stream: Stream,
        stream_id: &str,
    ) -> Result<Vec<AclEntry>, DomainError>;

    /// The AND of the principal's permissions across `stream_ids`. Ids with
    /// no entry contribute `NONE`.
    async fn permissions_for(
        &self,
        uow: &UnitOfWork,
        stream: Stream,
        stream_ids: &[String],
        principal: &Principal,
    ) -> Result<Permissions, DomainError>;

    /// `AccessDenied` unless the principal can read every aggregate.
    async fn can_read(
        &self,
        uow: &UnitOfWork,
        stream: Stream,
        stream_ids: &[String],
        principal: &Principal,
    ) -> Result<(), DomainError> {
        require(self, uow, stream, stream_ids, principal, Permissions::READ).await
    }

    /// `AccessDenied` unless the principal can write every aggregate.
    async fn can_write(
        &self,
        uow: &UnitOfWork,
        stream: Stream,
        stream_ids: &[String],
        principal: &Principal,
    ) -> Result<(), DomainError> {
        require(self, uow, stream, stream_ids, principal, Permissions::WRITE).await
    }
}

async fn require<R: AclRepository + ?Sized>(
    repo: &R,
    uow: &UnitOfWork,
    stream: Stream,
    stream_ids: &[String],
    principal: &Principal,
    required: Permissions,
) -> Result<(), DomainError> {
    if stream_ids.is_empty() {
        return Err(DomainError::Validation(
            "permission check requires at least one stream id".to_owned(),
        ));
    }
    let granted = repo
        .permissions_for(uow, stream, stream_ids, principal)
        .await?;
    if granted.contains(required) {
        Ok(())
    } else {
        Err(principal.denied(stream))
    }
}

/// Remote sorted-set cache holding each principal's hottest ACL entries.
#[async_trait]
pub trait PermissionCache: Send + Sync {
    /// Up to `limit` members of `key`, highest score first.
    async fn range(&self, key: &str, limit: usize) -> Result<Vec<String>, DomainError>;

    /// In one round trip: increments each hit by one, trims the set to its
    /// highest members so that up to `capacity` additions fit, adds those
    /// additions at score 0 and sets its expiry. The set never holds more
    /// than `capacity` members.
    async fn touch(
        &self,
        key: &str,
        hits: &[String],
        additions: &[String],
        expire_at: DateTime<Utc>,
        capacity: usize,
    ) -> Result<(), DomainError>;

    /// Removes `(key, member)` pairs in one round trip.
    async fn remove(&self, entries: &[(String, String)]) -> Result<(), DomainError>;
}

/// Durable ACL rows. Writes join the unit of work's transaction; reads do not.
#[async_trait]
pub trait AclStore: Send + Sync {
    /// Inserts an entry.
    async fn insert(&self, uow: &UnitOfWork, entry: &AclEntry) -> Result<AclEntry, DomainError>;

    /// Deletes one entry, returning it if it existed.
    async fn delete(
        &self,
        uow: &UnitOfWork,
        stream: Stream,
        stream_id: &str,
        principal: &Principal,
    ) -> Result<Option<AclEntry>, DomainError>;

    /// Deletes every entry on one aggregate.
    async fn delete_all(
        &self,
        uow: &UnitOfWork,
        stream: Stream,
        stream_id: &str,
    ) -> Result<Vec<AclEntry>, DomainError>;

    /// Looks up one entry.
    async fn fetch_one(
        &self,
        stream: Stream,
        stream_id: &str,
        principal: &Principal,
    ) -> Result<Option<AclEntry>, DomainError>;

    /// Looks up the entries for several aggregates in one query.
    async fn fetch_many(
        &self,
        stream: Stream,
        stream_ids: &[String],
        principal: &Principal,
    ) -> Result<Vec<AclEntry>, DomainError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_write_compose_and_intersect() {
        let both = Permissions::READ | Permissions::WRITE;

        assert!(both.contains(Permissions::READ));
        assert!(both.contains(Permissions::WRITE));
        assert_eq!(both & Permissions::READ, Permissions::READ);
        assert!((Permissions::READ & Permissions::WRITE).is_empty());
        assert_eq!(Permissions::ALL & both, both);
    }

    #[test]
    fn test_cache_member_round_trip_keeps_colons_in_stream_id() {
        let entry = AclEntry {
            stream: Stream::Tasks,
            stream_id: "a:b".to_owned(),
            principal: Principal::new(UserType::User, "u1"),
            permissions: Permissions::READ,
        };

        let parsed: CachedPermission = entry.cache_member().parse().unwrap();

        assert_eq!(parsed.stream, Stream::Tasks);
        assert_eq!(parsed.stream_id, "a:b");
        assert_eq!(parsed.permissions, Permissions::READ);
    }

    #[test]
    fn test_malformed_cache_members_are_rejected() {
        for member in ["", "tasks", "tasks:1", "tasks::1", "tasks:1:x", "todos:1:1"] {
            assert!(
                member.parse::<CachedPermission>().is_err(),
                "{member:?} parsed"
            );
        }
    }

    #[test]
    fn test_cache_key_is_namespaced_per_principal() {
        let principal = Principal::new(UserType::Application, "svc");
        assert_eq!(principal.cache_key("tasktrail"), "tasktrail:acl:application:svc");
    }
}
