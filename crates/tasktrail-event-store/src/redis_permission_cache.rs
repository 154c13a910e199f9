//! Redis implementation of the permission cache.
//!
//! Each principal owns one sorted set. Members are `stream:stream_id:bits`
//! and the score counts lookups, so the hottest entries rank first.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use tasktrail_core::acl::PermissionCache;
use tasktrail_core::error::DomainError;
use tracing::{debug, info};

use crate::error::cache_error;

/// Redis-backed permission cache.
#[derive(Clone)]
pub struct RedisPermissionCache {
    conn: ConnectionManager,
}

impl std::fmt::Debug for RedisPermissionCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisPermissionCache").finish_non_exhaustive()
    }
}

impl RedisPermissionCache {
    /// Connects to the Redis server at `url`.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` if the URL is invalid or the
    /// server cannot be reached.
    pub async fn connect(url: &str) -> Result<Self, DomainError> {
        let client = Client::open(url).map_err(|e| cache_error("open client", &e))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| cache_error("connect", &e))?;

        info!("connected to redis permission cache");

        Ok(Self { conn })
    }
}

fn last_rank(count: usize) -> isize {
    isize::try_from(count).unwrap_or(isize::MAX)
}

#[async_trait]
impl PermissionCache for RedisPermissionCache {
    async fn range(&self, key: &str, limit: usize) -> Result<Vec<String>, DomainError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        conn.zrevrange(key, 0, last_rank(limit) - 1)
            .await
            .map_err(|e| cache_error("zrevrange", &e))
    }

    async fn touch(
        &self,
        key: &str,
        hits: &[String],
        additions: &[String],
        expire_at: DateTime<Utc>,
        capacity: usize,
    ) -> Result<(), DomainError> {
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        pipe.atomic();

        for member in hits {
            pipe.zincr(key, member, 1).ignore();
        }
        // Make room before admitting, so new members are not trimmed at once.
        let admitted = &additions[..additions.len().min(capacity)];
        let keep = capacity - admitted.len();
        pipe.zremrangebyrank(key, 0, -last_rank(keep).saturating_add(1))
            .ignore();
        // NX leaves an already-cached member's count alone.
        for member in admitted {
            pipe.cmd("ZADD").arg(key).arg("NX").arg(0).arg(member).ignore();
        }
        pipe.cmd("EXPIREAT").arg(key).arg(expire_at.timestamp()).ignore();

        let (): () = pipe
            .query_async(&mut conn)
            .await
            .map_err(|e| cache_error("touch", &e))?;

        debug!(key, hits = hits.len(), additions = additions.len(), "acl cache touched");
        Ok(())
    }

    async fn remove(&self, entries: &[(String, String)]) -> Result<(), DomainError> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        for (key, member) in entries {
            pipe.zrem(key, member).ignore();
        }

        let (): () = pipe
            .query_async(&mut conn)
            .await
            .map_err(|e| cache_error("zrem", &e))?;
        Ok(())
    }
}
