//! Tasktrail event store: `PostgreSQL` and Redis infrastructure.
//!
//! Implements the task and quote repositories over an append-only `events`
//! table plus per-aggregate read models, the durable ACL table, the Redis
//! permission cache, and the hybrid ACL repository that combines the two.
//! Every write joins the unit of work's relational transaction.

mod events;

pub mod cached_acl_repository;
pub mod error;
pub mod pg_acl_store;
pub mod pg_quote_repository;
pub mod pg_task_repository;
pub mod pg_transaction;
pub mod redis_permission_cache;
