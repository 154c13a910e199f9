//! Tasktrail task bounded context.
//!
//! Tasks move from `pending` to `progress` to `completed`. Every change is an
//! event appended under optimistic concurrency, and access is gated by the
//! per-task ACL granted to the creator.

pub mod application;
pub mod domain;
