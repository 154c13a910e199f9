//! Tasktrail core: unit of work, trace propagation, and shared abstractions.
//!
//! This crate defines the request-scoped unit of work that coordinates
//! commits and compensations across backing stores, the trace identifiers
//! propagated through it, and the contracts the aggregate repositories and
//! the access-control cache are built on. It contains no infrastructure code.

pub mod acl;
pub mod command;
pub mod error;
pub mod event;
pub mod id;
pub mod retry;
pub mod trace;
pub mod unit_of_work;
