//! tasktrail HTTP API.
//!
//! Every request gets its own unit of work, built from the inbound
//! `traceparent` header. Handlers settle it: commit on success, roll back on
//! error.

pub mod config;
pub mod context;
pub mod error;
pub mod routes;
pub mod state;
