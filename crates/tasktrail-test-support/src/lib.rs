//! Shared test fakes and utilities for tasktrail.

mod acl;
mod context;
mod dispatcher;
mod id;

pub use acl::{InMemoryAclRepository, InMemoryAclStore, InMemoryPermissionCache};
pub use context::{unit_of_work, unit_of_work_with};
pub use dispatcher::{FailingEventDispatcher, RecordingEventDispatcher};
pub use id::SequenceIdGenerator;
