//! Test id generator: deterministic `IdGenerator` implementation for tests.

use std::sync::atomic::{AtomicU64, Ordering};

use tasktrail_core::error::DomainError;
use tasktrail_core::id::IdGenerator;

/// Generates `{prefix}-1`, `{prefix}-2`, ... in call order.
#[derive(Debug)]
pub struct SequenceIdGenerator {
    prefix: String,
    next: AtomicU64,
}

impl SequenceIdGenerator {
    /// Create a generator whose first id is `{prefix}-1`.
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            next: AtomicU64::new(1),
        }
    }
}

impl IdGenerator for SequenceIdGenerator {
    fn next_id(&self) -> Result<String, DomainError> {
        let n = self.next.fetch_add(1, Ordering::SeqCst);
        Ok(format!("{}-{n}", self.prefix))
    }
}
