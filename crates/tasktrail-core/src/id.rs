//! Unique identifier generation for new aggregates.
//!
//! Aggregate ids are independent of event versioning. In production ids are
//! time-ordered UUIDs; tests inject a deterministic sequence.

use uuid::Uuid;

use crate::error::DomainError;

/// Abstraction over aggregate id generation.
pub trait IdGenerator: Send + Sync {
    /// Generate a new, globally unique identifier.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` if the generator cannot produce an id.
    fn next_id(&self) -> Result<String, DomainError>;
}

/// Generates UUIDv7 identifiers, which sort by creation time.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidIdGenerator;

impl IdGenerator for UuidIdGenerator {
    fn next_id(&self) -> Result<String, DomainError> {
        Ok(Uuid::now_v7().to_string())
    }
}
