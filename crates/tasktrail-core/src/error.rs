//! Domain error types.

use thiserror::Error;

/// Top-level domain error type.
///
/// `NotFound`, `ConcurrencyConflict`, `AccessDenied` and `Validation` are
/// expected business outcomes and are mapped to specific responses by the
/// request adapter. `Infrastructure` wraps store failures. `Interrupted`
/// means the unit of work was cancelled or hit its deadline mid-request.
/// `ContextMisuse` signals a programming error in the caller.
#[derive(Debug, Error)]
pub enum DomainError {
    /// An aggregate or ACL row was not found.
    #[error("{stream} not found: {id}")]
    NotFound {
        /// The stream the lookup was made against.
        stream: String,
        /// The identifier that was looked up.
        id: String,
    },

    /// Optimistic concurrency conflict: the version guard matched nothing.
    #[error("concurrency conflict on {stream}/{stream_id} at version {version}")]
    ConcurrencyConflict {
        /// The aggregate stream.
        stream: String,
        /// The aggregate that had the conflict.
        stream_id: String,
        /// The version the caller tried to write.
        version: u64,
    },

    /// The principal lacks the required permission bit.
    #[error("access denied on {stream} for {user_type}:{user_id}")]
    AccessDenied {
        /// The stream the check was made against.
        stream: String,
        /// The principal's type.
        user_type: String,
        /// The principal's identifier.
        user_id: String,
    },

    /// A validation error in domain logic or request input.
    #[error("validation error: {0}")]
    Validation(String),

    /// An infrastructure/persistence error.
    #[error("infrastructure error: {0}")]
    Infrastructure(String),

    /// The unit of work was done before the request finished.
    #[error("request interrupted: {0}")]
    Interrupted(String),

    /// The unit of work was used incorrectly (settled twice, wrong handle type).
    #[error("unit of work misuse: {0}")]
    ContextMisuse(String),
}

impl DomainError {
    /// Returns `true` for the business outcomes callers are expected to handle.
    #[must_use]
    pub fn is_business(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. }
                | Self::ConcurrencyConflict { .. }
                | Self::AccessDenied { .. }
                | Self::Validation(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_business_kinds_are_distinguished_from_failures() {
        assert!(
            DomainError::NotFound {
                stream: "tasks".into(),
                id: "1".into()
            }
            .is_business()
        );
        assert!(
            DomainError::ConcurrencyConflict {
                stream: "tasks".into(),
                stream_id: "1".into(),
                version: 2,
            }
            .is_business()
        );
        assert!(DomainError::Validation("bad".into()).is_business());
        assert!(!DomainError::Infrastructure("db down".into()).is_business());
        assert!(!DomainError::Interrupted("context deadline exceeded".into()).is_business());
        assert!(!DomainError::ContextMisuse("settled".into()).is_business());
    }

    #[test]
    fn test_conflict_message_names_aggregate_and_version() {
        let err = DomainError::ConcurrencyConflict {
            stream: "tasks".into(),
            stream_id: "42".into(),
            version: 3,
        };
        assert_eq!(
            err.to_string(),
            "concurrency conflict on tasks/42 at version 3"
        );
    }
}
