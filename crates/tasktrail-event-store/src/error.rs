//! Mapping of driver errors onto domain errors.

use tasktrail_core::error::DomainError;
use tracing::error;

/// Wraps a `sqlx` error as `Infrastructure`, logging it with the operation.
pub fn database_error(operation: &'static str, err: &sqlx::Error) -> DomainError {
    error!(operation, error = %err, "database operation failed");
    DomainError::Infrastructure(format!("{operation}: {err}"))
}

/// Wraps a Redis error as `Infrastructure`.
pub fn cache_error(operation: &'static str, err: &redis::RedisError) -> DomainError {
    DomainError::Infrastructure(format!("{operation}: {err}"))
}

/// Returns `true` for a unique-constraint violation.
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

/// Converts a domain version to its `BIGINT` column value.
///
/// # Errors
///
/// Returns `DomainError::Validation` if the version does not fit.
pub fn to_db_version(version: u64) -> Result<i64, DomainError> {
    i64::try_from(version)
        .map_err(|_| DomainError::Validation(format!("version {version} is out of range")))
}

/// Converts a stored `BIGINT` version back to a domain version.
///
/// # Errors
///
/// Returns `DomainError::Infrastructure` if the stored value is negative.
pub fn from_db_version(version: i64) -> Result<u64, DomainError> {
    u64::try_from(version)
        .map_err(|_| DomainError::Infrastructure(format!("stored version {version} is negative")))
}

/// `LIMIT` and `OFFSET` for a zero-based page.
///
/// # Errors
///
/// Returns `DomainError::Validation` if the offset overflows.
pub fn page_bounds(count_per_page: u32, page_number: u32) -> Result<(i64, i64), DomainError> {
    let offset = u64::from(count_per_page) * u64::from(page_number);
    let offset = i64::try_from(offset)
        .map_err(|_| DomainError::Validation(format!("page {page_number} is out of range")))?;
    Ok((i64::from(count_per_page), offset))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_versions_convert_within_bigint_range() {
        assert_eq!(to_db_version(7).unwrap(), 7);
        assert!(matches!(
            to_db_version(u64::MAX),
            Err(DomainError::Validation(_))
        ));
        assert!(matches!(
            from_db_version(-1),
            Err(DomainError::Infrastructure(_))
        ));
    }

    #[test]
    fn test_page_bounds_multiply_page_by_size() {
        assert_eq!(page_bounds(100, 0).unwrap(), (100, 0));
        assert_eq!(page_bounds(25, 3).unwrap(), (25, 75));
    }
}
