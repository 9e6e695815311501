//! Business-rule failures raised while deciding lot, material and SKU commands.

use thiserror::Error;

pub type DomainResult<T> = Result<T, DomainError>;

/// Why an aggregate refused a command.
///
/// These are deterministic: retrying the same command against the same state
/// fails the same way. Store and bus failures live in the infra crate.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Malformed command input: empty names, negative prices, zero quantities.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The command is well-formed but the aggregate's state forbids it,
    /// e.g. correcting a USED lot or selling from a DISCONTINUED SKU.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// The stream has no creation event yet.
    #[error("not found")]
    NotFound,

    /// The aggregate already exists, or the stream moved under us.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A decrement asked for more than the aggregate currently holds.
    #[error("insufficient quantity (requested: {requested}, available: {available})")]
    InsufficientQuantity { requested: i64, available: i64 },
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn not_found() -> Self {
        Self::NotFound
    }

    pub fn insufficient(requested: i64, available: i64) -> Self {
        Self::InsufficientQuantity {
            requested,
            available,
        }
    }

    /// `Validation` unless `value > 0`.
    pub fn require_positive<T>(field: &str, value: T) -> DomainResult<()>
    where
        T: PartialOrd + Default,
    {
        if value > T::default() {
            Ok(())
        } else {
            Err(Self::Validation(format!("{field} must be positive")))
        }
    }

    /// `Validation` if `value < 0`.
    pub fn require_non_negative<T>(field: &str, value: T) -> DomainResult<()>
    where
        T: PartialOrd + Default,
    {
        if value < T::default() {
            Err(Self::Validation(format!("{field} cannot be negative")))
        } else {
            Ok(())
        }
    }

    /// True for failures a caller can fix by reloading and trying again.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantity_guards() {
        assert!(DomainError::require_positive("quantity", 1i64).is_ok());
        assert_eq!(
            DomainError::require_positive("quantity", 0i64),
            Err(DomainError::validation("quantity must be positive"))
        );
        assert!(DomainError::require_non_negative("piece_count", 0i64).is_ok());
        assert_eq!(
            DomainError::require_non_negative("piece_count", -2i64),
            Err(DomainError::validation("piece_count cannot be negative"))
        );
    }

    #[test]
    fn only_conflicts_are_conflicts() {
        assert!(DomainError::conflict("stale").is_conflict());
        assert!(!DomainError::insufficient(3, 1).is_conflict());
    }
}
