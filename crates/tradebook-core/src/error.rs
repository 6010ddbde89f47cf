//! # Error Types
//!
//! Domain-specific error types for tradebook-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  tradebook-core errors (this file)                                     │
//! │  ├── CoreError        - Ledger rule violations                         │
//! │  └── ValidationError  - Input validation failures                      │
//! │                                                                         │
//! │  tradebook-db errors (separate crate)                                  │
//! │  └── DbError          - Storage, conflicts, retry exhaustion           │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → DbError → caller                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every variant is raised before anything is written, so a failed
//! operation always leaves records exactly as they were.

use thiserror::Error;

use crate::money::Money;

// =============================================================================
// Core Error
// =============================================================================

/// Ledger rule violations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// A stock deduction would drive a quantity below zero.
    ///
    /// ## User Workflow
    /// ```text
    /// Complete sale (qty: 5)
    ///      │
    ///      ▼
    /// StockLedger::adjust(-5): available=3
    ///      │
    ///      ▼
    /// InsufficientStock { product: "Cola 330ml", available: 3, requested: 5 }
    ///      │
    ///      ▼
    /// UI shows: "Only 3 Cola 330ml in stock"
    /// ```
    #[error("Insufficient stock for {product}: available {available}, requested {requested}")]
    InsufficientStock {
        product: String,
        available: i64,
        requested: i64,
    },

    /// A credit-balance payment exceeds the party's available credit.
    #[error("Insufficient credit balance: available {available}, requested {requested}")]
    InsufficientCredit { available: Money, requested: Money },

    /// Reversing a surplus deposit would drive the credit balance negative
    /// because the deposit has already been spent.
    #[error("Credit already in use: balance {available}, reversal needs {requested}")]
    CreditInUse { available: Money, requested: Money },

    /// A new obligation would push a credit-limited customer past the
    /// ceiling and the caller has not confirmed the override.
    #[error("Credit limit exceeded: projected balance {projected}, limit {limit}")]
    CreditLimitExceeded { projected: Money, limit: Money },

    /// A referenced record is missing.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl CoreError {
    /// Creates a NotFound error for a given entity type and ID.
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        CoreError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    /// Shorthand for a validation failure with a free-form reason.
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        CoreError::Validation(ValidationError::InvalidFormat {
            field: field.into(),
            reason: reason.into(),
        })
    }
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Invalid format or a value the current state does not allow.
    #[error("{field} is invalid: {reason}")]
    InvalidFormat { field: String, reason: String },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = CoreError::InsufficientStock {
            product: "Cola 330ml".to_string(),
            available: 3,
            requested: 5,
        };
        assert_eq!(
            err.to_string(),
            "Insufficient stock for Cola 330ml: available 3, requested 5"
        );

        let err = CoreError::InsufficientCredit {
            available: Money::from_cents(10_000),
            requested: Money::from_cents(25_000),
        };
        assert_eq!(
            err.to_string(),
            "Insufficient credit balance: available $100.00, requested $250.00"
        );
    }

    #[test]
    fn test_validation_error_messages() {
        let err = ValidationError::Required {
            field: "reason".to_string(),
        };
        assert_eq!(err.to_string(), "reason is required");
    }

    #[test]
    fn test_validation_converts_to_core_error() {
        let validation_err = ValidationError::MustBePositive {
            field: "amount".to_string(),
        };
        let core_err: CoreError = validation_err.into();
        assert!(matches!(core_err, CoreError::Validation(_)));
    }
}
