//! Error types for the CarMatch ledger.

use crate::ids::IdError;

/// Result type for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;

/// Errors that can occur when applying ledger rules.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// Invalid identifier.
    #[error("invalid identifier: {0}")]
    InvalidId(#[from] IdError),

    /// Unknown listing kind.
    #[error("unknown listing kind: {0}")]
    UnknownListingKind(String),

    /// Unknown ledger entry kind.
    #[error("unknown ledger entry kind: {0}")]
    UnknownEntryKind(String),

    /// Unknown payment source.
    #[error("unknown payment source: {0}")]
    UnknownPaymentSource(String),

    /// Invalid amount.
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    /// Publication policy parameters out of range.
    #[error("invalid publication policy: {0}")]
    InvalidPolicy(String),

    /// A computed expiration date is out of the representable range.
    #[error("expiration out of range")]
    ExpirationOutOfRange,
}
