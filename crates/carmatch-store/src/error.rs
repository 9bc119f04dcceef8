//! Error types for CarMatch storage.

use carmatch_core::LedgerError;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur in storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database operation failed.
    #[error("database error: {0}")]
    Database(String),

    /// A stored row could not be mapped to a domain type.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Record not found.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Kind of record.
        entity: &'static str,
        /// Identifier that was looked up.
        id: String,
    },

    /// Record already exists.
    #[error("{entity} already exists: {id}")]
    AlreadyExists {
        /// Kind of record.
        entity: &'static str,
        /// Conflicting identifier.
        id: String,
    },

    /// Insufficient credits for a debit.
    #[error("insufficient credits: balance={balance}, required={required}")]
    InsufficientCredits {
        /// Current balance in credits.
        balance: i64,
        /// Required amount in credits.
        required: i64,
    },

    /// Input rejected before touching the database.
    #[error("invalid input: {0}")]
    Invalid(String),
}

impl StoreError {
    pub(crate) fn account_not_found(id: impl ToString) -> Self {
        Self::NotFound {
            entity: "account",
            id: id.to_string(),
        }
    }

    pub(crate) fn listing_not_found(id: impl ToString) -> Self {
        Self::NotFound {
            entity: "listing",
            id: id.to_string(),
        }
    }
}

impl From<LedgerError> for StoreError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::InvalidAmount(msg) | LedgerError::InvalidPolicy(msg) => Self::Invalid(msg),
            LedgerError::ExpirationOutOfRange => Self::Invalid(err.to_string()),
            LedgerError::InvalidId(_)
            | LedgerError::UnknownListingKind(_)
            | LedgerError::UnknownEntryKind(_)
            | LedgerError::UnknownPaymentSource(_) => Self::Serialization(err.to_string()),
        }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        Self::Database(err.to_string())
    }
}
