//! Results of compound store operations.

use serde::Serialize;

use carmatch_core::{FreeReason, LedgerEntry, Listing, Payment};

/// Result of publishing a listing.
#[derive(Debug, Clone, Serialize)]
pub struct PublishOutcome {
    /// The stored listing.
    pub listing: Listing,
    /// Debit entry, when a credit was consumed.
    pub entry: Option<LedgerEntry>,
    /// Why the period was free, when it was.
    pub free_reason: Option<FreeReason>,
    /// Owner's balance after the operation.
    pub balance: i64,
}

/// Result of an owner reactivating a listing.
#[derive(Debug, Clone, Serialize)]
pub struct ReactivateOutcome {
    /// The listing after the operation.
    pub listing: Listing,
    /// Debit entry, when a credit was consumed.
    pub entry: Option<LedgerEntry>,
    /// Owner's balance after the operation.
    pub balance: i64,
}

/// Result of sweeping one expired listing.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum RenewalOutcome {
    /// The listing was extended.
    Renewed {
        /// The listing after renewal.
        listing: Listing,
        /// Debit entry; `None` for free administrator extensions.
        entry: Option<LedgerEntry>,
        /// Owner's balance after the operation.
        balance: i64,
    },
    /// The owner could not pay; the listing is now inactive.
    Deactivated {
        /// The listing after deactivation.
        listing: Listing,
    },
    /// The listing no longer needed renewal when it was locked.
    Skipped,
}

/// Result of crediting a payment.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PaymentOutcome {
    /// First time this transaction id was seen; the balance was increased.
    Credited {
        /// The recorded payment.
        payment: Payment,
        /// The purchase ledger entry.
        entry: LedgerEntry,
        /// Balance after crediting.
        balance: i64,
    },
    /// The transaction id was already recorded; nothing changed.
    AlreadyProcessed {
        /// The existing payment.
        payment: Payment,
    },
}

impl PaymentOutcome {
    /// The payment row, new or existing.
    #[must_use]
    pub const fn payment(&self) -> &Payment {
        match self {
            Self::Credited { payment, .. } | Self::AlreadyProcessed { payment } => payment,
        }
    }

    /// Whether this call changed the balance.
    #[must_use]
    pub const fn is_credited(&self) -> bool {
        matches!(self, Self::Credited { .. })
    }
}
