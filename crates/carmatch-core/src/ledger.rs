//! Ledger entry types.
//!
//! Every change to an account's credit balance appends exactly one entry.
//! Entries are never updated or deleted.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{EntryId, LedgerError, ListingId, ListingKind, UserId};

/// An immutable record of a balance change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Unique entry ID (ULID for time-ordering).
    pub id: EntryId,

    /// The user whose balance was affected.
    pub user_id: UserId,

    /// Signed amount in credits. Positive = credit, negative = debit.
    pub amount: i64,

    /// Why the balance changed.
    pub kind: EntryKind,

    /// Balance after this entry was applied.
    pub balance_after: i64,

    /// Human-readable description.
    pub description: String,

    /// Listing paid for, if any.
    pub listing_id: Option<ListingId>,

    /// Payment provider transaction id, for purchases.
    pub external_transaction_id: Option<String>,

    /// When the entry was created.
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// Create a purchase entry for credits bought through the payment provider.
    #[must_use]
    pub fn purchase(
        user_id: UserId,
        credits: i64,
        balance_after: i64,
        external_transaction_id: String,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: EntryId::generate(),
            user_id,
            amount: credits,
            kind: EntryKind::Purchase,
            balance_after,
            description: format!("Purchased {credits} credits (transaction {external_transaction_id})"),
            listing_id: None,
            external_transaction_id: Some(external_transaction_id),
            created_at: now,
        }
    }

    /// Create a debit entry for publishing, renewing or reactivating a listing.
    ///
    /// The stored amount is `-cost`.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::InvalidAmount` if `cost` is not positive.
    pub fn listing_charge(
        kind: EntryKind,
        user_id: UserId,
        cost: i64,
        balance_after: i64,
        listing_id: ListingId,
        listing_kind: ListingKind,
        now: DateTime<Utc>,
    ) -> Result<Self, LedgerError> {
        if cost <= 0 {
            return Err(LedgerError::InvalidAmount(format!(
                "listing charge must be positive, got {cost}"
            )));
        }

        let verb = match kind {
            EntryKind::Renewal => "Renewal of",
            EntryKind::Reactivation => "Reactivation of",
            _ => "Publication of",
        };
        Ok(Self {
            id: EntryId::generate(),
            user_id,
            amount: -cost,
            kind,
            balance_after,
            description: format!("{verb} {listing_kind} listing {listing_id}"),
            listing_id: Some(listing_id),
            external_transaction_id: None,
            created_at: now,
        })
    }

    /// Create a manual adjustment made by an administrator.
    #[must_use]
    pub fn admin_adjustment(
        user_id: UserId,
        amount: i64,
        balance_after: i64,
        reason: String,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: EntryId::generate(),
            user_id,
            amount,
            kind: EntryKind::AdminAdjustment,
            balance_after,
            description: reason,
            listing_id: None,
            external_transaction_id: None,
            created_at: now,
        }
    }
}

/// Type of ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    /// User purchased credits.
    Purchase,

    /// Credit spent publishing a listing.
    Publication,

    /// Credit spent by the renewal sweeper.
    Renewal,

    /// Credit spent reactivating an expired listing.
    Reactivation,

    /// Manual correction by an administrator.
    AdminAdjustment,
}

impl EntryKind {
    /// Get the kind name as stored and serialized.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Purchase => "purchase",
            Self::Publication => "publication",
            Self::Renewal => "renewal",
            Self::Reactivation => "reactivation",
            Self::AdminAdjustment => "admin_adjustment",
        }
    }

    /// Check if this entry kind consumes credits.
    #[must_use]
    pub const fn is_listing_charge(&self) -> bool {
        matches!(self, Self::Publication | Self::Renewal | Self::Reactivation)
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntryKind {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "purchase" => Ok(Self::Purchase),
            "publication" => Ok(Self::Publication),
            "renewal" => Ok(Self::Renewal),
            "reactivation" => Ok(Self::Reactivation),
            "admin_adjustment" => Ok(Self::AdminAdjustment),
            other => Err(LedgerError::UnknownEntryKind(other.to_string())),
        }
    }
}
