//! Listing types.
//!
//! Vehicle and business listings are the same record as far as the ledger is
//! concerned; only the free period differs, and that lives in the policy.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{LedgerError, ListingId, UserId};

/// The kind of publication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListingKind {
    /// A vehicle for sale.
    Vehicle,

    /// A local automotive business.
    Business,
}

impl ListingKind {
    /// Get the kind name as stored and serialized.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Vehicle => "vehicle",
            Self::Business => "business",
        }
    }
}

impl fmt::Display for ListingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ListingKind {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "vehicle" => Ok(Self::Vehicle),
            "business" => Ok(Self::Business),
            other => Err(LedgerError::UnknownListingKind(other.to_string())),
        }
    }
}

/// Expiration-relevant state of a listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListingStatus {
    /// Visible on the marketplace.
    Active,

    /// Hidden until reactivated.
    Inactive,
}

/// A published vehicle or business.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listing {
    /// Listing ID.
    pub id: ListingId,

    /// Owning user.
    pub owner_id: UserId,

    /// Vehicle or business.
    pub kind: ListingKind,

    /// Display title.
    pub title: String,

    /// Whether the listing is visible.
    pub is_active: bool,

    /// When the paid or free period ends. `None` on legacy rows.
    pub expires_at: Option<DateTime<Utc>>,

    /// Whether the current period was granted for free.
    pub is_free_publication: bool,

    /// When the listing was created.
    pub created_at: DateTime<Utc>,

    /// When the listing was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Listing {
    /// Get the listing status.
    #[must_use]
    pub const fn status(&self) -> ListingStatus {
        if self.is_active {
            ListingStatus::Active
        } else {
            ListingStatus::Inactive
        }
    }

    /// Whether the expiration is strictly before `now`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at < now)
    }

    /// Whether paid or free time remains at `now`.
    #[must_use]
    pub fn has_remaining_time(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at > now)
    }

    /// Whether the renewal sweeper should pick this listing up.
    #[must_use]
    pub fn is_due_for_renewal(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.is_expired(now)
    }
}

/// A listing about to be published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewListing {
    /// Owning user.
    pub owner_id: UserId,

    /// Vehicle or business.
    pub kind: ListingKind,

    /// Display title.
    pub title: String,
}

impl NewListing {
    /// Build the stored listing once the policy has decided its state.
    #[must_use]
    pub fn into_listing(
        self,
        is_active: bool,
        expires_at: DateTime<Utc>,
        is_free_publication: bool,
        now: DateTime<Utc>,
    ) -> Listing {
        Listing {
            id: ListingId::generate(),
            owner_id: self.owner_id,
            kind: self.kind,
            title: self.title,
            is_active,
            expires_at: Some(expires_at),
            is_free_publication,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn listing(expires_at: Option<DateTime<Utc>>, is_active: bool) -> Listing {
        let now = Utc::now();
        Listing {
            id: ListingId::generate(),
            owner_id: UserId::generate(),
            kind: ListingKind::Vehicle,
            title: "2014 Mazda 3".into(),
            is_active,
            expires_at,
            is_free_publication: false,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn kind_parses_stored_names() {
        assert_eq!("vehicle".parse::<ListingKind>().unwrap(), ListingKind::Vehicle);
        assert_eq!("business".parse::<ListingKind>().unwrap(), ListingKind::Business);
        assert!("boat".parse::<ListingKind>().is_err());
    }

    #[test]
    fn expiry_is_strict() {
        let now = Utc::now();
        assert!(!listing(Some(now), true).is_expired(now));
        assert!(listing(Some(now - Duration::seconds(1)), true).is_expired(now));
        assert!(!listing(None, true).is_expired(now));
    }

    #[test]
    fn inactive_listings_are_not_due() {
        let now = Utc::now();
        let past = Some(now - Duration::days(1));
        assert!(listing(past, true).is_due_for_renewal(now));
        assert!(!listing(past, false).is_due_for_renewal(now));
    }

    #[test]
    fn null_expiration_has_no_remaining_time() {
        assert!(!listing(None, false).has_remaining_time(Utc::now()));
    }
}
