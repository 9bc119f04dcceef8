//! Publication policy.
//!
//! One set of rules decides publication, renewal and reactivation for both
//! listing kinds. Only the free period differs between vehicles and businesses.
//!
//! | Who / what                         | Outcome                                  |
//! |------------------------------------|------------------------------------------|
//! | admin                              | free, active, `now + admin period`       |
//! | first listing of its kind          | free, active, `now + kind free months`   |
//! | later listing, balance >= cost     | debit cost, active, `now + renewal days` |
//! | later listing, balance < cost      | inactive, expires `now`, no charge       |

use chrono::{DateTime, Duration, Months, Utc};
use serde::{Deserialize, Serialize};

use crate::{LedgerError, Listing, ListingKind, Result};

// ============================================================================
// Constants
// ============================================================================

/// Free months for an owner's first vehicle.
pub const DEFAULT_VEHICLE_FREE_MONTHS: u32 = 1;

/// Free months for an owner's first business.
pub const DEFAULT_BUSINESS_FREE_MONTHS: u32 = 3;

/// Days of free publication granted to administrators (about ten years).
pub const DEFAULT_ADMIN_FREE_DAYS: i64 = 3650;

/// Credits charged per paid period.
pub const DEFAULT_RENEWAL_COST_CREDITS: i64 = 1;

/// Length of a paid period in days.
pub const DEFAULT_RENEWAL_PERIOD_DAYS: i64 = 30;

/// Tunable publication rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicationPolicy {
    /// Free months for an owner's first vehicle.
    pub vehicle_free_months: u32,

    /// Free months for an owner's first business.
    pub business_free_months: u32,

    /// Free days for administrators.
    pub admin_free_days: i64,

    /// Credits charged per paid period.
    pub renewal_cost_credits: i64,

    /// Length of a paid period in days.
    pub renewal_period_days: i64,
}

impl Default for PublicationPolicy {
    fn default() -> Self {
        Self {
            vehicle_free_months: DEFAULT_VEHICLE_FREE_MONTHS,
            business_free_months: DEFAULT_BUSINESS_FREE_MONTHS,
            admin_free_days: DEFAULT_ADMIN_FREE_DAYS,
            renewal_cost_credits: DEFAULT_RENEWAL_COST_CREDITS,
            renewal_period_days: DEFAULT_RENEWAL_PERIOD_DAYS,
        }
    }
}

/// What the policy needs to know about the publisher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublisherContext {
    /// Whether the owner is an administrator.
    pub is_admin: bool,

    /// Whether the owner has no other listing of this kind.
    pub is_first_of_kind: bool,

    /// Owner's current credit balance.
    pub balance: i64,
}

/// Why a period was granted without charge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FreeReason {
    /// Owner is an administrator.
    Admin,

    /// Owner's first listing of this kind.
    FirstOfKind,
}

/// Outcome of publishing a new listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublicationDecision {
    /// Publish active without charge.
    Free {
        /// Why no credit is charged.
        reason: FreeReason,
        /// End of the free period.
        expires_at: DateTime<Utc>,
    },

    /// Publish active and debit credits.
    Charge {
        /// Credits to debit.
        cost: i64,
        /// End of the paid period.
        expires_at: DateTime<Utc>,
    },

    /// Create the listing inactive, already expired, without charge.
    Inactive {
        /// Always equal to `now`.
        expires_at: DateTime<Utc>,
    },
}

impl PublicationDecision {
    /// Whether the listing starts active.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        !matches!(self, Self::Inactive { .. })
    }

    /// Expiration to store on the listing.
    #[must_use]
    pub const fn expires_at(&self) -> DateTime<Utc> {
        match self {
            Self::Free { expires_at, .. }
            | Self::Charge { expires_at, .. }
            | Self::Inactive { expires_at } => *expires_at,
        }
    }

    /// Credits debited by this decision.
    #[must_use]
    pub const fn cost(&self) -> i64 {
        match self {
            Self::Charge { cost, .. } => *cost,
            Self::Free { .. } | Self::Inactive { .. } => 0,
        }
    }

    /// Whether the period is free.
    #[must_use]
    pub const fn is_free(&self) -> bool {
        matches!(self, Self::Free { .. })
    }
}

/// Outcome for an active listing whose period has ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenewalDecision {
    /// Extend without charge (administrators).
    ExtendFree {
        /// New expiration.
        expires_at: DateTime<Utc>,
    },

    /// Debit credits and extend.
    Charge {
        /// Credits to debit.
        cost: i64,
        /// New expiration.
        expires_at: DateTime<Utc>,
    },

    /// Not enough credit: hide the listing, expiration untouched.
    Deactivate,
}

/// Outcome for an owner asking to reactivate a listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReactivationDecision {
    /// Nothing to do.
    AlreadyActive,

    /// Time remains on the current period, reactivate for free.
    Resume,

    /// Extend without charge (administrators).
    ExtendFree {
        /// New expiration.
        expires_at: DateTime<Utc>,
    },

    /// Debit credits and extend.
    Charge {
        /// Credits to debit.
        cost: i64,
        /// New expiration.
        expires_at: DateTime<Utc>,
    },

    /// Owner cannot pay.
    Insufficient {
        /// Current balance.
        balance: i64,
        /// Credits required.
        required: i64,
    },
}

impl PublicationPolicy {
    /// Check that every cost and period is at least one unit.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::InvalidPolicy` naming the first parameter out of range.
    pub fn validate(&self) -> Result<()> {
        let checks = [
            ("renewal_cost_credits", self.renewal_cost_credits),
            ("renewal_period_days", self.renewal_period_days),
            ("admin_free_days", self.admin_free_days),
            ("vehicle_free_months", i64::from(self.vehicle_free_months)),
            ("business_free_months", i64::from(self.business_free_months)),
        ];

        match checks.iter().find(|(_, value)| *value < 1) {
            Some((name, value)) => Err(LedgerError::InvalidPolicy(format!(
                "{name} must be at least 1, got {value}"
            ))),
            None => Ok(()),
        }
    }

    /// Free months for the first listing of `kind`.
    #[must_use]
    pub const fn free_months(&self, kind: ListingKind) -> u32 {
        match kind {
            ListingKind::Vehicle => self.vehicle_free_months,
            ListingKind::Business => self.business_free_months,
        }
    }

    /// End of a free first-of-kind period starting at `now`.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::ExpirationOutOfRange` on date overflow.
    pub fn free_period_end(&self, kind: ListingKind, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
        now.checked_add_months(Months::new(self.free_months(kind)))
            .ok_or(LedgerError::ExpirationOutOfRange)
    }

    /// End of an administrator's free period starting at `now`.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::ExpirationOutOfRange` on date overflow.
    pub fn admin_period_end(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
        add_days(now, self.admin_free_days)
    }

    /// End of a paid period starting at `now`.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::ExpirationOutOfRange` on date overflow.
    pub fn paid_period_end(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
        add_days(now, self.renewal_period_days)
    }

    /// Decide how a new listing is published.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::ExpirationOutOfRange` on date overflow.
    pub fn decide_publication(
        &self,
        kind: ListingKind,
        ctx: PublisherContext,
        now: DateTime<Utc>,
    ) -> Result<PublicationDecision> {
        if ctx.is_admin {
            return Ok(PublicationDecision::Free {
                reason: FreeReason::Admin,
                expires_at: self.admin_period_end(now)?,
            });
        }

        if ctx.is_first_of_kind {
            return Ok(PublicationDecision::Free {
                reason: FreeReason::FirstOfKind,
                expires_at: self.free_period_end(kind, now)?,
            });
        }

        if ctx.balance >= self.renewal_cost_credits {
            return Ok(PublicationDecision::Charge {
                cost: self.renewal_cost_credits,
                expires_at: self.paid_period_end(now)?,
            });
        }

        Ok(PublicationDecision::Inactive { expires_at: now })
    }

    /// Decide what happens to an active listing past its expiration.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::ExpirationOutOfRange` on date overflow.
    pub fn decide_renewal(
        &self,
        is_admin: bool,
        balance: i64,
        now: DateTime<Utc>,
    ) -> Result<RenewalDecision> {
        if is_admin {
            return Ok(RenewalDecision::ExtendFree {
                expires_at: self.admin_period_end(now)?,
            });
        }

        if balance >= self.renewal_cost_credits {
            return Ok(RenewalDecision::Charge {
                cost: self.renewal_cost_credits,
                expires_at: self.paid_period_end(now)?,
            });
        }

        Ok(RenewalDecision::Deactivate)
    }

    /// Decide how an owner's reactivation request is handled.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::ExpirationOutOfRange` on date overflow.
    pub fn decide_reactivation(
        &self,
        listing: &Listing,
        is_admin: bool,
        balance: i64,
        now: DateTime<Utc>,
    ) -> Result<ReactivationDecision> {
        if listing.is_active {
            return Ok(ReactivationDecision::AlreadyActive);
        }

        if listing.has_remaining_time(now) {
            return Ok(ReactivationDecision::Resume);
        }

        Ok(match self.decide_renewal(is_admin, balance, now)? {
            RenewalDecision::ExtendFree { expires_at } => {
                ReactivationDecision::ExtendFree { expires_at }
            }
            RenewalDecision::Charge { cost, expires_at } => {
                ReactivationDecision::Charge { cost, expires_at }
            }
            RenewalDecision::Deactivate => ReactivationDecision::Insufficient {
                balance,
                required: self.renewal_cost_credits,
            },
        })
    }
}

fn add_days(now: DateTime<Utc>, days: i64) -> Result<DateTime<Utc>> {
    Duration::try_days(days)
        .and_then(|d| now.checked_add_signed(d))
        .ok_or(LedgerError::ExpirationOutOfRange)
}
