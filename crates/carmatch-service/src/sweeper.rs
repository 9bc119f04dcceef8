//! Renewal sweep.
//!
//! Finds active listings past their expiration and renews or deactivates
//! each one through [`Store::renew_listing`]. Every listing is handled in
//! its own transaction; one failure is logged and counted without stopping
//! the sweep. Running it twice at the same instant changes nothing the
//! second time.

use chrono::{DateTime, Utc};
use serde::Serialize;

use carmatch_core::PublicationPolicy;
use carmatch_store::{RenewalOutcome, Store, StoreError};

/// Counts from one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Listings selected as expired.
    pub scanned: usize,
    /// Listings extended (paid or admin).
    pub renewed: usize,
    /// Listings hidden for lack of credit.
    pub deactivated: usize,
    /// Listings that no longer needed renewal when locked.
    pub skipped: usize,
    /// Listings whose renewal failed.
    pub failed: usize,
    /// Credits debited during the sweep.
    pub credits_consumed: i64,
}

/// Run one renewal sweep at `now`.
///
/// # Errors
///
/// Returns an error only if the expired listings cannot be selected.
pub async fn run_renewal_sweep(
    store: &dyn Store,
    policy: &PublicationPolicy,
    now: DateTime<Utc>,
) -> Result<SweepReport, StoreError> {
    let expired = store.list_expired_listings(now).await?;
    let mut report = SweepReport {
        scanned: expired.len(),
        ..SweepReport::default()
    };

    for listing_id in expired {
        match store.renew_listing(&listing_id, policy, now).await {
            Ok(RenewalOutcome::Renewed { entry, listing, .. }) => {
                report.renewed += 1;
                if let Some(entry) = entry {
                    report.credits_consumed += -entry.amount;
                }
                tracing::debug!(
                    listing_id = %listing_id,
                    owner_id = %listing.owner_id,
                    expires_at = ?listing.expires_at,
                    "Listing renewed"
                );
            }
            Ok(RenewalOutcome::Deactivated { listing }) => {
                report.deactivated += 1;
                tracing::info!(
                    listing_id = %listing_id,
                    owner_id = %listing.owner_id,
                    "Listing deactivated for lack of credits"
                );
            }
            Ok(RenewalOutcome::Skipped) => report.skipped += 1,
            Err(e) => {
                report.failed += 1;
                tracing::error!(listing_id = %listing_id, error = %e, "Listing renewal failed");
            }
        }
    }

    tracing::info!(
        scanned = report.scanned,
        renewed = report.renewed,
        deactivated = report.deactivated,
        skipped = report.skipped,
        failed = report.failed,
        credits_consumed = report.credits_consumed,
        "Renewal sweep finished"
    );

    Ok(report)
}
