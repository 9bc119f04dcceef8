//! Storage layer for the CarMatch credit ledger.
//!
//! This crate persists accounts, listings, ledger entries and payments, and
//! exposes every balance-affecting change as one atomic compound operation.
//!
//! # Backends
//!
//! - [`PgStore`]: PostgreSQL via `sqlx`. Each compound operation is a single
//!   transaction holding `FOR UPDATE` locks on the rows it touches.
//! - [`MemoryStore`]: in-process maps behind one async mutex, for development
//!   and tests.
//!
//! # Example
//!
//! ```no_run
//! # async fn demo() -> carmatch_store::Result<()> {
//! use carmatch_core::{Account, ListingKind, NewListing, PublicationPolicy, UserId};
//! use carmatch_store::{MemoryStore, Store};
//!
//! let store = MemoryStore::new();
//! let now = chrono::Utc::now();
//! let user_id = UserId::generate();
//! store.create_account(&Account::new(user_id, None, now)).await?;
//!
//! let draft = NewListing { owner_id: user_id, kind: ListingKind::Vehicle, title: "Civic".into() };
//! let outcome = store.publish_listing(draft, &PublicationPolicy::default(), now).await?;
//! assert!(outcome.listing.is_active);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod memory;
pub mod outcome;
pub mod postgres;
pub mod schema;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use outcome::{PaymentOutcome, PublishOutcome, ReactivateOutcome, RenewalOutcome};
pub use postgres::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use carmatch_core::{
    Account, LedgerEntry, Listing, ListingId, ListingKind, NewListing, Payment, PaymentCredit,
    PublicationPolicy, UserId,
};

/// The storage trait defining all database operations.
///
/// Compound operations evaluate the [`PublicationPolicy`] inside the same
/// transaction that writes the balance, the ledger entry and the listing, so
/// either all of them commit or none do.
#[async_trait]
pub trait Store: Send + Sync {
    // =========================================================================
    // Account Operations
    // =========================================================================

    /// Insert a new account.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::AlreadyExists` if the user already has an account.
    async fn create_account(&self, account: &Account) -> Result<()>;

    /// Get an account by user ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_account(&self, user_id: &UserId) -> Result<Option<Account>>;

    // =========================================================================
    // Listing Operations
    // =========================================================================

    /// Get a listing by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_listing(&self, listing_id: &ListingId) -> Result<Option<Listing>>;

    /// List an owner's listings, newest first, optionally filtered by kind.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_listings_by_owner(
        &self,
        owner_id: &UserId,
        kind: Option<ListingKind>,
    ) -> Result<Vec<Listing>>;

    /// IDs of active listings whose expiration is strictly before `now`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_expired_listings(&self, now: DateTime<Utc>) -> Result<Vec<ListingId>>;

    /// Delete a listing. Ledger entries referencing it are kept.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the listing doesn't exist.
    async fn delete_listing(&self, listing_id: &ListingId) -> Result<()>;

    // =========================================================================
    // Ledger Operations
    // =========================================================================

    /// List ledger entries for a user, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_ledger_entries(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<LedgerEntry>>;

    /// Sum of all ledger amounts for a user.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn ledger_total(&self, user_id: &UserId) -> Result<i64>;

    /// Get a payment by external transaction id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_payment(&self, external_transaction_id: &str) -> Result<Option<Payment>>;

    // =========================================================================
    // Compound Operations
    // =========================================================================

    /// Publish a listing: count the owner's listings of that kind, apply the
    /// policy, debit and append a ledger entry when charged, insert the listing.
    ///
    /// # Errors
    ///
    /// - `StoreError::NotFound` if the owner has no account.
    async fn publish_listing(
        &self,
        draft: NewListing,
        policy: &PublicationPolicy,
        now: DateTime<Utc>,
    ) -> Result<PublishOutcome>;

    /// Hide a listing. No charge, expiration untouched.
    ///
    /// # Errors
    ///
    /// - `StoreError::NotFound` if the listing doesn't exist.
    async fn deactivate_listing(&self, listing_id: &ListingId, now: DateTime<Utc>)
        -> Result<Listing>;

    /// Reactivate a listing: free while time remains, otherwise charged like a renewal.
    ///
    /// # Errors
    ///
    /// - `StoreError::NotFound` if the listing or owner doesn't exist.
    /// - `StoreError::InsufficientCredits` if the owner cannot pay.
    async fn reactivate_listing(
        &self,
        listing_id: &ListingId,
        policy: &PublicationPolicy,
        now: DateTime<Utc>,
    ) -> Result<ReactivateOutcome>;

    /// Renew or deactivate one expired listing.
    ///
    /// The expiry predicate is re-checked under lock; a listing that is no
    /// longer active or no longer expired yields `RenewalOutcome::Skipped`.
    ///
    /// # Errors
    ///
    /// - `StoreError::NotFound` if the owner's account is missing.
    async fn renew_listing(
        &self,
        listing_id: &ListingId,
        policy: &PublicationPolicy,
        now: DateTime<Utc>,
    ) -> Result<RenewalOutcome>;

    /// Credit a confirmed payment exactly once per external transaction id.
    ///
    /// # Errors
    ///
    /// - `StoreError::Invalid` if the credit amount is not positive.
    /// - `StoreError::NotFound` if the user has no account.
    async fn record_payment(
        &self,
        credit: &PaymentCredit,
        now: DateTime<Utc>,
    ) -> Result<PaymentOutcome>;

    /// Add (or remove, with a negative amount) credits as an administrator.
    ///
    /// Returns the ledger entry and the new balance.
    ///
    /// # Errors
    ///
    /// - `StoreError::Invalid` if `amount` is zero.
    /// - `StoreError::NotFound` if the user has no account.
    /// - `StoreError::InsufficientCredits` if the balance would go negative.
    async fn adjust_credits(
        &self,
        user_id: &UserId,
        amount: i64,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<(LedgerEntry, i64)>;
}
