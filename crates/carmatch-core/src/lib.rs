//! Core types and rules for the CarMatch credit ledger.
//!
//! This crate provides the foundational types shared by the store and the HTTP service:
//!
//! - **Identifiers**: `UserId`, `ListingId`, `EntryId`
//! - **Accounts**: `Account` with its integer credit balance
//! - **Listings**: `Listing`, `ListingKind`, `ListingStatus`
//! - **Ledger**: `LedgerEntry`, `EntryKind`
//! - **Payments**: `Payment`, `PaymentSource`, `PaymentCredit`
//! - **Policy**: `PublicationPolicy` and the decisions it produces
//!
//! # Credits
//!
//! **1 credit = one listing period.**
//!
//! - A listing beyond the owner's first of its kind costs 1 credit for 30 days
//! - Renewal of an expired listing costs 1 credit for another 30 days
//! - Balances are `i64` and never go below zero

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod account;
pub mod error;
pub mod ids;
pub mod ledger;
pub mod listing;
pub mod payment;
pub mod policy;

pub use account::Account;
pub use error::{LedgerError, Result};
pub use ids::{EntryId, IdError, ListingId, UserId};
pub use ledger::{EntryKind, LedgerEntry};
pub use listing::{Listing, ListingKind, ListingStatus, NewListing};
pub use payment::{Payment, PaymentCredit, PaymentSource};
pub use policy::{
    FreeReason, PublicationDecision, PublicationPolicy, PublisherContext, ReactivationDecision,
    RenewalDecision, DEFAULT_ADMIN_FREE_DAYS, DEFAULT_BUSINESS_FREE_MONTHS,
    DEFAULT_RENEWAL_COST_CREDITS, DEFAULT_RENEWAL_PERIOD_DAYS, DEFAULT_VEHICLE_FREE_MONTHS,
};
