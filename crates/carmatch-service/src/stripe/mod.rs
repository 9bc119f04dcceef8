//! Stripe integration for credit purchases.
//!
//! Stripe handles:
//! - Credit purchases via Checkout
//! - Webhook delivery of completed sessions

pub mod client;
pub mod types;

pub use client::{construct_event, verify_signature, StripeClient, StripeError};
pub use types::*;
