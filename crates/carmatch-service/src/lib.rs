//! CarMatch HTTP API Service.
//!
//! This crate provides the HTTP API for listing publication and credits:
//!
//! - Account registration
//! - Publishing, hiding, reactivating and deleting listings
//! - Credit balance, ledger history and Stripe checkout
//! - Stripe payment webhooks
//! - The scheduled renewal sweep
//!
//! # Authentication
//!
//! 1. **User JWTs** (HS256) for end-user requests
//! 2. **Admin API key** (`X-Admin-Key`) for credit adjustments
//! 3. **Cron secret** (optional bearer) for the renewal sweep

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
// Allow some pedantic lints that are noisy for Axum handler functions
#![allow(clippy::missing_errors_doc)] // Axum handlers all return Result
#![allow(clippy::unused_async)] // Handlers without awaits stay async for routing

pub mod auth;
pub mod config;
pub mod crypto;
pub mod error;
pub mod handlers;
pub mod reconcile;
pub mod routes;
pub mod state;
pub mod stripe;
pub mod sweeper;

pub use config::ServiceConfig;
pub use error::ApiError;
pub use routes::create_router;
pub use state::AppState;
pub use stripe::{StripeClient, StripeError};
pub use sweeper::{run_renewal_sweep, SweepReport};
