//! Router configuration.
//!
//! This module sets up the Axum router with all routes and middleware.

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{accounts, credits, cron, health, listings, webhooks};
use crate::state::AppState;

/// Maximum concurrent requests for general API endpoints.
const API_MAX_CONCURRENT_REQUESTS: usize = 50;

/// Create the service router with all routes and middleware.
///
/// # Routes
///
/// ## Public
/// - `GET /health` - Health check
///
/// ## Accounts (JWT auth)
/// - `POST /v1/accounts` - Create/register account
/// - `GET /v1/accounts/me` - Get current user's account
///
/// ## Listings (JWT auth, owner only)
/// - `POST /v1/listings` - Publish a listing
/// - `GET /v1/listings` - List own listings
/// - `GET /v1/listings/:id` - Get a listing
/// - `DELETE /v1/listings/:id` - Delete a listing
/// - `POST /v1/listings/:id/status` - Activate or deactivate
///
/// ## Credits (JWT auth)
/// - `GET /v1/credits/balance` - Get current balance
/// - `GET /v1/credits/ledger` - List ledger history
/// - `GET /v1/credits/reconcile` - Compare balance with ledger
/// - `POST /v1/credits/checkout` - Start a credit purchase
/// - `POST /v1/credits/confirm` - Confirm a completed checkout
/// - `POST /v1/credits/adjust` - Admin adjustment (admin key)
///
/// ## Webhooks (Signature verification)
/// - `POST /webhooks/stripe` - Stripe webhooks
///
/// ## Scheduler (cron secret)
/// - `GET /cron/renew-listings` - Renewal sweep
pub fn create_router(state: AppState) -> Router {
    // Extract config values before moving state
    let cors_origins = state.config.cors_origins.clone();
    let max_body_bytes = state.config.max_body_bytes;
    let request_timeout_seconds = state.config.request_timeout_seconds;

    let cors = build_cors_layer(&cors_origins);

    let state = Arc::new(state);

    let api_routes = Router::new()
        // Accounts
        .route("/accounts", post(accounts::create_account))
        .route("/accounts/me", get(accounts::get_account))
        // Listings
        .route(
            "/listings",
            post(listings::publish_listing).get(listings::list_listings),
        )
        .route(
            "/listings/:id",
            get(listings::get_listing).delete(listings::delete_listing),
        )
        .route("/listings/:id/status", post(listings::change_status))
        // Credits
        .route("/credits/balance", get(credits::get_balance))
        .route("/credits/ledger", get(credits::list_ledger))
        .route("/credits/reconcile", get(credits::reconcile_check))
        .route("/credits/checkout", post(credits::create_checkout))
        .route("/credits/confirm", post(credits::confirm_payment))
        .route("/credits/adjust", post(credits::adjust_credits))
        .layer(ConcurrencyLimitLayer::new(API_MAX_CONCURRENT_REQUESTS));

    Router::new()
        // Health (public, no rate limit)
        .route("/health", get(health::health))
        // API v1 routes (rate limited)
        .nest("/v1", api_routes)
        // Webhooks (no rate limit - controlled by Stripe)
        .route("/webhooks/stripe", post(webhooks::stripe_webhook))
        .route("/cron/renew-listings", get(cron::renew_listings))
        // Global middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(TimeoutLayer::new(Duration::from_secs(
            request_timeout_seconds,
        )))
        .with_state(state)
}

/// Build the CORS layer from configured origins.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}
