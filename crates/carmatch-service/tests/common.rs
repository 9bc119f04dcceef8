//! Common test utilities for carmatch integration tests.

#![allow(dead_code)] // Some utilities are used by different test files

use std::sync::Arc;

use axum::http::{HeaderName, HeaderValue};
use axum::Router;
use axum_test::TestServer;
use chrono::{DateTime, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};

use carmatch_core::{Account, Listing, ListingKind, NewListing, UserId};
use carmatch_service::auth::JwtClaims;
use carmatch_service::{create_router, AppState, ServiceConfig};
use carmatch_store::{MemoryStore, Store};

pub const JWT_SECRET: &str = "test-jwt-secret";
pub const ADMIN_KEY: &str = "test-admin-key";
pub const CRON_SECRET: &str = "test-cron-secret";
pub const WEBHOOK_SECRET: &str = "whsec_test";

/// Test harness containing everything needed for integration tests.
pub struct TestHarness {
    /// The test server for making HTTP requests.
    pub server: TestServer,
    /// The backing store, for seeding and inspection.
    pub store: Arc<MemoryStore>,
    /// The configuration the server runs with.
    pub config: ServiceConfig,
    /// A test user ID for authenticated requests.
    pub test_user_id: UserId,
}

impl TestHarness {
    /// Create a new test harness with a fresh in-memory store.
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    /// Create a harness after adjusting the default test configuration.
    pub fn with_config(adjust: impl FnOnce(&mut ServiceConfig)) -> Self {
        let mut config = ServiceConfig {
            listen_addr: "127.0.0.1:0".into(),
            auth_jwt_secret: Some(JWT_SECRET.into()),
            admin_api_key: Some(ADMIN_KEY.into()),
            admin_emails: vec!["admin@carmatch.test".into()],
            cron_secret: Some(CRON_SECRET.into()),
            stripe_webhook_secret: Some(WEBHOOK_SECRET.into()),
            ..ServiceConfig::default()
        };
        adjust(&mut config);

        let store = Arc::new(MemoryStore::new());
        let state = AppState::new(store.clone(), config.clone());
        let router: Router = create_router(state);

        let server = TestServer::new(router).expect("Failed to create test server");

        Self {
            server,
            store,
            config,
            test_user_id: UserId::generate(),
        }
    }

    /// Signed session token for `user_id`.
    pub fn token_for(user_id: &UserId, email: Option<&str>) -> String {
        let claims = JwtClaims {
            sub: user_id.to_string(),
            exp: Utc::now().timestamp() + 3600,
            iss: None,
            email: email.map(str::to_string),
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
        )
        .expect("Failed to sign token")
    }

    /// Authorization header for the test user.
    pub fn user_auth(&self) -> (HeaderName, HeaderValue) {
        Self::auth_for(&self.test_user_id)
    }

    /// Authorization header for any user.
    pub fn auth_for(user_id: &UserId) -> (HeaderName, HeaderValue) {
        bearer(&Self::token_for(user_id, None))
    }

    /// Admin key header.
    pub fn admin_auth() -> (HeaderName, HeaderValue) {
        (
            HeaderName::from_static("x-admin-key"),
            HeaderValue::from_static(ADMIN_KEY),
        )
    }

    /// Cron secret header.
    pub fn cron_auth() -> (HeaderName, HeaderValue) {
        bearer(CRON_SECRET)
    }

    /// Register the test user's account through the API.
    pub async fn create_account(&self) {
        let (name, value) = self.user_auth();
        self.server
            .post("/v1/accounts")
            .add_header(name, value)
            .json(&serde_json::json!({}))
            .await
            .assert_status_ok();
    }

    /// Give the test user credits directly in the store.
    pub async fn grant_credits(&self, credits: i64) {
        self.store
            .adjust_credits(&self.test_user_id, credits, "test grant", Utc::now())
            .await
            .expect("Failed to grant credits");
    }

    /// Seed an account for `user_id` at `at`.
    pub async fn seed_account(&self, user_id: UserId, credits: i64, at: DateTime<Utc>) {
        self.store
            .create_account(&Account::new(user_id, None, at))
            .await
            .expect("Failed to seed account");
        if credits > 0 {
            self.store
                .adjust_credits(&user_id, credits, "seed", at)
                .await
                .expect("Failed to seed credits");
        }
    }

    /// Publish a vehicle listing for `owner_id` as of `at`.
    pub async fn seed_listing(&self, owner_id: UserId, at: DateTime<Utc>) -> Listing {
        let draft = NewListing {
            owner_id,
            kind: ListingKind::Vehicle,
            title: "Seeded sedan".into(),
        };
        self.store
            .publish_listing(draft, &self.config.policy, at)
            .await
            .expect("Failed to seed listing")
            .listing
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// `Authorization: Bearer <token>` header.
pub fn bearer(token: &str) -> (HeaderName, HeaderValue) {
    (
        axum::http::header::AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {token}")).expect("Invalid header value"),
    )
}
