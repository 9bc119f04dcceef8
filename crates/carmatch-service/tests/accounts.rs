//! Account registration integration tests.

mod common;

use axum::http::StatusCode;
use carmatch_core::UserId;
use common::{bearer, TestHarness};
use serde_json::json;

#[tokio::test]
async fn create_account_starts_with_zero_balance() {
    let harness = TestHarness::new();
    let (name, value) = harness.user_auth();

    let response = harness
        .server
        .post("/v1/accounts")
        .add_header(name, value)
        .json(&json!({ "email": "seller@example.com" }))
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["user_id"], harness.test_user_id.to_string());
    assert_eq!(body["email"], "seller@example.com");
    assert_eq!(body["credit_balance"], 0);
    assert_eq!(body["is_admin"], false);
}

#[tokio::test]
async fn create_account_twice_conflicts() {
    let harness = TestHarness::new();
    harness.create_account().await;
    let (name, value) = harness.user_auth();

    let response = harness
        .server
        .post("/v1/accounts")
        .add_header(name, value)
        .json(&json!({}))
        .await;

    response.assert_status(StatusCode::CONFLICT);
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"]["code"], "conflict");
}

#[tokio::test]
async fn admin_email_from_token_creates_admin_account() {
    let harness = TestHarness::new();
    let user_id = UserId::generate();
    let token = TestHarness::token_for(&user_id, Some("Admin@CarMatch.test"));
    let (name, value) = bearer(&token);

    let response = harness
        .server
        .post("/v1/accounts")
        .add_header(name, value)
        .json(&json!({}))
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["is_admin"], true);
}

#[tokio::test]
async fn get_account_requires_registration() {
    let harness = TestHarness::new();
    let (name, value) = harness.user_auth();

    let response = harness
        .server
        .get("/v1/accounts/me")
        .add_header(name, value)
        .await;

    response.assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn requests_without_valid_token_are_unauthorized() {
    let harness = TestHarness::new();

    harness
        .server
        .get("/v1/accounts/me")
        .await
        .assert_status(StatusCode::UNAUTHORIZED);

    let (name, value) = bearer("not-a-jwt");
    harness
        .server
        .get("/v1/accounts/me")
        .add_header(name, value)
        .await
        .assert_status(StatusCode::UNAUTHORIZED);
}
