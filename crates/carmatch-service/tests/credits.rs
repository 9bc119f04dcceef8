//! Credit balance, ledger and adjustment integration tests.

mod common;

use axum::http::StatusCode;
use common::TestHarness;
use serde_json::{json, Value};

#[tokio::test]
async fn balance_of_new_account_is_zero() {
    let harness = TestHarness::new();
    harness.create_account().await;
    let (name, value) = harness.user_auth();

    let response = harness
        .server
        .get("/v1/credits/balance")
        .add_header(name, value)
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["credit_balance"], 0);
}

#[tokio::test]
async fn balance_without_account_is_not_found() {
    let harness = TestHarness::new();
    let (name, value) = harness.user_auth();

    harness
        .server
        .get("/v1/credits/balance")
        .add_header(name, value)
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn ledger_pages_newest_first() {
    let harness = TestHarness::new();
    harness.create_account().await;
    for credits in 1..=3 {
        harness.grant_credits(credits).await;
    }

    let (name, value) = harness.user_auth();
    let first: Value = harness
        .server
        .get("/v1/credits/ledger")
        .add_query_param("limit", 2)
        .add_header(name, value)
        .await
        .json();
    let entries = first["entries"].as_array().unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0]["amount"], 3);
    assert_eq!(entries[0]["balance_after"], 6);
    assert_eq!(entries[0]["kind"], "admin_adjustment");
    assert_eq!(first["has_more"], true);

    let (name, value) = harness.user_auth();
    let rest: Value = harness
        .server
        .get("/v1/credits/ledger")
        .add_query_param("limit", 2)
        .add_query_param("offset", 2)
        .add_header(name, value)
        .await
        .json();
    let entries = rest["entries"].as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["amount"], 1);
    assert_eq!(rest["has_more"], false);
}

#[tokio::test]
async fn reconcile_reports_consistent_balance() {
    let harness = TestHarness::new();
    harness.create_account().await;
    harness.grant_credits(4).await;
    let (name, value) = harness.user_auth();

    let body: Value = harness
        .server
        .get("/v1/credits/reconcile")
        .add_header(name, value)
        .await
        .json();

    assert_eq!(body["credit_balance"], 4);
    assert_eq!(body["ledger_total"], 4);
    assert_eq!(body["consistent"], true);
}

#[tokio::test]
async fn admin_adjustment_requires_admin_key() {
    let harness = TestHarness::new();
    harness.create_account().await;
    let payload = json!({
        "user_id": harness.test_user_id.to_string(),
        "amount": 5,
        "reason": "goodwill"
    });

    let (name, value) = harness.user_auth();
    harness
        .server
        .post("/v1/credits/adjust")
        .add_header(name, value)
        .json(&payload)
        .await
        .assert_status(StatusCode::UNAUTHORIZED);

    let (name, value) = TestHarness::admin_auth();
    let response = harness
        .server
        .post("/v1/credits/adjust")
        .add_header(name, value)
        .json(&payload)
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["credit_balance"], 5);
}

#[tokio::test]
async fn admin_adjustment_cannot_overdraw() {
    let harness = TestHarness::new();
    harness.create_account().await;
    harness.grant_credits(1).await;
    let (name, value) = TestHarness::admin_auth();

    let response = harness
        .server
        .post("/v1/credits/adjust")
        .add_header(name, value)
        .json(&json!({
            "user_id": harness.test_user_id.to_string(),
            "amount": -2,
            "reason": "chargeback"
        }))
        .await;

    response.assert_status(StatusCode::PAYMENT_REQUIRED);
}

#[tokio::test]
async fn checkout_without_stripe_is_unavailable() {
    let harness = TestHarness::new();
    harness.create_account().await;
    let (name, value) = harness.user_auth();

    harness
        .server
        .post("/v1/credits/checkout")
        .add_header(name, value)
        .json(&json!({ "credits": 5 }))
        .await
        .assert_status(StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn checkout_rejects_out_of_range_quantities() {
    let harness = TestHarness::new();
    harness.create_account().await;

    for credits in [0, -1, 101] {
        let (name, value) = harness.user_auth();
        harness
            .server
            .post("/v1/credits/checkout")
            .add_header(name, value)
            .json(&json!({ "credits": credits }))
            .await
            .assert_status(StatusCode::BAD_REQUEST);
    }
}
