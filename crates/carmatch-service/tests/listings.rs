//! Listing publication integration tests.

mod common;

use axum::http::StatusCode;
use carmatch_core::UserId;
use common::TestHarness;
use serde_json::{json, Value};

async fn publish(harness: &TestHarness, kind: &str, title: &str) -> axum_test::TestResponse {
    let (name, value) = harness.user_auth();
    harness
        .server
        .post("/v1/listings")
        .add_header(name, value)
        .json(&json!({ "kind": kind, "title": title }))
        .await
}

async fn set_status(harness: &TestHarness, id: &str, action: &str) -> axum_test::TestResponse {
    let (name, value) = harness.user_auth();
    harness
        .server
        .post(&format!("/v1/listings/{id}/status"))
        .add_header(name, value)
        .json(&json!({ "action": action }))
        .await
}

#[tokio::test]
async fn first_listing_of_each_kind_is_free() {
    let harness = TestHarness::new();
    harness.create_account().await;

    let vehicle = publish(&harness, "vehicle", "2019 Civic").await;
    vehicle.assert_status_ok();
    let vehicle: Value = vehicle.json();
    assert_eq!(vehicle["listing"]["status"], "active");
    assert_eq!(vehicle["listing"]["is_free_publication"], true);
    assert_eq!(vehicle["free_reason"], "first_of_kind");
    assert_eq!(vehicle["credits_charged"], 0);

    let business = publish(&harness, "business", "Main St Motors").await;
    business.assert_status_ok();
    let business: Value = business.json();
    assert_eq!(business["listing"]["status"], "active");
    assert_eq!(business["free_reason"], "first_of_kind");
}

#[tokio::test]
async fn second_listing_without_credits_is_created_inactive() {
    let harness = TestHarness::new();
    harness.create_account().await;
    publish(&harness, "vehicle", "First").await.assert_status_ok();

    let response = publish(&harness, "vehicle", "Second").await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["listing"]["status"], "inactive");
    assert_eq!(body["credits_charged"], 0);
    assert_eq!(body["balance"], 0);
}

#[tokio::test]
async fn second_listing_with_credits_is_charged() {
    let harness = TestHarness::new();
    harness.create_account().await;
    harness.grant_credits(3).await;
    publish(&harness, "vehicle", "First").await.assert_status_ok();

    let response = publish(&harness, "vehicle", "Second").await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["listing"]["status"], "active");
    assert_eq!(body["listing"]["is_free_publication"], false);
    assert_eq!(body["credits_charged"], 1);
    assert_eq!(body["balance"], 2);
}

#[tokio::test]
async fn publish_validates_title_and_account() {
    let harness = TestHarness::new();

    publish(&harness, "vehicle", "No account yet")
        .await
        .assert_status(StatusCode::NOT_FOUND);

    harness.create_account().await;
    publish(&harness, "vehicle", "   ")
        .await
        .assert_status(StatusCode::BAD_REQUEST);
    publish(&harness, "vehicle", &"x".repeat(201))
        .await
        .assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn reactivation_charges_or_reports_insufficient_credits() {
    let harness = TestHarness::new();
    harness.create_account().await;
    publish(&harness, "vehicle", "First").await.assert_status_ok();
    let second: Value = publish(&harness, "vehicle", "Second").await.json();
    let id = second["listing"]["id"].as_str().unwrap().to_string();

    let refused = set_status(&harness, &id, "activate").await;
    refused.assert_status(StatusCode::PAYMENT_REQUIRED);
    let body: Value = refused.json();
    assert_eq!(body["error"]["code"], "insufficient_credits");
    assert_eq!(body["error"]["details"]["required"], 1);

    harness.grant_credits(1).await;
    let activated = set_status(&harness, &id, "activate").await;
    activated.assert_status_ok();
    let body: Value = activated.json();
    assert_eq!(body["listing"]["status"], "active");
    assert_eq!(body["credits_charged"], 1);
    assert_eq!(body["balance"], 0);
}

#[tokio::test]
async fn deactivate_then_reactivate_within_period_is_free() {
    let harness = TestHarness::new();
    harness.create_account().await;
    let first: Value = publish(&harness, "vehicle", "First").await.json();
    let id = first["listing"]["id"].as_str().unwrap().to_string();
    let expires_at = first["listing"]["expires_at"].clone();

    let hidden = set_status(&harness, &id, "deactivate").await;
    hidden.assert_status_ok();
    let body: Value = hidden.json();
    assert_eq!(body["listing"]["status"], "inactive");
    assert_eq!(body["listing"]["expires_at"], expires_at);

    let shown = set_status(&harness, &id, "activate").await;
    shown.assert_status_ok();
    let body: Value = shown.json();
    assert_eq!(body["listing"]["status"], "active");
    assert_eq!(body["credits_charged"], 0);
    assert_eq!(body["listing"]["expires_at"], expires_at);
}

#[tokio::test]
async fn listings_are_private_to_their_owner() {
    let harness = TestHarness::new();
    harness.create_account().await;
    let first: Value = publish(&harness, "vehicle", "Mine").await.json();
    let id = first["listing"]["id"].as_str().unwrap().to_string();

    let (name, value) = TestHarness::auth_for(&UserId::generate());
    harness
        .server
        .get(&format!("/v1/listings/{id}"))
        .add_header(name, value)
        .await
        .assert_status(StatusCode::FORBIDDEN);

    let (name, value) = harness.user_auth();
    harness
        .server
        .get("/v1/listings/not-a-uuid")
        .add_header(name, value)
        .await
        .assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn list_filters_by_kind_and_delete_keeps_ledger() {
    let harness = TestHarness::new();
    harness.create_account().await;
    harness.grant_credits(1).await;
    publish(&harness, "vehicle", "First").await.assert_status_ok();
    let paid: Value = publish(&harness, "vehicle", "Paid").await.json();
    publish(&harness, "business", "Shop").await.assert_status_ok();

    let (name, value) = harness.user_auth();
    let vehicles: Value = harness
        .server
        .get("/v1/listings")
        .add_query_param("kind", "vehicle")
        .add_header(name, value)
        .await
        .json();
    assert_eq!(vehicles["listings"].as_array().unwrap().len(), 2);

    let id = paid["listing"]["id"].as_str().unwrap();
    let (name, value) = harness.user_auth();
    harness
        .server
        .delete(&format!("/v1/listings/{id}"))
        .add_header(name, value)
        .await
        .assert_status_ok();

    let (name, value) = harness.user_auth();
    harness
        .server
        .get(&format!("/v1/listings/{id}"))
        .add_header(name, value)
        .await
        .assert_status(StatusCode::NOT_FOUND);

    let (name, value) = harness.user_auth();
    let ledger: Value = harness
        .server
        .get("/v1/credits/ledger")
        .add_header(name, value)
        .await
        .json();
    let entries = ledger["entries"].as_array().unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0]["amount"], -1);
    assert_eq!(entries[0]["listing_id"], id);
}
