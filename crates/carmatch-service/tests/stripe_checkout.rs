//! Checkout and confirm flow against a mocked Stripe API.

mod common;

use axum::http::StatusCode;
use carmatch_core::UserId;
use common::TestHarness;
use serde_json::{json, Value};
use wiremock::matchers::{body_string_contains, header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn harness_with_stripe(server: &MockServer) -> TestHarness {
    let base = server.uri();
    TestHarness::with_config(move |config| {
        config.stripe_api_key = Some("sk_test_123".into());
        config.stripe_api_base = base;
    })
}

fn paid_session(id: &str, user_id: &UserId, credits: i64) -> Value {
    json!({
        "id": id,
        "object": "checkout.session",
        "payment_status": "paid",
        "status": "complete",
        "amount_total": credits * 500,
        "currency": "usd",
        "metadata": {
            "user_id": user_id.to_string(),
            "credits": credits.to_string(),
            "purchase_type": "credits"
        }
    })
}

#[tokio::test]
async fn checkout_creates_session_with_credit_metadata() {
    let stripe = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/checkout/sessions"))
        .and(header_exists("authorization"))
        .and(body_string_contains("metadata%5Bpurchase_type%5D=credits"))
        .and(body_string_contains("line_items%5B0%5D%5Bquantity%5D=5"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "cs_test_abc",
            "url": "https://checkout.stripe.com/c/pay/cs_test_abc",
            "status": "open",
            "payment_status": "unpaid"
        })))
        .expect(1)
        .mount(&stripe)
        .await;

    let harness = harness_with_stripe(&stripe);
    harness.create_account().await;
    let (name, value) = harness.user_auth();

    let response = harness
        .server
        .post("/v1/credits/checkout")
        .add_header(name, value)
        .json(&json!({ "credits": 5 }))
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["session_id"], "cs_test_abc");
    assert_eq!(body["checkout_url"], "https://checkout.stripe.com/c/pay/cs_test_abc");
    assert_eq!(body["amount_cents"], 2500);
}

#[tokio::test]
async fn confirm_credits_once() {
    let stripe = MockServer::start().await;
    let harness = harness_with_stripe(&stripe);
    harness.create_account().await;

    Mock::given(method("GET"))
        .and(path("/checkout/sessions/cs_paid"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(paid_session(
                "cs_paid",
                &harness.test_user_id,
                3,
            )),
        )
        .mount(&stripe)
        .await;

    let (name, value) = harness.user_auth();
    let first: Value = harness
        .server
        .post("/v1/credits/confirm")
        .add_header(name, value)
        .json(&json!({ "session_id": "cs_paid" }))
        .await
        .json();
    assert_eq!(first["status"], "credited");
    assert_eq!(first["credits"], 3);
    assert_eq!(first["credit_balance"], 3);

    let (name, value) = harness.user_auth();
    let second: Value = harness
        .server
        .post("/v1/credits/confirm")
        .add_header(name, value)
        .json(&json!({ "session_id": "cs_paid" }))
        .await
        .json();
    assert_eq!(second["status"], "already_processed");
    assert_eq!(second["credit_balance"], 3);
}

#[tokio::test]
async fn confirm_of_another_users_session_is_forbidden() {
    let stripe = MockServer::start().await;
    let harness = harness_with_stripe(&stripe);
    harness.create_account().await;

    Mock::given(method("GET"))
        .and(path("/checkout/sessions/cs_someone_else"))
        .respond_with(ResponseTemplate::new(200).set_body_json(paid_session(
            "cs_someone_else",
            &UserId::generate(),
            3,
        )))
        .mount(&stripe)
        .await;

    let (name, value) = harness.user_auth();
    harness
        .server
        .post("/v1/credits/confirm")
        .add_header(name, value)
        .json(&json!({ "session_id": "cs_someone_else" }))
        .await
        .assert_status(StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn stripe_errors_surface_as_bad_gateway() {
    let stripe = MockServer::start().await;
    let harness = harness_with_stripe(&stripe);
    harness.create_account().await;

    Mock::given(method("GET"))
        .and(path("/checkout/sessions/cs_missing"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "error": {
                "type": "invalid_request_error",
                "message": "No such checkout.session: cs_missing",
                "code": "resource_missing"
            }
        })))
        .mount(&stripe)
        .await;

    let (name, value) = harness.user_auth();
    harness
        .server
        .post("/v1/credits/confirm")
        .add_header(name, value)
        .json(&json!({ "session_id": "cs_missing" }))
        .await
        .assert_status(StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn malformed_session_ids_never_reach_stripe() {
    let stripe = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(0)
        .mount(&stripe)
        .await;

    let harness = harness_with_stripe(&stripe);
    harness.create_account().await;

    for session_id in ["", "   ", "../customers", "cs_x/../../customers", "cs_x?expand[]=customer"] {
        let (name, value) = harness.user_auth();
        harness
            .server
            .post("/v1/credits/confirm")
            .add_header(name, value)
            .json(&json!({ "session_id": session_id }))
            .await
            .assert_status(StatusCode::BAD_REQUEST);
    }
}
