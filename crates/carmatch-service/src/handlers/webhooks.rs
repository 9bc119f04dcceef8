//! Stripe webhook handler.

use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use chrono::Utc;
use serde::Serialize;

use carmatch_core::PaymentSource;
use carmatch_store::PaymentOutcome;

use crate::error::ApiError;
use crate::reconcile::{reconcile_session, ReconcileError};
use crate::state::AppState;
use crate::stripe::{construct_event, CheckoutSession, StripeError};

/// Events that carry a paid checkout session.
const PAID_SESSION_EVENTS: [&str; 2] = [
    "checkout.session.completed",
    "checkout.session.async_payment_succeeded",
];

/// Webhook response.
#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    /// Whether the webhook was accepted.
    pub received: bool,
    /// What was done with it: `credited`, `already_processed` or `ignored`.
    pub result: &'static str,
}

impl WebhookResponse {
    const fn new(result: &'static str) -> Self {
        Self {
            received: true,
            result,
        }
    }
}

/// Handle Stripe webhooks.
///
/// Every request must carry a valid `Stripe-Signature`. Paid credit-purchase
/// sessions are credited once; everything else is acknowledged and ignored.
pub async fn stripe_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<WebhookResponse>, ApiError> {
    let secret = state.config.stripe_webhook_secret.as_deref().ok_or_else(|| {
        tracing::error!("Stripe webhook received but no webhook secret is configured");
        ApiError::BadRequest("Webhook signing secret not configured".into())
    })?;

    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::BadRequest("Missing Stripe signature".into()))?;

    let event = construct_event(
        secret,
        &body,
        signature,
        Utc::now().timestamp(),
        state.config.stripe_webhook_tolerance_seconds,
    )
    .map_err(|e| match e {
        StripeError::Serialization(e) => ApiError::BadRequest(format!("Invalid event: {e}")),
        e => {
            tracing::warn!(error = %e, "Rejected Stripe webhook signature");
            ApiError::BadRequest("Invalid webhook signature".into())
        }
    })?;

    tracing::info!(event_id = %event.id, event_type = %event.event_type, "Stripe webhook received");

    if !PAID_SESSION_EVENTS.contains(&event.event_type.as_str()) {
        tracing::debug!(event_type = %event.event_type, "Unhandled Stripe event type");
        return Ok(Json(WebhookResponse::new("ignored")));
    }

    let session: CheckoutSession = serde_json::from_value(event.data.object)
        .map_err(|e| ApiError::BadRequest(format!("Invalid checkout session: {e}")))?;

    match reconcile_session(
        state.store.as_ref(),
        &session,
        PaymentSource::Webhook,
        None,
        Utc::now(),
    )
    .await
    {
        Ok(PaymentOutcome::Credited { .. }) => Ok(Json(WebhookResponse::new("credited"))),
        Ok(PaymentOutcome::AlreadyProcessed { .. }) => {
            Ok(Json(WebhookResponse::new("already_processed")))
        }
        Err(ReconcileError::NotPaid(id) | ReconcileError::NotCreditPurchase(id)) => {
            tracing::info!(event_id = %event.id, session_id = %id, "Ignoring checkout session");
            Ok(Json(WebhookResponse::new("ignored")))
        }
        Err(e) => {
            tracing::error!(event_id = %event.id, session_id = %session.id, error = %e, "Failed to credit checkout session");
            Err(e.into())
        }
    }
}
