//! Stripe API client implementation.

use std::time::Duration;

use reqwest::Client;

use super::types::{
    is_checkout_session_id, CheckoutSession, CreditCheckout, StripeErrorResponse, WebhookEvent,
    PURCHASE_TYPE_CREDITS,
};
use crate::config::DEFAULT_STRIPE_API_BASE;
use crate::crypto::verify_hmac_sha256_hex;

/// Error type for Stripe operations.
#[derive(Debug, thiserror::Error)]
pub enum StripeError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Stripe API returned an error.
    #[error("Stripe API error: {error_type} - {message}")]
    Api {
        /// Error type.
        error_type: String,
        /// Error message.
        message: String,
        /// Error code.
        code: Option<String>,
    },

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Missing, malformed or mismatching webhook signature.
    #[error("Invalid webhook signature")]
    InvalidSignature,

    /// Not a Checkout session id.
    #[error("Invalid checkout session id: {0}")]
    InvalidSessionId(String),

    /// Signature timestamp outside the accepted window.
    #[error("Webhook timestamp outside tolerance")]
    TimestampOutOfTolerance,
}

/// Stripe API client.
#[derive(Debug, Clone)]
pub struct StripeClient {
    client: Client,
    api_key: String,
    base_url: String,
}

impl StripeClient {
    /// Create a new Stripe client.
    ///
    /// # Arguments
    ///
    /// * `api_key` - Stripe secret API key (`sk_test_...` or `sk_live_...`)
    pub fn new(api_key: impl Into<String>) -> Result<Self, StripeError> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;

        Ok(Self {
            client,
            api_key: api_key.into(),
            base_url: DEFAULT_STRIPE_API_BASE.to_string(),
        })
    }

    /// Point the client at another API base (a mock server in tests).
    #[must_use]
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    /// Create a Checkout session for purchasing credits.
    ///
    /// The session metadata carries `user_id`, `credits` and
    /// `purchase_type=credits`; reconciliation reads them back.
    pub async fn create_checkout_session(
        &self,
        checkout: &CreditCheckout<'_>,
    ) -> Result<CheckoutSession, StripeError> {
        let mut params = vec![
            ("mode", "payment".to_string()),
            ("success_url", checkout.success_url.to_string()),
            ("cancel_url", checkout.cancel_url.to_string()),
            ("client_reference_id", checkout.user_id.to_string()),
            ("line_items[0][price_data][currency]", "usd".to_string()),
            (
                "line_items[0][price_data][product_data][name]",
                "CarMatch credits".to_string(),
            ),
            (
                "line_items[0][price_data][unit_amount]",
                checkout.unit_amount_cents.to_string(),
            ),
            ("line_items[0][quantity]", checkout.credits.to_string()),
            ("metadata[user_id]", checkout.user_id.to_string()),
            ("metadata[credits]", checkout.credits.to_string()),
            ("metadata[purchase_type]", PURCHASE_TYPE_CREDITS.to_string()),
        ];

        if let Some(email) = checkout.customer_email {
            params.push(("customer_email", email.to_string()));
        }

        tracing::debug!(
            user_id = %checkout.user_id,
            credits = checkout.credits,
            unit_amount_cents = checkout.unit_amount_cents,
            "Creating Stripe checkout session"
        );

        let response = self
            .client
            .post(format!("{}/checkout/sessions", self.base_url))
            .basic_auth(&self.api_key, Option::<&str>::None)
            .form(&params)
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Retrieve a Checkout session by ID.
    pub async fn get_checkout_session(
        &self,
        session_id: &str,
    ) -> Result<CheckoutSession, StripeError> {
        if !is_checkout_session_id(session_id) {
            return Err(StripeError::InvalidSessionId(session_id.to_string()));
        }

        let response = self
            .client
            .get(format!("{}/checkout/sessions/{}", self.base_url, session_id))
            .basic_auth(&self.api_key, Option::<&str>::None)
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Handle API response and convert errors.
    async fn handle_response<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, StripeError> {
        let status = response.status();

        if status.is_success() {
            return Ok(response.json().await?);
        }

        match response.json::<StripeErrorResponse>().await {
            Ok(stripe_error) => Err(StripeError::Api {
                error_type: stripe_error.error.error_type,
                message: stripe_error.error.message,
                code: stripe_error.error.code,
            }),
            Err(_) => Err(StripeError::Api {
                error_type: "unknown".to_string(),
                message: format!("HTTP {status}"),
                code: None,
            }),
        }
    }
}

/// Parsed `Stripe-Signature` header.
#[derive(Debug, PartialEq, Eq)]
struct SignatureHeader<'a> {
    timestamp: i64,
    signatures: Vec<&'a str>,
}

fn parse_signature_header(header: &str) -> Result<SignatureHeader<'_>, StripeError> {
    let mut timestamp = None;
    let mut signatures = Vec::new();

    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", ts)) => {
                timestamp = Some(ts.parse().map_err(|_| StripeError::InvalidSignature)?);
            }
            Some(("v1", sig)) => signatures.push(sig),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(StripeError::InvalidSignature)?;
    if signatures.is_empty() {
        return Err(StripeError::InvalidSignature);
    }

    Ok(SignatureHeader {
        timestamp,
        signatures,
    })
}

/// Verify a `Stripe-Signature` header against the raw payload.
///
/// The header has the form `t=timestamp,v1=signature[,v1=...]`. The signed
/// message is `"{t}.{payload}"`. Any matching `v1` entry is accepted, and
/// `t` must be within `tolerance_seconds` of `now_unix`.
pub fn verify_signature(
    secret: &str,
    payload: &str,
    header: &str,
    now_unix: i64,
    tolerance_seconds: i64,
) -> Result<(), StripeError> {
    let parsed = parse_signature_header(header)?;

    if now_unix.abs_diff(parsed.timestamp) > tolerance_seconds.unsigned_abs() {
        return Err(StripeError::TimestampOutOfTolerance);
    }

    let signed_payload = format!("{}.{payload}", parsed.timestamp);
    if parsed
        .signatures
        .iter()
        .any(|sig| verify_hmac_sha256_hex(secret, &signed_payload, sig))
    {
        Ok(())
    } else {
        Err(StripeError::InvalidSignature)
    }
}

/// Verify the signature and parse the event.
pub fn construct_event(
    secret: &str,
    payload: &str,
    header: &str,
    now_unix: i64,
    tolerance_seconds: i64,
) -> Result<WebhookEvent, StripeError> {
    verify_signature(secret, payload, header, now_unix, tolerance_seconds)?;
    Ok(serde_json::from_str(payload)?)
}
