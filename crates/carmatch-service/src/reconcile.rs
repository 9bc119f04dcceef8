//! Payment reconciliation.
//!
//! Turns a Stripe Checkout session into a credited payment. Both the webhook
//! and the client confirm call end here; the session id is the idempotency
//! key, so whichever arrives second is reported as already processed.

use chrono::{DateTime, Utc};

use carmatch_core::{PaymentCredit, PaymentSource, UserId};
use carmatch_store::{PaymentOutcome, Store, StoreError};

use crate::error::ApiError;
use crate::stripe::{CheckoutSession, PURCHASE_TYPE_CREDITS};

/// Why a session could not be credited.
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    /// Stripe does not report the session as paid.
    #[error("checkout session {0} is not paid")]
    NotPaid(String),

    /// The session is not a credit purchase.
    #[error("checkout session {0} is not a credit purchase")]
    NotCreditPurchase(String),

    /// `user_id` or `credits` metadata is missing or malformed.
    #[error("invalid checkout metadata: {0}")]
    InvalidMetadata(String),

    /// The session belongs to another user.
    #[error("checkout session belongs to another user")]
    UserMismatch,

    /// Crediting failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<ReconcileError> for ApiError {
    fn from(err: ReconcileError) -> Self {
        match err {
            ReconcileError::NotPaid(_)
            | ReconcileError::NotCreditPurchase(_)
            | ReconcileError::InvalidMetadata(_) => Self::BadRequest(err.to_string()),
            ReconcileError::UserMismatch => Self::Forbidden,
            ReconcileError::Store(e) => e.into(),
        }
    }
}

/// Extract the payment to credit from a paid credit-purchase session.
pub fn payment_credit(
    session: &CheckoutSession,
    source: PaymentSource,
) -> Result<PaymentCredit, ReconcileError> {
    if !session.is_paid() {
        return Err(ReconcileError::NotPaid(session.id.clone()));
    }

    if session.metadata_value("purchase_type") != Some(PURCHASE_TYPE_CREDITS) {
        return Err(ReconcileError::NotCreditPurchase(session.id.clone()));
    }

    let user_id = session
        .metadata_value("user_id")
        .ok_or_else(|| ReconcileError::InvalidMetadata("missing user_id".into()))?
        .parse::<UserId>()
        .map_err(|_| ReconcileError::InvalidMetadata("user_id is not a valid id".into()))?;

    let credits = session
        .metadata_value("credits")
        .ok_or_else(|| ReconcileError::InvalidMetadata("missing credits".into()))?
        .trim()
        .parse::<i64>()
        .ok()
        .filter(|c| *c > 0)
        .ok_or_else(|| ReconcileError::InvalidMetadata("credits must be a positive integer".into()))?;

    Ok(PaymentCredit {
        external_transaction_id: session.id.clone(),
        user_id,
        credits,
        amount_paid_cents: session.amount_total,
        currency: session.currency.clone(),
        source,
    })
}

/// Credit a session exactly once.
///
/// When `expected_user` is set the session must belong to that user.
pub async fn reconcile_session(
    store: &dyn Store,
    session: &CheckoutSession,
    source: PaymentSource,
    expected_user: Option<&UserId>,
    now: DateTime<Utc>,
) -> Result<PaymentOutcome, ReconcileError> {
    let credit = payment_credit(session, source)?;

    if expected_user.is_some_and(|user| *user != credit.user_id) {
        tracing::warn!(
            session_id = %session.id,
            owner = %credit.user_id,
            "Checkout confirm by a different user"
        );
        return Err(ReconcileError::UserMismatch);
    }

    let outcome = store.record_payment(&credit, now).await?;

    match &outcome {
        PaymentOutcome::Credited { balance, .. } => tracing::info!(
            session_id = %session.id,
            user_id = %credit.user_id,
            credits = credit.credits,
            source = %source,
            new_balance = balance,
            "Payment credited"
        ),
        PaymentOutcome::AlreadyProcessed { .. } => tracing::info!(
            session_id = %session.id,
            user_id = %credit.user_id,
            source = %source,
            "Payment already processed"
        ),
    }

    Ok(outcome)
}
