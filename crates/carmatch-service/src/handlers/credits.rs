//! Credit balance, ledger and purchase handlers.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use carmatch_core::{LedgerEntry, PaymentSource, UserId};
use carmatch_store::PaymentOutcome;

use crate::auth::{AdminAuth, AuthUser};
use crate::error::ApiError;
use crate::reconcile::reconcile_session;
use crate::state::AppState;
use crate::stripe::{is_checkout_session_id, CreditCheckout};

/// Largest ledger page.
const MAX_LEDGER_PAGE: usize = 100;

/// Balance response.
#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    /// Balance in credits.
    pub credit_balance: i64,
}

/// Get current credit balance.
pub async fn get_balance(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<BalanceResponse>, ApiError> {
    let account = state
        .store
        .get_account(&auth.user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Account not found".into()))?;

    Ok(Json(BalanceResponse {
        credit_balance: account.credit_balance,
    }))
}

/// Ledger query parameters.
#[derive(Debug, Deserialize)]
pub struct LedgerQuery {
    /// Maximum number of entries to return (default: 50, max: 100).
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// Offset for pagination (default: 0).
    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    50
}

/// Ledger entry response.
#[derive(Debug, Serialize)]
pub struct LedgerEntryResponse {
    /// Entry ID.
    pub id: String,
    /// Signed amount in credits.
    pub amount: i64,
    /// Entry kind.
    pub kind: String,
    /// Balance after this entry.
    pub balance_after: i64,
    /// Description.
    pub description: String,
    /// Listing paid for, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub listing_id: Option<String>,
    /// Payment provider transaction, for purchases.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_transaction_id: Option<String>,
    /// Timestamp.
    pub created_at: String,
}

impl From<&LedgerEntry> for LedgerEntryResponse {
    fn from(entry: &LedgerEntry) -> Self {
        Self {
            id: entry.id.to_string(),
            amount: entry.amount,
            kind: entry.kind.as_str().to_string(),
            balance_after: entry.balance_after,
            description: entry.description.clone(),
            listing_id: entry.listing_id.map(|id| id.to_string()),
            external_transaction_id: entry.external_transaction_id.clone(),
            created_at: entry.created_at.to_rfc3339(),
        }
    }
}

/// Ledger page response.
#[derive(Debug, Serialize)]
pub struct LedgerResponse {
    /// Entries (newest first).
    pub entries: Vec<LedgerEntryResponse>,
    /// Whether there are more entries.
    pub has_more: bool,
}

/// List ledger history.
pub async fn list_ledger(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Query(query): Query<LedgerQuery>,
) -> Result<Json<LedgerResponse>, ApiError> {
    state
        .store
        .get_account(&auth.user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Account not found".into()))?;

    // Fetch one more than requested to determine has_more
    let limit = query.limit.clamp(1, MAX_LEDGER_PAGE);
    let entries = state
        .store
        .list_ledger_entries(&auth.user_id, limit + 1, query.offset)
        .await?;

    let has_more = entries.len() > limit;
    let entries = entries
        .iter()
        .take(limit)
        .map(LedgerEntryResponse::from)
        .collect();

    Ok(Json(LedgerResponse { entries, has_more }))
}

/// Balance versus ledger comparison.
#[derive(Debug, Serialize)]
pub struct ReconcileResponse {
    /// Stored balance.
    pub credit_balance: i64,
    /// Sum of all ledger amounts.
    pub ledger_total: i64,
    /// Whether the two agree.
    pub consistent: bool,
}

/// Compare the stored balance with the ledger sum.
pub async fn reconcile_check(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<ReconcileResponse>, ApiError> {
    let account = state
        .store
        .get_account(&auth.user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Account not found".into()))?;
    let ledger_total = state.store.ledger_total(&auth.user_id).await?;
    let consistent = ledger_total == account.credit_balance;

    if !consistent {
        tracing::error!(
            user_id = %auth.user_id,
            credit_balance = account.credit_balance,
            ledger_total,
            "Balance does not match ledger"
        );
    }

    Ok(Json(ReconcileResponse {
        credit_balance: account.credit_balance,
        ledger_total,
        consistent,
    }))
}

/// Checkout request.
#[derive(Debug, Deserialize)]
pub struct CheckoutRequest {
    /// Number of credits to buy.
    pub credits: i64,
}

/// Checkout response.
#[derive(Debug, Serialize)]
pub struct CheckoutResponse {
    /// Stripe checkout session URL.
    pub checkout_url: String,
    /// Session ID, passed back to confirm.
    pub session_id: String,
    /// Credits being bought.
    pub credits: i64,
    /// Total price in cents.
    pub amount_cents: i64,
}

/// Start a credit purchase via Stripe Checkout.
pub async fn create_checkout(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(body): Json<CheckoutRequest>,
) -> Result<Json<CheckoutResponse>, ApiError> {
    let max = state.config.max_credits_per_purchase;
    if !(1..=max).contains(&body.credits) {
        return Err(ApiError::BadRequest(format!(
            "Credits must be between 1 and {max}"
        )));
    }

    let stripe = state.stripe()?;

    let account = state
        .store
        .get_account(&auth.user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Account not found".into()))?;

    let unit_amount_cents = state.config.credit_price_cents;
    let amount_cents = unit_amount_cents * body.credits;
    let user_id = auth.user_id.to_string();
    let success_url = format!(
        "{}/credits/success?session_id={{CHECKOUT_SESSION_ID}}",
        state.config.frontend_url
    );
    let cancel_url = format!("{}/credits/cancel", state.config.frontend_url);

    let session = stripe
        .create_checkout_session(&CreditCheckout {
            user_id: &user_id,
            customer_email: account.email.as_deref(),
            credits: body.credits,
            unit_amount_cents,
            success_url: &success_url,
            cancel_url: &cancel_url,
        })
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to create Stripe checkout session");
            ApiError::ExternalService(format!("Failed to create checkout session: {e}"))
        })?;

    let checkout_url = session
        .url
        .ok_or_else(|| ApiError::ExternalService("Stripe returned no checkout URL".into()))?;

    tracing::info!(
        user_id = %auth.user_id,
        session_id = %session.id,
        credits = body.credits,
        amount_cents,
        "Stripe checkout session created"
    );

    Ok(Json(CheckoutResponse {
        checkout_url,
        session_id: session.id,
        credits: body.credits,
        amount_cents,
    }))
}

/// Client-side confirmation request.
#[derive(Debug, Deserialize)]
pub struct ConfirmRequest {
    /// Checkout session ID from the success redirect.
    pub session_id: String,
}

/// Payment confirmation response.
#[derive(Debug, Serialize)]
pub struct PaymentResponse {
    /// `credited` or `already_processed`.
    pub status: &'static str,
    /// Credits bought in this payment.
    pub credits: i64,
    /// Current balance.
    pub credit_balance: i64,
}

/// Confirm a checkout from the success page.
///
/// Redundant with the webhook; whichever arrives first credits the account.
pub async fn confirm_payment(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(body): Json<ConfirmRequest>,
) -> Result<Json<PaymentResponse>, ApiError> {
    let session_id = body.session_id.trim();
    if !is_checkout_session_id(session_id) {
        return Err(ApiError::BadRequest("Invalid checkout session id".into()));
    }

    let session = state
        .stripe()?
        .get_checkout_session(session_id)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, session_id = %session_id, "Failed to fetch checkout session");
            ApiError::ExternalService(format!("Failed to fetch checkout session: {e}"))
        })?;

    let outcome = reconcile_session(
        state.store.as_ref(),
        &session,
        PaymentSource::ClientConfirm,
        Some(&auth.user_id),
        Utc::now(),
    )
    .await?;

    let (status, credit_balance) = match &outcome {
        PaymentOutcome::Credited { balance, .. } => ("credited", *balance),
        PaymentOutcome::AlreadyProcessed { .. } => {
            let account = state
                .store
                .get_account(&auth.user_id)
                .await?
                .ok_or_else(|| ApiError::NotFound("Account not found".into()))?;
            ("already_processed", account.credit_balance)
        }
    };

    Ok(Json(PaymentResponse {
        status,
        credits: outcome.payment().credits,
        credit_balance,
    }))
}

/// Admin credit adjustment request.
#[derive(Debug, Deserialize)]
pub struct AdjustCreditsRequest {
    /// User to adjust.
    pub user_id: String,
    /// Signed amount in credits.
    pub amount: i64,
    /// Reason, recorded on the ledger entry.
    pub reason: String,
}

/// Add or remove credits as an administrator.
pub async fn adjust_credits(
    State(state): State<Arc<AppState>>,
    admin: AdminAuth,
    Json(body): Json<AdjustCreditsRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let user_id = body
        .user_id
        .parse::<UserId>()
        .map_err(|_| ApiError::BadRequest("Invalid user ID".into()))?;

    let reason = body.reason.trim();
    if reason.is_empty() {
        return Err(ApiError::BadRequest("Reason is required".into()));
    }

    let (entry, balance) = state
        .store
        .adjust_credits(&user_id, body.amount, reason, Utc::now())
        .await?;

    tracing::info!(
        admin_id = %admin.admin_id,
        user_id = %user_id,
        amount = body.amount,
        reason = %reason,
        new_balance = balance,
        "Credits adjusted"
    );

    Ok(Json(serde_json::json!({
        "credit_balance": balance,
        "entry_id": entry.id.to_string()
    })))
}
