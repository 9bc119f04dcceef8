//! Account management handlers.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use carmatch_core::Account;

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::state::AppState;

/// Account response.
#[derive(Debug, Serialize)]
pub struct AccountResponse {
    /// User ID.
    pub user_id: String,
    /// Email, when known.
    pub email: Option<String>,
    /// Current balance in credits.
    pub credit_balance: i64,
    /// Whether listings are published for free as an administrator.
    pub is_admin: bool,
    /// Created timestamp.
    pub created_at: String,
}

impl From<&Account> for AccountResponse {
    fn from(account: &Account) -> Self {
        Self {
            user_id: account.user_id.to_string(),
            email: account.email.clone(),
            credit_balance: account.credit_balance,
            is_admin: account.is_admin,
            created_at: account.created_at.to_rfc3339(),
        }
    }
}

/// Create account request.
#[derive(Debug, Default, Deserialize)]
pub struct CreateAccountRequest {
    /// Email; falls back to the token's email claim.
    #[serde(default)]
    pub email: Option<String>,
}

/// Register the caller's account with a zero balance.
pub async fn create_account(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(body): Json<CreateAccountRequest>,
) -> Result<Json<AccountResponse>, ApiError> {
    let email = body
        .email
        .or(auth.email)
        .map(|e| e.trim().to_string())
        .filter(|e| !e.is_empty());
    let is_admin = email
        .as_deref()
        .is_some_and(|e| state.config.is_admin_email(e));

    let account = Account::new(auth.user_id, email, Utc::now()).with_admin(is_admin);
    state.store.create_account(&account).await?;

    tracing::info!(user_id = %auth.user_id, is_admin, "Account created");

    Ok(Json(AccountResponse::from(&account)))
}

/// Get the current user's account.
pub async fn get_account(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<AccountResponse>, ApiError> {
    let account = state
        .store
        .get_account(&auth.user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Account not found".into()))?;

    Ok(Json(AccountResponse::from(&account)))
}
