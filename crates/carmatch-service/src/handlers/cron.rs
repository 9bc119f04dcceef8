//! Scheduled maintenance endpoints.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use chrono::Utc;

use crate::auth::CronAuth;
use crate::error::ApiError;
use crate::state::AppState;
use crate::sweeper::{run_renewal_sweep, SweepReport};

/// Renew or deactivate every expired listing.
pub async fn renew_listings(
    State(state): State<Arc<AppState>>,
    _auth: CronAuth,
) -> Result<Json<SweepReport>, ApiError> {
    let report = run_renewal_sweep(state.store.as_ref(), &state.config.policy, Utc::now()).await?;
    Ok(Json(report))
}
