//! Listing publication handlers.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use carmatch_core::{FreeReason, Listing, ListingId, ListingKind, ListingStatus, NewListing};
use carmatch_store::Store;

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::state::AppState;

/// Longest accepted listing title.
const MAX_TITLE_CHARS: usize = 200;

/// Listing response.
#[derive(Debug, Serialize)]
pub struct ListingResponse {
    /// Listing ID.
    pub id: String,
    /// Owner user ID.
    pub owner_id: String,
    /// Vehicle or business.
    pub kind: ListingKind,
    /// Display title.
    pub title: String,
    /// Active or inactive.
    pub status: ListingStatus,
    /// End of the current period.
    pub expires_at: Option<String>,
    /// Whether the current period is free.
    pub is_free_publication: bool,
    /// Created timestamp.
    pub created_at: String,
}

impl From<&Listing> for ListingResponse {
    fn from(listing: &Listing) -> Self {
        Self {
            id: listing.id.to_string(),
            owner_id: listing.owner_id.to_string(),
            kind: listing.kind,
            title: listing.title.clone(),
            status: listing.status(),
            expires_at: listing.expires_at.map(|at| at.to_rfc3339()),
            is_free_publication: listing.is_free_publication,
            created_at: listing.created_at.to_rfc3339(),
        }
    }
}

/// Publish listing request.
#[derive(Debug, Deserialize)]
pub struct PublishListingRequest {
    /// Vehicle or business.
    pub kind: ListingKind,
    /// Display title.
    pub title: String,
}

/// Result of a publish or status change.
#[derive(Debug, Serialize)]
pub struct ListingChangeResponse {
    /// The listing after the change.
    pub listing: ListingResponse,
    /// Credits debited by this request.
    pub credits_charged: i64,
    /// Why the period is free, when it is.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub free_reason: Option<FreeReason>,
    /// Owner's balance afterwards.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub balance: Option<i64>,
}

/// Publish a new listing.
///
/// A listing the owner cannot pay for is still created, inactive.
pub async fn publish_listing(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(body): Json<PublishListingRequest>,
) -> Result<Json<ListingChangeResponse>, ApiError> {
    let title = body.title.trim();
    if title.is_empty() {
        return Err(ApiError::BadRequest("Title is required".into()));
    }
    if title.chars().count() > MAX_TITLE_CHARS {
        return Err(ApiError::BadRequest(format!(
            "Title must be at most {MAX_TITLE_CHARS} characters"
        )));
    }

    let draft = NewListing {
        owner_id: auth.user_id,
        kind: body.kind,
        title: title.to_string(),
    };
    let outcome = state
        .store
        .publish_listing(draft, &state.config.policy, Utc::now())
        .await?;

    let credits_charged = outcome.entry.as_ref().map_or(0, |e| -e.amount);

    tracing::info!(
        user_id = %auth.user_id,
        listing_id = %outcome.listing.id,
        kind = %outcome.listing.kind,
        active = outcome.listing.is_active,
        free_reason = ?outcome.free_reason,
        credits_charged,
        "Listing published"
    );

    Ok(Json(ListingChangeResponse {
        listing: ListingResponse::from(&outcome.listing),
        credits_charged,
        free_reason: outcome.free_reason,
        balance: Some(outcome.balance),
    }))
}

/// List query parameters.
#[derive(Debug, Deserialize)]
pub struct ListListingsQuery {
    /// Only listings of this kind.
    pub kind: Option<ListingKind>,
}

/// List listings response.
#[derive(Debug, Serialize)]
pub struct ListListingsResponse {
    /// Listings (newest first).
    pub listings: Vec<ListingResponse>,
}

/// List the caller's listings.
pub async fn list_listings(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Query(query): Query<ListListingsQuery>,
) -> Result<Json<ListListingsResponse>, ApiError> {
    let listings = state
        .store
        .list_listings_by_owner(&auth.user_id, query.kind)
        .await?;

    Ok(Json(ListListingsResponse {
        listings: listings.iter().map(ListingResponse::from).collect(),
    }))
}

/// Get one of the caller's listings.
pub async fn get_listing(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<ListingResponse>, ApiError> {
    let listing = owned_listing(state.store.as_ref(), &auth, &id).await?;
    Ok(Json(ListingResponse::from(&listing)))
}

/// Requested status change.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum StatusChange {
    /// Make the listing visible again.
    Activate,
    /// Hide the listing.
    Deactivate,
}

/// Activate or deactivate one of the caller's listings.
pub async fn change_status(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<String>,
    Json(change): Json<StatusChange>,
) -> Result<Json<ListingChangeResponse>, ApiError> {
    let listing = owned_listing(state.store.as_ref(), &auth, &id).await?;
    let now = Utc::now();

    let response = match change {
        StatusChange::Deactivate => {
            let listing = state.store.deactivate_listing(&listing.id, now).await?;
            tracing::info!(user_id = %auth.user_id, listing_id = %listing.id, "Listing deactivated");
            ListingChangeResponse {
                listing: ListingResponse::from(&listing),
                credits_charged: 0,
                free_reason: None,
                balance: None,
            }
        }
        StatusChange::Activate => {
            let outcome = state
                .store
                .reactivate_listing(&listing.id, &state.config.policy, now)
                .await?;
            let credits_charged = outcome.entry.as_ref().map_or(0, |e| -e.amount);
            tracing::info!(
                user_id = %auth.user_id,
                listing_id = %outcome.listing.id,
                credits_charged,
                "Listing activated"
            );
            ListingChangeResponse {
                listing: ListingResponse::from(&outcome.listing),
                credits_charged,
                free_reason: None,
                balance: Some(outcome.balance),
            }
        }
    };

    Ok(Json(response))
}

/// Delete one of the caller's listings. Its ledger entries are kept.
pub async fn delete_listing(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let listing = owned_listing(state.store.as_ref(), &auth, &id).await?;
    state.store.delete_listing(&listing.id).await?;

    tracing::info!(user_id = %auth.user_id, listing_id = %listing.id, "Listing deleted");

    Ok(Json(serde_json::json!({ "deleted": true })))
}

/// Load a listing and check that the caller owns it.
async fn owned_listing(store: &dyn Store, auth: &AuthUser, id: &str) -> Result<Listing, ApiError> {
    let listing_id = id
        .parse::<ListingId>()
        .map_err(|_| ApiError::BadRequest("Invalid listing ID".into()))?;

    let listing = store
        .get_listing(&listing_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Listing not found".into()))?;

    if listing.owner_id != auth.user_id {
        tracing::warn!(
            user_id = %auth.user_id,
            listing_id = %listing_id,
            "Listing access by non-owner"
        );
        return Err(ApiError::Forbidden);
    }

    Ok(listing)
}
