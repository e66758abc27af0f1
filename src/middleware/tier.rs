// SPDX-License-Identifier: MIT

//! Tier-gating middleware.
//!
//! Applied per route group after `require_auth`, so the authenticated user
//! is already in the request extensions. Responds 403 `tier_required` when
//! the user's effective tier is below the route's minimum.

use crate::error::AppError;
use crate::middleware::auth::AuthUser;
use crate::models::Tier;
use crate::AppState;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

/// Routes that need at least the Basic tier.
pub async fn require_basic(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let user_id = auth_user_id(&request)?;
    check_tier(&state, &user_id, Tier::Basic).await?;
    Ok(next.run(request).await)
}

/// Routes that need at least the Premium tier.
pub async fn require_premium(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let user_id = auth_user_id(&request)?;
    check_tier(&state, &user_id, Tier::Premium).await?;
    Ok(next.run(request).await)
}

/// Pull the authenticated user id out of the request extensions.
fn auth_user_id(request: &Request) -> Result<String, AppError> {
    Ok(request
        .extensions()
        .get::<AuthUser>()
        .ok_or(AppError::Unauthorized)?
        .user_id
        .clone())
}

async fn check_tier(state: &AppState, user_id: &str, min: Tier) -> Result<(), AppError> {
    let tier = state.tier_service.effective_tier(user_id).await?;

    if tier < min {
        tracing::debug!(
            user_id = %user_id,
            tier = %tier.as_str(),
            required = %min.as_str(),
            "Tier gate rejected request"
        );
        return Err(AppError::TierRequired(min.as_str()));
    }

    Ok(())
}
