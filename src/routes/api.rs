// SPDX-License-Identifier: MIT

//! API routes for authenticated users.

use crate::error::{AppError, Result};
use crate::middleware::auth::AuthUser;
use crate::models::{AchievementKind, Platform, Tier};
use crate::services::gamification::LeaderboardEntry;
use crate::services::social::AccountInsights;
use crate::AppState;
use axum::{
    extract::{Path, Query, State},
    routing::{delete, get, post},
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;
use validator::Validate;

/// API routes (require authentication via JWT).
/// The auth middleware is applied in routes/mod.rs for these routes.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/me", get(get_me))
        .route("/api/accounts", get(get_accounts))
        .route("/api/accounts/{platform}", delete(disconnect_account))
        .route("/api/posts", post(create_post).get(get_posts))
        .route("/api/streak", get(get_streak))
        .route("/api/achievements", get(get_achievements))
        .route("/api/leaderboard", get(get_leaderboard))
        .route("/api/subscription", get(get_subscription))
        .route("/api/subscription/wallet", post(link_wallet))
        .route("/api/account", delete(delete_account))
}

/// Routes additionally gated on the Premium tier (layered in routes/mod.rs).
pub fn premium_routes() -> Router<Arc<AppState>> {
    Router::new().route("/api/accounts/{platform}/insights", get(get_insights))
}

// ─── User Profile ────────────────────────────────────────────

/// Current user response.
#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct UserResponse {
    pub user_id: String,
    pub email: String,
    pub display_name: String,
    pub picture: Option<String>,
    pub deletion_requested_at: Option<String>,
}

/// Get current user profile.
async fn get_me(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<UserResponse>> {
    let profile = state
        .db
        .get_user(&user.user_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("User {} not found", user.user_id)))?;

    Ok(Json(UserResponse {
        user_id: profile.user_id,
        email: profile.email,
        display_name: profile.display_name,
        picture: profile.picture,
        deletion_requested_at: profile.deletion_requested_at,
    }))
}

// ─── Connected Accounts ──────────────────────────────────────

/// One connected platform account.
#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct AccountResponse {
    #[cfg_attr(feature = "binding-generation", ts(type = "string"))]
    pub platform: Platform,
    pub platform_username: Option<String>,
    pub connected_at: String,
    pub expires_at: String,
    pub scopes: Vec<String>,
}

/// List the user's connected platform accounts.
async fn get_accounts(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<Vec<AccountResponse>>> {
    let accounts = state
        .db
        .list_platform_tokens(&user.user_id)
        .await?
        .into_iter()
        .map(|tokens| AccountResponse {
            platform: tokens.platform,
            platform_username: tokens.platform_username,
            connected_at: tokens.connected_at,
            expires_at: tokens.expires_at,
            scopes: tokens.scopes,
        })
        .collect();

    Ok(Json(accounts))
}

/// Disconnect a platform account (revokes upstream where supported).
async fn disconnect_account(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(platform): Path<String>,
) -> Result<Json<serde_json::Value>> {
    let platform = Platform::parse(&platform)
        .ok_or_else(|| AppError::BadRequest(format!("Unknown platform: {}", platform)))?;

    state.social_service.disconnect(&user.user_id, platform).await?;

    Ok(Json(serde_json::json!({ "disconnected": platform })))
}

/// Account insights for one platform (Premium; served from cache).
async fn get_insights(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(platform): Path<String>,
) -> Result<Json<AccountInsights>> {
    let platform = Platform::parse(&platform)
        .ok_or_else(|| AppError::BadRequest(format!("Unknown platform: {}", platform)))?;

    let insights = state
        .social_service
        .account_insights(&user.user_id, platform)
        .await?;

    Ok(Json(insights))
}

// ─── Posts ───────────────────────────────────────────────────

/// Request body for publishing a post.
#[derive(Deserialize, Validate)]
pub struct PublishRequest {
    pub platform: Platform,
    #[validate(length(min = 1, max = 5000, message = "text must be 1-5000 characters"))]
    pub text: String,
}

/// Response for a published post.
#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct PublishResponse {
    pub post_id: String,
    #[cfg_attr(feature = "binding-generation", ts(type = "string"))]
    pub platform: Platform,
    pub platform_post_id: String,
    /// Achievements unlocked by this post
    #[cfg_attr(feature = "binding-generation", ts(type = "string[]"))]
    pub unlocked: Vec<AchievementKind>,
}

/// Publish a post. Consumes one daily post credit for the user's tier.
async fn create_post(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(body): Json<PublishRequest>,
) -> Result<Json<PublishResponse>> {
    body.validate()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    // Quota check + increment happens before the upstream call so a
    // publish failure doesn't leave a free retry loop open.
    state.tier_service.consume_post_credit(&user.user_id).await?;

    let result = state
        .publisher
        .publish_post(&user.user_id, body.platform, &body.text)
        .await?;

    Ok(Json(PublishResponse {
        post_id: result.post.post_id,
        platform: result.post.platform,
        platform_post_id: result.post.platform_post_id,
        unlocked: result.unlocked,
    }))
}

#[derive(Deserialize)]
struct PostsQuery {
    /// Pagination: page number (1-indexed)
    #[serde(default = "default_page")]
    page: u32,
    /// Pagination: items per page
    #[serde(default = "default_per_page")]
    per_page: u32,
}

fn default_page() -> u32 {
    1
}
fn default_per_page() -> u32 {
    50
}

const MAX_PER_PAGE: u32 = 100;

/// Stored post in API responses.
#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct PostResponse {
    pub post_id: String,
    #[cfg_attr(feature = "binding-generation", ts(type = "string"))]
    pub platform: Platform,
    pub platform_post_id: String,
    pub text: String,
    pub created_at: String,
}

/// Post history, newest first.
async fn get_posts(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Query(query): Query<PostsQuery>,
) -> Result<Json<Vec<PostResponse>>> {
    if query.page == 0 {
        return Err(AppError::BadRequest("page must be >= 1".to_string()));
    }

    let per_page = query.per_page.min(MAX_PER_PAGE);
    let offset = (query.page - 1) * per_page;

    let posts = state
        .db
        .get_posts_for_user(&user.user_id, per_page, offset)
        .await?
        .into_iter()
        .map(|post| PostResponse {
            post_id: post.post_id,
            platform: post.platform,
            platform_post_id: post.platform_post_id,
            text: post.text,
            created_at: post.created_at,
        })
        .collect();

    Ok(Json(posts))
}

// ─── Gamification ────────────────────────────────────────────

/// Streak state for the dashboard.
#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct StreakResponse {
    pub current_streak: u32,
    pub longest_streak: u32,
    pub last_post_day: String,
    pub total_posts: u32,
}

/// Get the user's streak.
async fn get_streak(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<StreakResponse>> {
    let streak = state.gamification.streak(&user.user_id).await?;

    Ok(Json(StreakResponse {
        current_streak: streak.current_streak,
        longest_streak: streak.longest_streak,
        last_post_day: streak.last_post_day,
        total_posts: streak.total_posts,
    }))
}

/// An unlocked achievement.
#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct AchievementResponse {
    #[cfg_attr(feature = "binding-generation", ts(type = "string"))]
    pub kind: AchievementKind,
    pub unlocked_at: String,
}

/// List the user's achievements.
async fn get_achievements(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<Vec<AchievementResponse>>> {
    let achievements = state
        .gamification
        .achievements(&user.user_id)
        .await?
        .into_iter()
        .map(|a| AchievementResponse {
            kind: a.kind,
            unlocked_at: a.unlocked_at,
        })
        .collect();

    Ok(Json(achievements))
}

#[derive(Deserialize)]
struct LeaderboardQuery {
    #[serde(default = "default_leaderboard_limit")]
    limit: u32,
}

fn default_leaderboard_limit() -> u32 {
    10
}

const MAX_LEADERBOARD_LIMIT: u32 = 50;

/// Top streaks across all users.
async fn get_leaderboard(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LeaderboardQuery>,
) -> Result<Json<Vec<LeaderboardEntry>>> {
    let limit = query.limit.clamp(1, MAX_LEADERBOARD_LIMIT);
    let entries = state.gamification.leaderboard(limit).await?;
    Ok(Json(entries))
}

// ─── Subscription ────────────────────────────────────────────

/// Subscription status including remaining daily quota.
#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct SubscriptionResponse {
    #[cfg_attr(feature = "binding-generation", ts(type = "string"))]
    pub tier: Tier,
    #[cfg_attr(feature = "binding-generation", ts(type = "string"))]
    pub paid_tier: Tier,
    #[cfg_attr(feature = "binding-generation", ts(type = "string"))]
    pub token_tier: Tier,
    pub wallet_address: Option<String>,
    pub posts_today: u32,
    /// None means unlimited
    pub daily_post_limit: Option<u32>,
    pub research_today: u32,
    /// None means unlimited
    pub daily_research_limit: Option<u32>,
}

/// Get the user's subscription and usage state.
async fn get_subscription(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<SubscriptionResponse>> {
    let mut sub = state
        .tier_service
        .effective_subscription(&user.user_id)
        .await?;
    let tier = sub.effective_tier(chrono::Utc::now());

    // Report today's counters even if nothing has been consumed yet
    sub.rollover(&crate::time_utils::utc_today_string());

    Ok(Json(SubscriptionResponse {
        tier,
        paid_tier: sub.paid_tier,
        token_tier: sub.token_tier,
        wallet_address: sub.wallet_address,
        posts_today: sub.posts_today,
        daily_post_limit: tier.daily_post_limit(),
        research_today: sub.research_today,
        daily_research_limit: tier.daily_research_limit(),
    }))
}

/// Request body for linking a wallet.
#[derive(Deserialize, Validate)]
pub struct LinkWalletRequest {
    /// Base58 Solana address
    #[validate(length(min = 32, max = 44, message = "wallet must be a base58 address"))]
    pub wallet: String,
}

/// Link a Solana wallet to the subscription for token-gated tiers.
async fn link_wallet(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(body): Json<LinkWalletRequest>,
) -> Result<Json<SubscriptionResponse>> {
    body.validate()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    let sub = state
        .tier_service
        .link_wallet(&user.user_id, &body.wallet)
        .await?;
    let tier = sub.effective_tier(chrono::Utc::now());

    Ok(Json(SubscriptionResponse {
        tier,
        paid_tier: sub.paid_tier,
        token_tier: sub.token_tier,
        wallet_address: sub.wallet_address,
        posts_today: sub.posts_today,
        daily_post_limit: tier.daily_post_limit(),
        research_today: sub.research_today,
        daily_research_limit: tier.daily_research_limit(),
    }))
}

// ─── Account Deletion ────────────────────────────────────────

/// Response for account deletion.
#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct DeleteAccountResponse {
    pub success: bool,
    pub message: String,
}

/// Delete the user's account and all associated data (GDPR compliance).
///
/// Steps:
/// 1. Mark the profile as pending deletion (for UI feedback)
/// 2. Disconnect all platforms (revokes + deletes tokens first, which
///    blocks concurrent publishing)
/// 3. Delete all user data from Firestore
async fn delete_account(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<DeleteAccountResponse>> {
    tracing::info!(user_id = %user.user_id, "User-initiated account deletion");

    // Mark user as pending deletion. Fetch-modify-write preserves fields.
    if let Some(mut profile) = state.db.get_user(&user.user_id).await? {
        profile.deletion_requested_at = Some(chrono::Utc::now().to_rfc3339());
        state.db.upsert_user(&profile).await?;
    } else {
        // User already gone? Rare but possible; continue so tokens get
        // cleaned up regardless.
        tracing::warn!(user_id = %user.user_id, "User profile not found during deletion request");
    }

    state.social_service.disconnect_all(&user.user_id).await?;
    let deleted = state.db.delete_user_data(&user.user_id).await?;

    tracing::info!(user_id = %user.user_id, deleted, "Account deletion complete");

    Ok(Json(DeleteAccountResponse {
        success: true,
        message: "Account deleted. All data has been removed.".to_string(),
    }))
}
