// SPDX-License-Identifier: MIT

//! Firestore client wrapper with typed operations.
//!
//! Provides high-level operations for:
//! - Users (profile storage)
//! - Platform tokens (encrypted OAuth credentials per platform)
//! - Posts (published post history)
//! - Streaks and achievements (gamification aggregates)
//! - Subscriptions (tier + usage state)

use crate::db::collections;
use crate::error::AppError;
use crate::models::{
    Achievement, AchievementKind, Platform, PlatformTokens, Post, Tier, User, UserStreak,
    UserSubscription,
};

// Firestore limits batch/transaction writes to 500 operations.
// We use a safe limit of 400 to allow headroom.
const BATCH_SIZE: usize = 400;

/// Firestore database client.
#[derive(Clone)]
pub struct FirestoreDb {
    client: Option<firestore::FirestoreDb>,
}

impl FirestoreDb {
    /// Create a new Firestore client.
    ///
    /// For local development with emulator, set FIRESTORE_EMULATOR_HOST.
    pub async fn new(project_id: &str) -> Result<Self, AppError> {
        // If the emulator environment variable is set, use unauthenticated
        // connection to avoid local credential warnings and leakage.
        if std::env::var("FIRESTORE_EMULATOR_HOST").is_ok() {
            return Self::create_emulator_client(project_id).await;
        }

        let client = firestore::FirestoreDb::new(project_id)
            .await
            .map_err(|e| AppError::Database(format!("Failed to connect to Firestore: {}", e)))?;

        tracing::info!(project = project_id, "Connected to Firestore");

        Ok(Self {
            client: Some(client),
        })
    }

    /// Create a Firestore client for the emulator with unauthenticated access.
    async fn create_emulator_client(project_id: &str) -> Result<Self, AppError> {
        tracing::info!("Using unauthenticated connection for Firestore Emulator");

        let token_source = gcloud_sdk::ExternalJwtFunctionSource::new(|| async {
            Ok(gcloud_sdk::Token {
                token_type: "Bearer".to_string(),
                token: gcloud_sdk::SecretValue::new(
                    "eyJhbGciOiJub25lIn0.eyJ1aWQiOiJ0ZXN0In0."
                        .to_string()
                        .into(),
                ),
                expiry: chrono::Utc::now() + chrono::Duration::hours(1),
            })
        });

        let options = firestore::FirestoreDbOptions::new(project_id.to_string());

        let client = firestore::FirestoreDb::with_options_token_source(
            options,
            gcloud_sdk::GCP_DEFAULT_SCOPES.clone(),
            gcloud_sdk::TokenSourceType::ExternalSource(Box::new(token_source)),
        )
        .await
        .map_err(|e| {
            AppError::Database(format!("Failed to connect to Firestore Emulator: {}", e))
        })?;

        tracing::info!(
            project = project_id,
            "Connected to Firestore (Emulator/Unauthenticated)"
        );

        Ok(Self {
            client: Some(client),
        })
    }

    /// Create a mock Firestore client for testing (offline mode).
    ///
    /// All database operations will return an error if called.
    pub fn new_mock() -> Self {
        Self { client: None }
    }

    /// Helper to get the client or return an error if offline.
    fn get_client(&self) -> Result<&firestore::FirestoreDb, AppError> {
        self.client
            .as_ref()
            .ok_or_else(|| AppError::Database("Database not connected (offline mode)".to_string()))
    }

    // ─── User Operations ─────────────────────────────────────────

    /// Get a user by id.
    pub async fn get_user(&self, user_id: &str) -> Result<Option<User>, AppError> {
        self.get_client()?
            .fluent()
            .select()
            .by_id_in(collections::USERS)
            .obj()
            .one(user_id)
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Create or update a user.
    pub async fn upsert_user(&self, user: &User) -> Result<(), AppError> {
        let _: () = self
            .get_client()?
            .fluent()
            .update()
            .in_col(collections::USERS)
            .document_id(&user.user_id)
            .object(user)
            .execute()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }

    // ─── Platform Token Operations ───────────────────────────────

    /// Get encrypted tokens for one platform connection.
    pub async fn get_platform_tokens(
        &self,
        user_id: &str,
        platform: Platform,
    ) -> Result<Option<PlatformTokens>, AppError> {
        self.get_client()?
            .fluent()
            .select()
            .by_id_in(collections::PLATFORM_TOKENS)
            .obj()
            .one(&PlatformTokens::doc_id(user_id, platform))
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// List all platform connections for a user.
    pub async fn list_platform_tokens(
        &self,
        user_id: &str,
    ) -> Result<Vec<PlatformTokens>, AppError> {
        let user_id = user_id.to_string();
        self.get_client()?
            .fluent()
            .select()
            .from(collections::PLATFORM_TOKENS)
            .filter(move |q| q.field("user_id").eq(user_id.clone()))
            .obj()
            .query()
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Store encrypted tokens for one platform connection.
    pub async fn set_platform_tokens(&self, tokens: &PlatformTokens) -> Result<(), AppError> {
        let _: () = self
            .get_client()?
            .fluent()
            .update()
            .in_col(collections::PLATFORM_TOKENS)
            .document_id(PlatformTokens::doc_id(&tokens.user_id, tokens.platform))
            .object(tokens)
            .execute()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }

    /// Delete tokens for one platform connection (disconnect).
    pub async fn delete_platform_tokens(
        &self,
        user_id: &str,
        platform: Platform,
    ) -> Result<(), AppError> {
        self.get_client()?
            .fluent()
            .delete()
            .from(collections::PLATFORM_TOKENS)
            .document_id(PlatformTokens::doc_id(user_id, platform))
            .execute()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }

    // ─── Post Operations ─────────────────────────────────────────

    /// Get a post by document id.
    pub async fn get_post(&self, post_id: &str) -> Result<Option<Post>, AppError> {
        self.get_client()?
            .fluent()
            .select()
            .by_id_in(collections::POSTS)
            .obj()
            .one(post_id)
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Get posts for a user with pagination, newest first.
    pub async fn get_posts_for_user(
        &self,
        user_id: &str,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Post>, AppError> {
        let user_id = user_id.to_string();
        self.get_client()?
            .fluent()
            .select()
            .from(collections::POSTS)
            .filter(move |q| q.field("user_id").eq(user_id.clone()))
            .order_by([("created_at", firestore::FirestoreQueryDirection::Descending)])
            .limit(limit)
            .offset(offset)
            .obj()
            .query()
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    // ─── Streak / Achievement Operations ─────────────────────────

    /// Get a user's streak aggregate.
    pub async fn get_streak(&self, user_id: &str) -> Result<Option<UserStreak>, AppError> {
        self.get_client()?
            .fluent()
            .select()
            .by_id_in(collections::STREAKS)
            .obj()
            .one(user_id)
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Store a user's streak aggregate.
    pub async fn set_streak(&self, user_id: &str, streak: &UserStreak) -> Result<(), AppError> {
        let _: () = self
            .get_client()?
            .fluent()
            .update()
            .in_col(collections::STREAKS)
            .document_id(user_id)
            .object(streak)
            .execute()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }

    /// List a user's unlocked achievements.
    pub async fn get_achievements(&self, user_id: &str) -> Result<Vec<Achievement>, AppError> {
        let user_id = user_id.to_string();
        self.get_client()?
            .fluent()
            .select()
            .from(collections::ACHIEVEMENTS)
            .filter(move |q| q.field("user_id").eq(user_id.clone()))
            .obj()
            .query()
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Top streaks for the leaderboard, ordered by current streak
    /// descending with longest streak as tie-breaker.
    pub async fn top_streaks(&self, limit: u32) -> Result<Vec<UserStreak>, AppError> {
        self.get_client()?
            .fluent()
            .select()
            .from(collections::STREAKS)
            .order_by([
                (
                    "current_streak",
                    firestore::FirestoreQueryDirection::Descending,
                ),
                (
                    "longest_streak",
                    firestore::FirestoreQueryDirection::Descending,
                ),
            ])
            .limit(limit)
            .obj()
            .query()
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    // ─── Subscription Operations ─────────────────────────────────

    /// Get a user's subscription state.
    pub async fn get_subscription(
        &self,
        user_id: &str,
    ) -> Result<Option<UserSubscription>, AppError> {
        self.get_client()?
            .fluent()
            .select()
            .by_id_in(collections::SUBSCRIPTIONS)
            .obj()
            .one(user_id)
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Store a user's subscription state.
    pub async fn set_subscription(&self, sub: &UserSubscription) -> Result<(), AppError> {
        let _: () = self
            .get_client()?
            .fluent()
            .update()
            .in_col(collections::SUBSCRIPTIONS)
            .document_id(&sub.user_id)
            .object(sub)
            .execute()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }

    /// Find the subscription that has linked the given wallet, if any.
    ///
    /// Used by the webhook handler to map on-chain transfers to users.
    pub async fn find_subscription_by_wallet(
        &self,
        wallet: &str,
    ) -> Result<Option<UserSubscription>, AppError> {
        let wallet = wallet.to_string();
        let mut matches: Vec<UserSubscription> = self
            .get_client()?
            .fluent()
            .select()
            .from(collections::SUBSCRIPTIONS)
            .filter(move |q| q.field("wallet_address").eq(wallet.clone()))
            .limit(1)
            .obj()
            .query()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(matches.pop())
    }

    // ─── Atomic Post Recording ───────────────────────────────────

    /// Atomically record a published post: store the post, update the
    /// streak aggregate, and write any newly unlocked achievements.
    ///
    /// Uses a Firestore transaction so all writes succeed or fail together.
    /// If another request modifies the streak concurrently, Firestore
    /// retries the transaction with fresh data, preventing lost updates.
    ///
    /// Returns the achievements unlocked by this post, or `None` if the
    /// post was already recorded (idempotent duplicate).
    pub async fn record_post_atomic(
        &self,
        post: &Post,
        connected_platforms: usize,
    ) -> Result<Option<Vec<AchievementKind>>, AppError> {
        let user_id = post.user_id.clone();
        let now = chrono::Utc::now().to_rfc3339();

        // Safety check: the user must still exist. This mitigates zombie
        // data if account deletion raced with post publishing.
        if self.get_user(&user_id).await?.is_none() {
            tracing::warn!(
                user_id,
                post_id = %post.post_id,
                "User not found, aborting atomic write (zombie prevention)"
            );
            return Ok(None);
        }

        let post_day = chrono::DateTime::parse_from_rfc3339(&post.created_at)
            .map_err(|e| {
                AppError::Internal(anyhow::anyhow!(
                    "Invalid created_at on post {}: {}",
                    post.post_id,
                    e
                ))
            })?
            .with_timezone(&chrono::Utc)
            .date_naive();

        // Begin a transaction
        let mut transaction = self
            .get_client()?
            .begin_transaction()
            .await
            .map_err(|e| AppError::Database(format!("Failed to begin transaction: {}", e)))?;

        // 1. Read the current streak within the transaction.
        //    This registers the document for conflict detection.
        let current: Option<UserStreak> = self
            .get_client()?
            .fluent()
            .select()
            .by_id_in(collections::STREAKS)
            .obj()
            .one(&user_id)
            .await
            .map_err(|e| {
                AppError::Database(format!("Failed to read streak in transaction: {}", e))
            })?;

        let mut streak = current.unwrap_or_default();
        streak.user_id = user_id.clone();

        // 2. Idempotency: if already recorded, skip all writes
        if !streak.record_post(&post.post_id, post_day, &now) {
            tracing::debug!(
                user_id,
                post_id = %post.post_id,
                "Post already recorded (idempotent skip)"
            );
            let _ = transaction.rollback().await;
            return Ok(None);
        }

        // 3. Compute newly unlocked achievements and mark them in the set
        let unlocked = crate::models::achievement::newly_unlocked(&streak, connected_platforms);
        for kind in &unlocked {
            streak.unlocked.insert(kind.as_str().to_string());
        }

        // 4. Add the post write to the transaction
        self.get_client()?
            .fluent()
            .update()
            .in_col(collections::POSTS)
            .document_id(&post.post_id)
            .object(post)
            .add_to_transaction(&mut transaction)
            .map_err(|e| AppError::Database(format!("Failed to add post to transaction: {}", e)))?;

        // 5. Add achievement rows (document id makes duplicates impossible)
        for kind in &unlocked {
            let achievement = Achievement {
                user_id: user_id.clone(),
                kind: *kind,
                unlocked_at: now.clone(),
            };

            self.get_client()?
                .fluent()
                .update()
                .in_col(collections::ACHIEVEMENTS)
                .document_id(Achievement::doc_id(&user_id, *kind))
                .object(&achievement)
                .add_to_transaction(&mut transaction)
                .map_err(|e| {
                    AppError::Database(format!("Failed to add achievement to transaction: {}", e))
                })?;
        }

        // 6. Add the streak write to the transaction
        self.get_client()?
            .fluent()
            .update()
            .in_col(collections::STREAKS)
            .document_id(&user_id)
            .object(&streak)
            .add_to_transaction(&mut transaction)
            .map_err(|e| {
                AppError::Database(format!("Failed to add streak to transaction: {}", e))
            })?;

        // 7. Commit the transaction atomically
        transaction
            .commit()
            .await
            .map_err(|e| AppError::Database(format!("Transaction commit failed: {}", e)))?;

        tracing::info!(
            user_id,
            post_id = %post.post_id,
            current_streak = streak.current_streak,
            unlocked_count = unlocked.len(),
            "Post recorded atomically"
        );

        Ok(Some(unlocked))
    }

    // ─── Helper Methods ────────────────────────────────────────────

    /// Helper to batch delete documents using transactions.
    async fn batch_delete<T, F>(
        &self,
        items: &[T],
        collection: &str,
        id_extractor: F,
    ) -> Result<(), AppError>
    where
        F: Fn(&T) -> String,
    {
        let client = self.get_client()?;

        for chunk in items.chunks(BATCH_SIZE) {
            let mut transaction = client
                .begin_transaction()
                .await
                .map_err(|e| AppError::Database(format!("Failed to begin transaction: {}", e)))?;

            for item in chunk {
                let doc_id = id_extractor(item);
                client
                    .fluent()
                    .delete()
                    .from(collection)
                    .document_id(&doc_id)
                    .add_to_transaction(&mut transaction)
                    .map_err(|e| {
                        AppError::Database(format!(
                            "Failed to add deletion to transaction for {}: {}",
                            collection, e
                        ))
                    })?;
            }

            transaction.commit().await.map_err(|e| {
                AppError::Database(format!("Failed to commit batch deletion: {}", e))
            })?;
        }

        Ok(())
    }

    // ─── User Data Deletion (GDPR) ─────────────────────────────────

    /// Delete ALL data for a user (GDPR compliance).
    ///
    /// Deletes from all collections:
    /// - `posts` (query by user_id)
    /// - `achievements` (query by user_id)
    /// - `streaks/{user_id}`
    /// - `subscriptions/{user_id}`
    /// - `users/{user_id}`
    ///
    /// Note: platform tokens should be deleted separately by the caller
    /// after using them for upstream revocation.
    ///
    /// Returns the number of documents deleted.
    pub async fn delete_user_data(&self, user_id: &str) -> Result<usize, AppError> {
        let mut deleted_count = 0;

        // 1. Delete all posts
        let owner = user_id.to_string();
        let posts: Vec<Post> = self
            .get_client()?
            .fluent()
            .select()
            .from(collections::POSTS)
            .filter(move |q| q.field("user_id").eq(owner.clone()))
            .obj()
            .query()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        let count = posts.len();
        self.batch_delete(&posts, collections::POSTS, |post: &Post| {
            post.post_id.clone()
        })
        .await?;

        deleted_count += count;
        tracing::debug!(user_id, count, "Deleted posts");

        // 2. Delete all achievements
        let owner = user_id.to_string();
        let achievements: Vec<Achievement> = self
            .get_client()?
            .fluent()
            .select()
            .from(collections::ACHIEVEMENTS)
            .filter(move |q| q.field("user_id").eq(owner.clone()))
            .obj()
            .query()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        let count = achievements.len();
        self.batch_delete(
            &achievements,
            collections::ACHIEVEMENTS,
            |achievement: &Achievement| Achievement::doc_id(&achievement.user_id, achievement.kind),
        )
        .await?;

        deleted_count += count;
        tracing::debug!(user_id, count, "Deleted achievements");

        // 3. Delete streak aggregate
        self.get_client()?
            .fluent()
            .delete()
            .from(collections::STREAKS)
            .document_id(user_id)
            .execute()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        deleted_count += 1;
        tracing::debug!(user_id, "Deleted streak");

        // 4. Delete subscription
        self.get_client()?
            .fluent()
            .delete()
            .from(collections::SUBSCRIPTIONS)
            .document_id(user_id)
            .execute()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        deleted_count += 1;
        tracing::debug!(user_id, "Deleted subscription");

        // 5. Delete user profile
        self.get_client()?
            .fluent()
            .delete()
            .from(collections::USERS)
            .document_id(user_id)
            .execute()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        deleted_count += 1;
        tracing::debug!(user_id, "Deleted user profile");

        tracing::info!(user_id, deleted_count, "User data deletion complete");

        Ok(deleted_count)
    }

    /// Effective-tier convenience used by webhook dispatch: re-derive and
    /// persist the subscription after a balance change.
    pub async fn save_token_tier(
        &self,
        user_id: &str,
        token_tier: Tier,
    ) -> Result<(), AppError> {
        let mut sub = self
            .get_subscription(user_id)
            .await?
            .unwrap_or_else(|| UserSubscription::new(user_id));

        sub.token_tier = token_tier;
        sub.updated_at = chrono::Utc::now().to_rfc3339();
        self.set_subscription(&sub).await
    }
}
