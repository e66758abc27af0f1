// SPDX-License-Identifier: MIT

//! Post publishing workflow.
//!
//! Handles the core flow:
//! 1. Publish the post via the platform API
//! 2. Build the post record
//! 3. Atomically store the post, update the streak, and unlock achievements

use crate::db::FirestoreDb;
use crate::error::Result;
use crate::models::{AchievementKind, Platform, Post};
use crate::services::{GamificationService, SocialService};

/// Publishes posts and feeds the gamification engine.
#[derive(Clone)]
pub struct PostPublisher {
    social: SocialService,
    gamification: GamificationService,
    db: FirestoreDb,
}

impl PostPublisher {
    pub fn new(social: SocialService, gamification: GamificationService, db: FirestoreDb) -> Self {
        Self {
            social,
            gamification,
            db,
        }
    }

    /// Publish `text` to `platform` for the user and record the result.
    ///
    /// Quota enforcement happens before this is called (the tier service
    /// consumes the daily credit in the route handler).
    pub async fn publish_post(
        &self,
        user_id: &str,
        platform: Platform,
        text: &str,
    ) -> Result<PublishResult> {
        tracing::info!(user_id, platform = %platform, "Publishing post");

        // 1. Publish via the platform API (token management is handled by
        //    SocialService)
        let platform_post_id = self.social.publish(user_id, platform, text).await?;

        // 2. Build the post record
        let post = Post {
            post_id: Post::doc_id(platform, &platform_post_id),
            user_id: user_id.to_string(),
            platform,
            platform_post_id: platform_post_id.clone(),
            text: text.to_string(),
            created_at: chrono::Utc::now().to_rfc3339(),
            source: "api".to_string(),
        };

        // 3. Record atomically: post + streak + achievements all commit or
        //    none do. Re-delivery of the same platform post id is a no-op.
        let connected = self.db.list_platform_tokens(user_id).await?.len();
        let unlocked = self.gamification.record_post(&post, connected).await?;

        if !unlocked.is_empty() {
            tracing::info!(
                user_id,
                platform = %platform,
                unlocked = ?unlocked,
                "Achievements unlocked"
            );
        }

        Ok(PublishResult {
            post,
            unlocked,
        })
    }
}

/// Result of publishing a post.
#[derive(Debug)]
pub struct PublishResult {
    pub post: Post,
    pub unlocked: Vec<AchievementKind>,
}
