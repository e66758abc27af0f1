// SPDX-License-Identifier: MIT

//! Gamification service: streaks, achievements, leaderboard.

use crate::db::FirestoreDb;
use crate::error::AppError;
use crate::models::{Achievement, AchievementKind, Post, UserStreak};
use serde::Serialize;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

/// One row of the streak leaderboard.
#[derive(Debug, Clone, Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct LeaderboardEntry {
    pub user_id: String,
    pub display_name: String,
    pub current_streak: u32,
    pub longest_streak: u32,
    pub total_posts: u32,
}

/// Streak and achievement logic on top of the database layer.
#[derive(Clone)]
pub struct GamificationService {
    db: FirestoreDb,
}

impl GamificationService {
    pub fn new(db: FirestoreDb) -> Self {
        Self { db }
    }

    /// The user's streak aggregate (zeroed for users who never posted).
    pub async fn streak(&self, user_id: &str) -> Result<UserStreak, AppError> {
        Ok(self
            .db
            .get_streak(user_id)
            .await?
            .unwrap_or_else(|| UserStreak {
                user_id: user_id.to_string(),
                ..Default::default()
            }))
    }

    /// The user's unlocked achievements.
    pub async fn achievements(&self, user_id: &str) -> Result<Vec<Achievement>, AppError> {
        self.db.get_achievements(user_id).await
    }

    /// Record a published post: streak arithmetic plus achievement
    /// unlocking, committed atomically with the post document.
    ///
    /// Returns the achievements unlocked by this post (empty for
    /// idempotent duplicates).
    pub async fn record_post(
        &self,
        post: &Post,
        connected_platforms: usize,
    ) -> Result<Vec<AchievementKind>, AppError> {
        Ok(self
            .db
            .record_post_atomic(post, connected_platforms)
            .await?
            .unwrap_or_default())
    }

    /// Top streaks with display names resolved.
    pub async fn leaderboard(&self, limit: u32) -> Result<Vec<LeaderboardEntry>, AppError> {
        let streaks = self.db.top_streaks(limit).await?;

        let mut entries = Vec::with_capacity(streaks.len());
        for streak in streaks {
            // Skip orphaned streak docs whose user was deleted mid-query
            let Some(user) = self.db.get_user(&streak.user_id).await? else {
                continue;
            };

            entries.push(LeaderboardEntry {
                user_id: streak.user_id,
                display_name: user.display_name,
                current_streak: streak.current_streak,
                longest_streak: streak.longest_streak,
                total_posts: streak.total_posts,
            });
        }

        Ok(entries)
    }
}
