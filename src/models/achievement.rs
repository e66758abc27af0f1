// SPDX-License-Identifier: MIT

//! Achievement kinds and unlock rules.

use crate::models::UserStreak;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Achievement types a user can unlock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AchievementKind {
    FirstPost,
    Streak7,
    Streak30,
    Streak100,
    Posts10,
    Posts100,
    AllPlatforms,
}

impl AchievementKind {
    /// All kinds, in unlock-check order.
    pub const ALL: [AchievementKind; 7] = [
        AchievementKind::FirstPost,
        AchievementKind::Streak7,
        AchievementKind::Streak30,
        AchievementKind::Streak100,
        AchievementKind::Posts10,
        AchievementKind::Posts100,
        AchievementKind::AllPlatforms,
    ];

    /// Snake_case identifier used in document IDs and the idempotency set.
    pub fn as_str(&self) -> &'static str {
        match self {
            AchievementKind::FirstPost => "first_post",
            AchievementKind::Streak7 => "streak_7",
            AchievementKind::Streak30 => "streak_30",
            AchievementKind::Streak100 => "streak_100",
            AchievementKind::Posts10 => "posts_10",
            AchievementKind::Posts100 => "posts_100",
            AchievementKind::AllPlatforms => "all_platforms",
        }
    }

    /// Whether the unlock condition holds for the given state.
    fn condition_met(&self, streak: &UserStreak, connected_platforms: usize) -> bool {
        match self {
            AchievementKind::FirstPost => streak.total_posts >= 1,
            AchievementKind::Streak7 => streak.current_streak >= 7,
            AchievementKind::Streak30 => streak.current_streak >= 30,
            AchievementKind::Streak100 => streak.current_streak >= 100,
            AchievementKind::Posts10 => streak.total_posts >= 10,
            AchievementKind::Posts100 => streak.total_posts >= 100,
            AchievementKind::AllPlatforms => connected_platforms >= 4,
        }
    }
}

impl fmt::Display for AchievementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unlocked achievement record, stored in Firestore.
///
/// Document ID: `{user_id}_{kind}` — at most one row per (user, kind).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Achievement {
    /// Owning user
    pub user_id: String,
    /// Achievement type
    pub kind: AchievementKind,
    /// When it was unlocked (ISO 8601)
    pub unlocked_at: String,
}

impl Achievement {
    /// Document id for a (user, kind) pair.
    pub fn doc_id(user_id: &str, kind: AchievementKind) -> String {
        format!("{}_{}", user_id, kind)
    }
}

/// Compute achievements newly unlocked by the current state.
///
/// Kinds already present in the streak's `unlocked` set are never returned
/// again, which keeps awarding idempotent across re-checks.
pub fn newly_unlocked(streak: &UserStreak, connected_platforms: usize) -> Vec<AchievementKind> {
    AchievementKind::ALL
        .into_iter()
        .filter(|kind| {
            !streak.unlocked.contains(kind.as_str())
                && kind.condition_met(streak, connected_platforms)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn streak_with(current: u32, total: u32) -> UserStreak {
        UserStreak {
            current_streak: current,
            longest_streak: current,
            total_posts: total,
            ..Default::default()
        }
    }

    #[test]
    fn test_first_post_unlocks() {
        let streak = streak_with(1, 1);
        let unlocked = newly_unlocked(&streak, 1);
        assert_eq!(unlocked, vec![AchievementKind::FirstPost]);
    }

    #[test]
    fn test_streak_thresholds() {
        let streak = streak_with(7, 7);
        let unlocked = newly_unlocked(&streak, 0);
        assert!(unlocked.contains(&AchievementKind::Streak7));
        assert!(!unlocked.contains(&AchievementKind::Streak30));
    }

    #[test]
    fn test_already_unlocked_not_returned() {
        let mut streak = streak_with(7, 7);
        streak.unlocked.insert("first_post".to_string());
        streak.unlocked.insert("streak_7".to_string());

        let unlocked = newly_unlocked(&streak, 0);
        assert!(unlocked.is_empty());
    }

    #[test]
    fn test_all_platforms_requires_four() {
        let streak = streak_with(0, 0);
        assert!(newly_unlocked(&streak, 3).is_empty());
        assert_eq!(
            newly_unlocked(&streak, 4),
            vec![AchievementKind::AllPlatforms]
        );
    }

    #[test]
    fn test_doc_id_unique_per_kind() {
        assert_eq!(
            Achievement::doc_id("u1", AchievementKind::Posts10),
            "u1_posts_10"
        );
        assert_ne!(
            Achievement::doc_id("u1", AchievementKind::Posts10),
            Achievement::doc_id("u1", AchievementKind::Posts100)
        );
    }
}
