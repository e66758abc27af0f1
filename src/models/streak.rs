// SPDX-License-Identifier: MIT

//! Posting-streak aggregate for each user.
//!
//! The streak document is pre-computed when posts are recorded, so the
//! dashboard reads a single document instead of scanning post history.
//! It is updated atomically with post writes via Firestore transactions.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Per-user streak aggregate.
///
/// Stored in the `streaks` collection, keyed by user id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserStreak {
    /// Owning user (duplicated from the document id for leaderboard queries)
    #[serde(default)]
    pub user_id: String,
    /// Consecutive-day posting streak as of `last_post_day`
    #[serde(default)]
    pub current_streak: u32,
    /// Longest streak ever reached
    #[serde(default)]
    pub longest_streak: u32,
    /// Day of the most recent counted post ("YYYY-MM-DD", empty if none)
    #[serde(default)]
    pub last_post_day: String,
    /// Total posts recorded
    #[serde(default)]
    pub total_posts: u32,
    /// Post document ids already counted (for duplicate detection)
    #[serde(default)]
    pub processed_post_ids: HashSet<String>,
    /// Achievement kinds already unlocked (idempotency set)
    #[serde(default)]
    pub unlocked: HashSet<String>,
    /// Last update timestamp (ISO 8601)
    #[serde(default)]
    pub updated_at: String,
}

impl Default for UserStreak {
    fn default() -> Self {
        Self {
            user_id: String::new(),
            current_streak: 0,
            longest_streak: 0,
            last_post_day: String::new(),
            total_posts: 0,
            processed_post_ids: HashSet::new(),
            unlocked: HashSet::new(),
            updated_at: String::new(),
        }
    }
}

impl UserStreak {
    /// Record a post made on `day`.
    ///
    /// Returns `true` if the post was counted (new).
    /// Returns `false` if the post id was already processed (duplicate).
    ///
    /// Streak rules: same day leaves the streak unchanged, the day after
    /// `last_post_day` extends it by one, any later day resets it to 1.
    /// A post dated before `last_post_day` (late webhook delivery) counts
    /// toward totals but does not move the streak.
    pub fn record_post(&mut self, post_id: &str, day: NaiveDate, now: &str) -> bool {
        // Idempotency check: skip if already counted
        if self.processed_post_ids.contains(post_id) {
            return false;
        }

        self.processed_post_ids.insert(post_id.to_string());
        self.updated_at = now.to_string();
        self.total_posts += 1;

        match self.last_day() {
            None => {
                self.current_streak = 1;
                self.last_post_day = day.to_string();
            }
            Some(last) if day == last => {
                // Same day: streak unchanged
            }
            Some(last) if day == last.succ_opt().unwrap_or(last) => {
                self.current_streak += 1;
                self.last_post_day = day.to_string();
            }
            Some(last) if day > last => {
                // Gap of one or more missed days
                self.current_streak = 1;
                self.last_post_day = day.to_string();
            }
            Some(_) => {
                // Out-of-order post from an earlier day: totals only
            }
        }

        if self.current_streak > self.longest_streak {
            self.longest_streak = self.current_streak;
        }

        true
    }

    /// Parse `last_post_day`, treating empty/garbage as "never posted".
    fn last_day(&self) -> Option<NaiveDate> {
        NaiveDate::parse_from_str(&self.last_post_day, "%Y-%m-%d").ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_first_post_starts_streak() {
        let mut streak = UserStreak::default();
        let counted = streak.record_post("twitter_1", day("2024-03-01"), "now");

        assert!(counted);
        assert_eq!(streak.current_streak, 1);
        assert_eq!(streak.longest_streak, 1);
        assert_eq!(streak.total_posts, 1);
        assert_eq!(streak.last_post_day, "2024-03-01");
    }

    #[test]
    fn test_consecutive_day_increments() {
        let mut streak = UserStreak::default();
        streak.record_post("p1", day("2024-03-01"), "now");
        streak.record_post("p2", day("2024-03-02"), "now");
        streak.record_post("p3", day("2024-03-03"), "now");

        assert_eq!(streak.current_streak, 3);
        assert_eq!(streak.longest_streak, 3);
    }

    #[test]
    fn test_same_day_unchanged() {
        let mut streak = UserStreak::default();
        streak.record_post("p1", day("2024-03-01"), "now");
        streak.record_post("p2", day("2024-03-01"), "now");

        assert_eq!(streak.current_streak, 1);
        assert_eq!(streak.total_posts, 2); // Both posts counted
    }

    #[test]
    fn test_gap_resets_to_one() {
        let mut streak = UserStreak::default();
        streak.record_post("p1", day("2024-03-01"), "now");
        streak.record_post("p2", day("2024-03-02"), "now");
        streak.record_post("p3", day("2024-03-05"), "now");

        assert_eq!(streak.current_streak, 1);
        assert_eq!(streak.longest_streak, 2); // Peak preserved
    }

    #[test]
    fn test_duplicate_post_id_skipped() {
        let mut streak = UserStreak::default();
        streak.record_post("p1", day("2024-03-01"), "now");
        let counted_again = streak.record_post("p1", day("2024-03-02"), "later");

        assert!(!counted_again);
        assert_eq!(streak.total_posts, 1);
        assert_eq!(streak.current_streak, 1);
    }

    #[test]
    fn test_out_of_order_post_counts_totals_only() {
        let mut streak = UserStreak::default();
        streak.record_post("p1", day("2024-03-05"), "now");
        streak.record_post("p2", day("2024-03-02"), "now");

        assert_eq!(streak.total_posts, 2);
        assert_eq!(streak.current_streak, 1);
        assert_eq!(streak.last_post_day, "2024-03-05");
    }

    #[test]
    fn test_month_boundary_is_consecutive() {
        let mut streak = UserStreak::default();
        streak.record_post("p1", day("2024-02-29"), "now");
        streak.record_post("p2", day("2024-03-01"), "now");

        assert_eq!(streak.current_streak, 2);
    }
}
