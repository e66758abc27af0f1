//! Database layer (Firestore).

pub mod firestore;

pub use firestore::FirestoreDb;

/// Collection names as constants.
pub mod collections {
    pub const USERS: &str = "users";
    /// Encrypted OAuth tokens, keyed by `{user_id}:{platform}`
    pub const PLATFORM_TOKENS: &str = "platform_tokens";
    pub const POSTS: &str = "posts";
    /// Streak aggregates (keyed by user_id)
    pub const STREAKS: &str = "streaks";
    /// Unlocked achievements, keyed by `{user_id}_{kind}`
    pub const ACHIEVEMENTS: &str = "achievements";
    /// Subscription state (keyed by user_id)
    pub const SUBSCRIPTIONS: &str = "subscriptions";
}
