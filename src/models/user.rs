//! User model for storage and API.

use serde::{Deserialize, Serialize};

/// User profile stored in Firestore.
///
/// The Google subject claim is the canonical user id and doubles as the
/// document id in every per-user collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Google subject claim (also used as document ID)
    pub user_id: String,
    /// Email address from the verified Google ID token
    pub email: String,
    /// Display name
    pub display_name: String,
    /// Profile picture URL
    pub picture: Option<String>,
    /// When user first signed in
    pub created_at: String,
    /// Last activity timestamp
    pub last_active: String,
    /// Set when the user has requested account deletion
    pub deletion_requested_at: Option<String>,
}
