// SPDX-License-Identifier: MIT

//! Published post model for storage and API.

use crate::models::Platform;
use serde::{Deserialize, Serialize};

/// A post published through the service, stored in Firestore.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    /// Document ID: `{platform}_{platform_post_id}`
    pub post_id: String,
    /// Owning user
    pub user_id: String,
    /// Platform the post was published to
    pub platform: Platform,
    /// The id the platform assigned to the post
    pub platform_post_id: String,
    /// Post body as submitted
    pub text: String,
    /// When the post was published (ISO 8601)
    pub created_at: String,
    /// Source: "api" for direct publishes
    pub source: String,
}

impl Post {
    /// Document id for a published post.
    pub fn doc_id(platform: Platform, platform_post_id: &str) -> String {
        format!("{}_{}", platform, platform_post_id)
    }
}
