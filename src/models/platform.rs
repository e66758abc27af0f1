// SPDX-License-Identifier: MIT

//! Social platforms and per-platform OAuth credentials.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Supported social platforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Twitter,
    Linkedin,
    Reddit,
    Instagram,
}

impl Platform {
    /// All supported platforms, in display order.
    pub const ALL: [Platform; 4] = [
        Platform::Twitter,
        Platform::Linkedin,
        Platform::Reddit,
        Platform::Instagram,
    ];

    /// Lowercase identifier used in URLs and document IDs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Twitter => "twitter",
            Platform::Linkedin => "linkedin",
            Platform::Reddit => "reddit",
            Platform::Instagram => "instagram",
        }
    }

    /// Parse a lowercase platform identifier (as used in route paths).
    pub fn parse(s: &str) -> Option<Platform> {
        match s {
            "twitter" => Some(Platform::Twitter),
            "linkedin" => Some(Platform::Linkedin),
            "reddit" => Some(Platform::Reddit),
            "instagram" => Some(Platform::Instagram),
            _ => None,
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A user's OAuth credentials for one platform (encrypted in Firestore).
///
/// Document ID: `{user_id}:{platform}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformTokens {
    /// Owning user
    pub user_id: String,
    /// Which platform these tokens belong to
    pub platform: Platform,
    /// Encrypted access token (base64)
    pub access_token_encrypted: String,
    /// Encrypted refresh token (base64); None for platforms that issue
    /// long-lived access tokens without a refresh flow
    pub refresh_token_encrypted: Option<String>,
    /// When the access token expires (ISO 8601)
    pub expires_at: String,
    /// Granted OAuth scopes
    pub scopes: Vec<String>,
    /// The user's id on the platform
    pub platform_user_id: String,
    /// The user's handle on the platform, when the platform reports one
    pub platform_username: Option<String>,
    /// When the account was connected
    pub connected_at: String,
}

impl PlatformTokens {
    /// Document id for a `(user, platform)` pair.
    pub fn doc_id(user_id: &str, platform: Platform) -> String {
        format!("{}:{}", user_id, platform)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_parse_roundtrip() {
        for platform in Platform::ALL {
            assert_eq!(Platform::parse(platform.as_str()), Some(platform));
        }
        assert_eq!(Platform::parse("myspace"), None);
        assert_eq!(Platform::parse("Twitter"), None); // case-sensitive
    }

    #[test]
    fn test_doc_id_format() {
        assert_eq!(
            PlatformTokens::doc_id("g-123", Platform::Reddit),
            "g-123:reddit"
        );
    }
}
