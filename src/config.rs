//! Application configuration loaded from environment variables.
//!
//! Secrets are read once at startup and cached in memory. In production,
//! Cloud Run secret bindings inject secrets as environment variables, so
//! env vars are the single source for both dev and prod.

use std::env;

use crate::models::Platform;

/// OAuth client credentials for one platform.
#[derive(Debug, Clone)]
pub struct OAuthCredentials {
    pub client_id: String,
    pub client_secret: String,
}

/// Application configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    // --- Environment Variables (non-sensitive) ---
    /// Google OAuth client ID (audience for Sign-In ID tokens)
    pub google_client_id: String,
    /// Frontend URL for OAuth redirects
    pub frontend_url: String,
    /// Public base URL of this API (for OAuth callbacks)
    pub api_url: String,
    /// GCP project ID
    pub gcp_project_id: String,
    /// GCP region (for KMS)
    pub gcp_region: String,
    /// Server port
    pub port: u16,
    /// Mint address of the project token used for tier gating
    pub token_mint: String,
    /// Unguessable path segment for the webhook endpoint
    pub webhook_path_uuid: String,
    /// Subreddits polled by the research aggregator (comma-separated env)
    pub research_subreddits: Vec<String>,
    /// RSS feed URLs polled by the research aggregator (comma-separated env)
    pub research_feeds: Vec<String>,
    /// User-Agent sent to Reddit (required by their API terms)
    pub reddit_user_agent: String,

    // --- Secrets (injected via env) ---
    /// Per-platform OAuth client credentials
    pub twitter: OAuthCredentials,
    pub linkedin: OAuthCredentials,
    pub reddit: OAuthCredentials,
    pub instagram: OAuthCredentials,
    /// JWT signing key for session tokens (raw bytes)
    pub jwt_signing_key: Vec<u8>,
    /// HMAC key for signing OAuth state parameters (raw bytes)
    pub oauth_state_key: Vec<u8>,
    /// Helius API key (RPC balance queries)
    pub helius_api_key: String,
    /// Shared secret Helius sends in the webhook Authorization header
    pub helius_webhook_secret: String,
    /// Groq API key; None disables LLM summarization
    pub groq_api_key: Option<String>,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok(); // Load .env file if present

        Ok(Self {
            google_client_id: required("GOOGLE_CLIENT_ID")?,
            frontend_url: env::var("FRONTEND_URL")
                .unwrap_or_else(|_| "http://localhost:5173".to_string()),
            api_url: env::var("API_URL").unwrap_or_else(|_| "http://localhost:8080".to_string()),
            gcp_project_id: env::var("GCP_PROJECT_ID").unwrap_or_else(|_| "local-dev".to_string()),
            gcp_region: env::var("GCP_REGION").unwrap_or_else(|_| "us-west1".to_string()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .unwrap_or(8080),
            token_mint: required("TOKEN_MINT")?,
            webhook_path_uuid: required("WEBHOOK_PATH_UUID")?,
            research_subreddits: csv_env(
                "RESEARCH_SUBREDDITS",
                &["socialmedia", "marketing", "Entrepreneur"],
            ),
            research_feeds: csv_env("RESEARCH_FEEDS", &[]),
            reddit_user_agent: env::var("REDDIT_USER_AGENT")
                .unwrap_or_else(|_| "postforge/0.1".to_string()),

            twitter: platform_credentials("TWITTER")?,
            linkedin: platform_credentials("LINKEDIN")?,
            reddit: platform_credentials("REDDIT")?,
            instagram: platform_credentials("INSTAGRAM")?,
            jwt_signing_key: required("JWT_SIGNING_KEY")?.into_bytes(),
            oauth_state_key: required("OAUTH_STATE_KEY")?.into_bytes(),
            helius_api_key: required("HELIUS_API_KEY")?,
            helius_webhook_secret: required("HELIUS_WEBHOOK_SECRET")?,
            groq_api_key: env::var("GROQ_API_KEY")
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty()),
        })
    }

    /// Credentials for the given platform.
    pub fn oauth_credentials(&self, platform: Platform) -> &OAuthCredentials {
        match platform {
            Platform::Twitter => &self.twitter,
            Platform::Linkedin => &self.linkedin,
            Platform::Reddit => &self.reddit,
            Platform::Instagram => &self.instagram,
        }
    }

    /// Default config for tests only.
    pub fn test_default() -> Self {
        let test_creds = |name: &str| OAuthCredentials {
            client_id: format!("test_{}_id", name),
            client_secret: format!("test_{}_secret", name),
        };

        Self {
            google_client_id: "test-google-client-id".to_string(),
            frontend_url: "http://localhost:5173".to_string(),
            api_url: "http://localhost:8080".to_string(),
            gcp_project_id: "test-project".to_string(),
            gcp_region: "us-west1".to_string(),
            port: 8080,
            token_mint: "TestMint1111111111111111111111111111111111".to_string(),
            webhook_path_uuid: "test-webhook-uuid".to_string(),
            research_subreddits: vec!["socialmedia".to_string()],
            research_feeds: vec![],
            reddit_user_agent: "postforge-test/0.1".to_string(),
            twitter: test_creds("twitter"),
            linkedin: test_creds("linkedin"),
            reddit: test_creds("reddit"),
            instagram: test_creds("instagram"),
            jwt_signing_key: b"test_jwt_key_32_bytes_minimum!!".to_vec(),
            oauth_state_key: b"test_state_key_32_bytes_minimum".to_vec(),
            helius_api_key: "test-helius-key".to_string(),
            helius_webhook_secret: "test-webhook-secret".to_string(),
            groq_api_key: None,
        }
    }
}

impl Default for Config {
    /// Default config for testing only.
    fn default() -> Self {
        Self::test_default()
    }
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    env::var(name)
        .map(|v| v.trim().to_string())
        .map_err(|_| ConfigError::Missing(name))
}

/// Read `{prefix}_CLIENT_ID` / `{prefix}_CLIENT_SECRET`.
fn platform_credentials(prefix: &str) -> Result<OAuthCredentials, ConfigError> {
    let id_var = format!("{}_CLIENT_ID", prefix);
    let secret_var = format!("{}_CLIENT_SECRET", prefix);

    Ok(OAuthCredentials {
        client_id: env::var(&id_var)
            .map_err(|_| ConfigError::Missing(leak(id_var)))?
            .trim()
            .to_string(),
        client_secret: env::var(&secret_var)
            .map_err(|_| ConfigError::Missing(leak(secret_var)))?
            .trim()
            .to_string(),
    })
}

/// Comma-separated env var with a static fallback.
fn csv_env(name: &str, fallback: &[&str]) -> Vec<String> {
    match env::var(name) {
        Ok(raw) => raw
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        Err(_) => fallback.iter().map(|s| s.to_string()).collect(),
    }
}

/// Error messages carry the env var name; names built at runtime are leaked
/// once at startup.
fn leak(name: String) -> &'static str {
    Box::leak(name.into_boxed_str())
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_csv_env_fallback() {
        let parsed = csv_env("POSTFORGE_NONEXISTENT_VAR", &["a", "b"]);
        assert_eq!(parsed, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_test_default_has_all_platforms() {
        let config = Config::test_default();
        for platform in Platform::ALL {
            let creds = config.oauth_credentials(platform);
            assert!(!creds.client_id.is_empty());
            assert!(!creds.client_secret.is_empty());
        }
    }
}
