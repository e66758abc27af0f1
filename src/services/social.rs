// SPDX-License-Identifier: MIT

//! Social platform API clients for publishing and account insights.
//!
//! Handles:
//! - OAuth code exchange and token refresh for all four platforms
//! - Post publishing via each platform's REST API
//! - Account insights with TTL caching
//! - Rate limit and revoked-token detection

use crate::config::Config;
use crate::error::AppError;
use crate::models::Platform;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::Deserialize;

/// OAuth endpoints and API base for one platform.
struct PlatformEndpoints {
    authorize_url: &'static str,
    token_url: &'static str,
    api_base: &'static str,
    /// Whether the token endpoint expects HTTP basic auth with the client
    /// credentials (Reddit, Twitter) or the secret in the form body.
    basic_auth: bool,
}

fn endpoints(platform: Platform) -> PlatformEndpoints {
    match platform {
        Platform::Twitter => PlatformEndpoints {
            authorize_url: "https://twitter.com/i/oauth2/authorize",
            token_url: "https://api.twitter.com/2/oauth2/token",
            api_base: "https://api.twitter.com/2",
            basic_auth: true,
        },
        Platform::Linkedin => PlatformEndpoints {
            authorize_url: "https://www.linkedin.com/oauth/v2/authorization",
            token_url: "https://www.linkedin.com/oauth/v2/accessToken",
            api_base: "https://api.linkedin.com/v2",
            basic_auth: false,
        },
        Platform::Reddit => PlatformEndpoints {
            authorize_url: "https://www.reddit.com/api/v1/authorize",
            token_url: "https://www.reddit.com/api/v1/access_token",
            api_base: "https://oauth.reddit.com",
            basic_auth: true,
        },
        Platform::Instagram => PlatformEndpoints {
            authorize_url: "https://api.instagram.com/oauth/authorize",
            token_url: "https://api.instagram.com/oauth/access_token",
            api_base: "https://graph.instagram.com",
            basic_auth: false,
        },
    }
}

/// Scopes requested when connecting each platform.
fn default_scopes(platform: Platform) -> &'static [&'static str] {
    match platform {
        Platform::Twitter => &["tweet.read", "tweet.write", "users.read", "offline.access"],
        Platform::Linkedin => &["openid", "profile", "w_member_social"],
        Platform::Reddit => &["identity", "submit", "read"],
        Platform::Instagram => &["instagram_business_basic", "instagram_business_content_publish"],
    }
}

/// Low-level HTTP client for the social platform APIs.
#[derive(Clone)]
pub struct PlatformClient {
    http: reqwest::Client,
    twitter: crate::config::OAuthCredentials,
    linkedin: crate::config::OAuthCredentials,
    reddit: crate::config::OAuthCredentials,
    instagram: crate::config::OAuthCredentials,
    reddit_user_agent: String,
}

impl PlatformClient {
    /// Create a new client with the OAuth credentials for every platform.
    pub fn new(config: &Config) -> Self {
        Self {
            http: reqwest::Client::new(),
            twitter: config.twitter.clone(),
            linkedin: config.linkedin.clone(),
            reddit: config.reddit.clone(),
            instagram: config.instagram.clone(),
            reddit_user_agent: config.reddit_user_agent.clone(),
        }
    }

    fn credentials(&self, platform: Platform) -> &crate::config::OAuthCredentials {
        match platform {
            Platform::Twitter => &self.twitter,
            Platform::Linkedin => &self.linkedin,
            Platform::Reddit => &self.reddit,
            Platform::Instagram => &self.instagram,
        }
    }

    // ─── OAuth ───────────────────────────────────────────────────────────

    /// Build the authorization URL the user is redirected to.
    ///
    /// `code_challenge` is only used by Twitter (plain PKCE).
    pub fn authorize_url(
        &self,
        platform: Platform,
        callback_url: &str,
        state: &str,
        code_challenge: Option<&str>,
    ) -> String {
        let creds = self.credentials(platform);
        let scopes = default_scopes(platform).join(" ");

        let mut url = format!(
            "{}?response_type=code&client_id={}&redirect_uri={}&scope={}&state={}",
            endpoints(platform).authorize_url,
            urlencoding::encode(&creds.client_id),
            urlencoding::encode(callback_url),
            urlencoding::encode(&scopes),
            urlencoding::encode(state),
        );

        // Reddit needs duration=permanent to issue a refresh token
        if platform == Platform::Reddit {
            url.push_str("&duration=permanent");
        }

        if platform == Platform::Twitter {
            if let Some(challenge) = code_challenge {
                url.push_str(&format!(
                    "&code_challenge={}&code_challenge_method=plain",
                    urlencoding::encode(challenge)
                ));
            }
        }

        url
    }

    /// Exchange an authorization code for tokens.
    pub async fn exchange_code(
        &self,
        platform: Platform,
        code: &str,
        callback_url: &str,
        code_verifier: Option<&str>,
    ) -> Result<TokenExchangeResponse, AppError> {
        let creds = self.credentials(platform);
        let ep = endpoints(platform);

        let mut form: Vec<(&str, &str)> = vec![
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", callback_url),
        ];

        if platform == Platform::Twitter {
            if let Some(verifier) = code_verifier {
                form.push(("code_verifier", verifier));
            }
            // Twitter also wants the client_id in the body
            form.push(("client_id", &creds.client_id));
        }

        if !ep.basic_auth {
            form.push(("client_id", &creds.client_id));
            form.push(("client_secret", &creds.client_secret));
        }

        let mut request = self.http.post(ep.token_url).form(&form);

        if ep.basic_auth {
            request = request.basic_auth(&creds.client_id, Some(&creds.client_secret));
        }
        if platform == Platform::Reddit {
            request = request.header(reqwest::header::USER_AGENT, &self.reddit_user_agent);
        }

        let response = request
            .send()
            .await
            .map_err(|e| AppError::PlatformApi(format!("Token exchange failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::error!(
                platform = %platform,
                status = %status,
                body = %body,
                "Token exchange failed"
            );
            return Err(AppError::PlatformApi(format!(
                "Token exchange failed with status {}",
                status
            )));
        }

        response
            .json()
            .await
            .map_err(|e| AppError::PlatformApi(format!("Failed to parse token response: {}", e)))
    }

    /// Refresh an expired access token.
    pub async fn refresh_token(
        &self,
        platform: Platform,
        refresh_token: &str,
    ) -> Result<TokenRefreshResponse, AppError> {
        let creds = self.credentials(platform);
        let ep = endpoints(platform);

        let mut form: Vec<(&str, &str)> = vec![
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ];

        if !ep.basic_auth {
            form.push(("client_id", &creds.client_id));
            form.push(("client_secret", &creds.client_secret));
        }

        let mut request = self.http.post(ep.token_url).form(&form);
        if ep.basic_auth {
            request = request.basic_auth(&creds.client_id, Some(&creds.client_secret));
        }
        if platform == Platform::Reddit {
            request = request.header(reqwest::header::USER_AGENT, &self.reddit_user_agent);
        }

        let response = request
            .send()
            .await
            .map_err(|e| AppError::PlatformApi(format!("Token refresh request failed: {}", e)))?;

        self.check_response_json(platform, response).await
    }

    /// Revoke a token upstream where the platform supports it.
    pub async fn revoke(&self, platform: Platform, token: &str) -> Result<(), AppError> {
        let creds = self.credentials(platform);

        let revoke_url = match platform {
            Platform::Twitter => "https://api.twitter.com/2/oauth2/revoke",
            Platform::Reddit => "https://www.reddit.com/api/v1/revoke_token",
            // LinkedIn and Instagram have no revocation endpoint; tokens
            // simply lapse after deletion on our side.
            Platform::Linkedin | Platform::Instagram => {
                tracing::debug!(platform = %platform, "No revocation endpoint, skipping");
                return Ok(());
            }
        };

        let mut request = self
            .http
            .post(revoke_url)
            .basic_auth(&creds.client_id, Some(&creds.client_secret))
            .form(&[("token", token)]);
        if platform == Platform::Reddit {
            request = request.header(reqwest::header::USER_AGENT, &self.reddit_user_agent);
        }

        let response = request
            .send()
            .await
            .map_err(|e| AppError::PlatformApi(format!("Revocation request failed: {}", e)))?;

        self.check_response(platform, response).await?;
        tracing::info!(platform = %platform, "Token revoked upstream");
        Ok(())
    }

    // ─── Profile ─────────────────────────────────────────────────────────

    /// Fetch the authenticated account's id and username.
    pub async fn fetch_profile(
        &self,
        platform: Platform,
        access_token: &str,
    ) -> Result<PlatformProfile, AppError> {
        let base = endpoints(platform).api_base;

        match platform {
            Platform::Twitter => {
                let body: TwitterEnvelope<TwitterUser> = self
                    .get_json(platform, &format!("{}/users/me", base), access_token)
                    .await?;
                Ok(PlatformProfile {
                    id: body.data.id,
                    username: Some(body.data.username),
                })
            }
            Platform::Linkedin => {
                let body: LinkedinUserinfo = self
                    .get_json(platform, "https://api.linkedin.com/v2/userinfo", access_token)
                    .await?;
                Ok(PlatformProfile {
                    id: body.sub,
                    username: body.name,
                })
            }
            Platform::Reddit => {
                let body: RedditIdentity = self
                    .get_json(platform, &format!("{}/api/v1/me", base), access_token)
                    .await?;
                Ok(PlatformProfile {
                    id: body.id,
                    username: Some(body.name),
                })
            }
            Platform::Instagram => {
                let body: InstagramProfile = self
                    .get_json(
                        platform,
                        &format!("{}/me?fields=user_id,username", base),
                        access_token,
                    )
                    .await?;
                Ok(PlatformProfile {
                    id: body.user_id,
                    username: Some(body.username),
                })
            }
        }
    }

    // ─── Publishing ──────────────────────────────────────────────────────

    /// Publish a text post, returning the platform-assigned post id.
    pub async fn create_post(
        &self,
        platform: Platform,
        access_token: &str,
        account: &PlatformProfile,
        text: &str,
    ) -> Result<String, AppError> {
        let base = endpoints(platform).api_base;

        match platform {
            Platform::Twitter => {
                let body = serde_json::json!({ "text": text });
                let response: TwitterEnvelope<TwitterTweet> = self
                    .post_json(platform, &format!("{}/tweets", base), access_token, &body)
                    .await?;
                Ok(response.data.id)
            }
            Platform::Linkedin => {
                let body = serde_json::json!({
                    "author": format!("urn:li:person:{}", account.id),
                    "lifecycleState": "PUBLISHED",
                    "specificContent": {
                        "com.linkedin.ugc.ShareContent": {
                            "shareCommentary": { "text": text },
                            "shareMediaCategory": "NONE"
                        }
                    },
                    "visibility": {
                        "com.linkedin.ugc.MemberNetworkVisibility": "PUBLIC"
                    }
                });
                let response: LinkedinPostResponse = self
                    .post_json(platform, &format!("{}/ugcPosts", base), access_token, &body)
                    .await?;
                Ok(response.id)
            }
            Platform::Reddit => {
                // Self-post to the user's profile subreddit
                let username = account.username.as_deref().unwrap_or(&account.id);
                let sr = format!("u_{}", username);
                let title: String = text.chars().take(80).collect();

                let response = self
                    .http
                    .post(format!("{}/api/submit", base))
                    .bearer_auth(access_token)
                    .header(reqwest::header::USER_AGENT, &self.reddit_user_agent)
                    .form(&[
                        ("api_type", "json"),
                        ("kind", "self"),
                        ("sr", &sr),
                        ("title", &title),
                        ("text", text),
                    ])
                    .send()
                    .await
                    .map_err(|e| AppError::PlatformApi(e.to_string()))?;

                let body: RedditSubmitResponse =
                    self.check_response_json(platform, response).await?;
                body.json
                    .data
                    .and_then(|d| d.id)
                    .ok_or_else(|| {
                        AppError::PlatformApi("Reddit submit returned no post id".to_string())
                    })
            }
            Platform::Instagram => {
                // Two-step container flow: create media, then publish
                let container: InstagramContainer = self
                    .post_json(
                        platform,
                        &format!("{}/{}/media", base, account.id),
                        access_token,
                        &serde_json::json!({ "caption": text, "media_type": "TEXT" }),
                    )
                    .await?;

                let published: InstagramContainer = self
                    .post_json(
                        platform,
                        &format!("{}/{}/media_publish", base, account.id),
                        access_token,
                        &serde_json::json!({ "creation_id": container.id }),
                    )
                    .await?;
                Ok(published.id)
            }
        }
    }

    // ─── Insights ────────────────────────────────────────────────────────

    /// Fetch follower/content counts for the connected account.
    pub async fn fetch_insights(
        &self,
        platform: Platform,
        access_token: &str,
        account: &PlatformProfile,
    ) -> Result<AccountInsights, AppError> {
        let base = endpoints(platform).api_base;
        let now = chrono::Utc::now().to_rfc3339();

        match platform {
            Platform::Twitter => {
                let body: TwitterEnvelope<TwitterUserMetrics> = self
                    .get_json(
                        platform,
                        &format!("{}/users/me?user.fields=public_metrics", base),
                        access_token,
                    )
                    .await?;
                let metrics = body.data.public_metrics;
                Ok(AccountInsights {
                    platform,
                    followers: Some(metrics.followers_count),
                    following: Some(metrics.following_count),
                    post_count: Some(metrics.tweet_count),
                    fetched_at: now,
                })
            }
            Platform::Linkedin => {
                let body: LinkedinNetworkSize = self
                    .get_json(
                        platform,
                        &format!(
                            "{}/networkSizes/urn:li:person:{}?edgeType=CONNECTIONS",
                            base, account.id
                        ),
                        access_token,
                    )
                    .await?;
                Ok(AccountInsights {
                    platform,
                    followers: Some(body.first_degree_size),
                    following: None,
                    post_count: None,
                    fetched_at: now,
                })
            }
            Platform::Reddit => {
                let body: RedditIdentity = self
                    .get_json(platform, &format!("{}/api/v1/me", base), access_token)
                    .await?;
                Ok(AccountInsights {
                    platform,
                    followers: body.subreddit.and_then(|s| s.subscribers),
                    following: None,
                    post_count: None,
                    fetched_at: now,
                })
            }
            Platform::Instagram => {
                let body: InstagramInsights = self
                    .get_json(
                        platform,
                        &format!(
                            "{}/{}?fields=followers_count,follows_count,media_count",
                            base, account.id
                        ),
                        access_token,
                    )
                    .await?;
                Ok(AccountInsights {
                    platform,
                    followers: body.followers_count,
                    following: body.follows_count,
                    post_count: body.media_count,
                    fetched_at: now,
                })
            }
        }
    }

    // ─── Request plumbing ────────────────────────────────────────────────

    /// Generic GET request with JSON response.
    async fn get_json<T: for<'de> Deserialize<'de>>(
        &self,
        platform: Platform,
        url: &str,
        access_token: &str,
    ) -> Result<T, AppError> {
        let mut request = self.http.get(url).bearer_auth(access_token);
        if platform == Platform::Reddit {
            request = request.header(reqwest::header::USER_AGENT, &self.reddit_user_agent);
        }

        let response = request
            .send()
            .await
            .map_err(|e| AppError::PlatformApi(e.to_string()))?;

        self.check_response_json(platform, response).await
    }

    /// Generic POST request with JSON body and JSON response.
    async fn post_json<T: for<'de> Deserialize<'de>>(
        &self,
        platform: Platform,
        url: &str,
        access_token: &str,
        body: &serde_json::Value,
    ) -> Result<T, AppError> {
        let mut request = self.http.post(url).bearer_auth(access_token).json(body);
        if platform == Platform::Reddit {
            request = request.header(reqwest::header::USER_AGENT, &self.reddit_user_agent);
        }

        let response = request
            .send()
            .await
            .map_err(|e| AppError::PlatformApi(e.to_string()))?;

        self.check_response_json(platform, response).await
    }

    /// Check response status and return error if not successful.
    async fn check_response(
        &self,
        platform: Platform,
        response: reqwest::Response,
    ) -> Result<(), AppError> {
        if response.status().is_success() {
            return Ok(());
        }

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(classify_error(platform, status, body))
    }

    /// Check response and parse JSON body.
    async fn check_response_json<T: for<'de> Deserialize<'de>>(
        &self,
        platform: Platform,
        response: reqwest::Response,
    ) -> Result<T, AppError> {
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(classify_error(platform, status, body));
        }

        response
            .json()
            .await
            .map_err(|e| AppError::PlatformApi(format!("JSON parse error: {}", e)))
    }
}

/// Map an upstream error response to a typed error.
fn classify_error(platform: Platform, status: reqwest::StatusCode, body: String) -> AppError {
    // Rate limit: callers may retry later
    if status.as_u16() == 429 {
        tracing::warn!(platform = %platform, "Platform rate limit hit (429)");
        return AppError::PlatformApi(AppError::PLATFORM_RATE_LIMIT.to_string());
    }

    // Unauthorized: token expired or revoked
    if status.as_u16() == 401 {
        return AppError::PlatformApi(AppError::PLATFORM_TOKEN_ERROR.to_string());
    }

    // Token endpoints report a consumed/raced refresh token in the body
    if body.contains("invalid_grant") {
        return AppError::PlatformApi(format!("invalid_grant: {}", body));
    }

    AppError::PlatformApi(format!("HTTP {}: {}", status, body))
}

// ─── Wire types ──────────────────────────────────────────────────────────

/// Token exchange response (all platforms normalize to this shape).
#[derive(Debug, Clone, Deserialize)]
pub struct TokenExchangeResponse {
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// Lifetime in seconds; platforms that omit it get a 1-hour default
    pub expires_in: Option<i64>,
    pub scope: Option<String>,
}

/// Token refresh response.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenRefreshResponse {
    pub access_token: String,
    /// Some platforms rotate the refresh token on every refresh
    pub refresh_token: Option<String>,
    pub expires_in: Option<i64>,
}

/// Minimal account identity shared by all platforms.
#[derive(Debug, Clone)]
pub struct PlatformProfile {
    pub id: String,
    pub username: Option<String>,
}

/// Follower/content counts for a connected account.
#[derive(Debug, Clone, serde::Serialize)]
pub struct AccountInsights {
    pub platform: Platform,
    pub followers: Option<u64>,
    pub following: Option<u64>,
    pub post_count: Option<u64>,
    pub fetched_at: String,
}

#[derive(Debug, Deserialize)]
struct TwitterEnvelope<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct TwitterUser {
    id: String,
    username: String,
}

#[derive(Debug, Deserialize)]
struct TwitterTweet {
    id: String,
}

#[derive(Debug, Deserialize)]
struct TwitterUserMetrics {
    #[serde(rename = "public_metrics")]
    public_metrics: TwitterPublicMetrics,
}

#[derive(Debug, Deserialize)]
struct TwitterPublicMetrics {
    followers_count: u64,
    following_count: u64,
    tweet_count: u64,
}

#[derive(Debug, Deserialize)]
struct LinkedinUserinfo {
    sub: String,
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LinkedinPostResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LinkedinNetworkSize {
    first_degree_size: u64,
}

#[derive(Debug, Deserialize)]
struct RedditIdentity {
    id: String,
    name: String,
    subreddit: Option<RedditSubreddit>,
}

#[derive(Debug, Deserialize)]
struct RedditSubreddit {
    subscribers: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RedditSubmitResponse {
    json: RedditSubmitJson,
}

#[derive(Debug, Deserialize)]
struct RedditSubmitJson {
    data: Option<RedditSubmitData>,
}

#[derive(Debug, Deserialize)]
struct RedditSubmitData {
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InstagramProfile {
    user_id: String,
    username: String,
}

#[derive(Debug, Deserialize)]
struct InstagramContainer {
    id: String,
}

#[derive(Debug, Deserialize)]
struct InstagramInsights {
    followers_count: Option<u64>,
    follows_count: Option<u64>,
    media_count: Option<u64>,
}

// ─────────────────────────────────────────────────────────────────────────
// SocialService - High-level service with token management
// ─────────────────────────────────────────────────────────────────────────

use crate::db::FirestoreDb;
use crate::models::PlatformTokens;
use crate::services::KmsService;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Margin before token expiration when we proactively refresh (5 minutes).
const TOKEN_REFRESH_MARGIN_SECS: i64 = 5 * 60;

/// How long account insights are served from cache (15 minutes).
const INSIGHTS_CACHE_TTL_SECS: i64 = 15 * 60;

/// Cached access token with expiry information.
#[derive(Clone)]
pub struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

/// Cache key: one entry per (user, platform) connection.
pub type AccountKey = (String, Platform);

/// Shared token cache type for use in AppState.
pub type TokenCache = Arc<DashMap<AccountKey, CachedToken>>;

/// Shared refresh locks type for use in AppState.
pub type RefreshLocks = Arc<DashMap<AccountKey, Arc<Mutex<()>>>>;

/// Cached insights entry.
#[derive(Clone)]
struct CachedInsights {
    insights: AccountInsights,
    expires_at: DateTime<Utc>,
}

/// Result of handling an OAuth connect callback.
#[derive(Debug, Clone)]
pub struct ConnectResult {
    pub platform: Platform,
    pub platform_user_id: String,
    pub platform_username: Option<String>,
}

/// High-level social service that manages token lifecycle and API calls.
///
/// This service encapsulates:
/// - Token retrieval and decryption from Firestore
/// - Automatic token refresh when expiring (with 5-minute margin)
/// - Re-encryption and storage of refreshed tokens
/// - In-memory token caching to reduce KMS calls
/// - Per-account locking to prevent duplicate refresh calls
/// - All platform API calls
#[derive(Clone)]
pub struct SocialService {
    client: PlatformClient,
    db: FirestoreDb,
    kms: KmsService,
    /// In-memory cache of decrypted access tokens (shared across requests).
    token_cache: TokenCache,
    /// Per-account mutex to serialize token refresh operations.
    refresh_locks: RefreshLocks,
    /// Account insights cache.
    insights_cache: Arc<DashMap<AccountKey, CachedInsights>>,
}

impl SocialService {
    /// Create a new social service with shared token cache.
    ///
    /// The `token_cache` and `refresh_locks` should be shared across all
    /// `SocialService` instances to enable caching within an instance.
    pub fn new(
        config: &Config,
        db: FirestoreDb,
        kms: KmsService,
        token_cache: TokenCache,
        refresh_locks: RefreshLocks,
    ) -> Self {
        Self {
            client: PlatformClient::new(config),
            db,
            kms,
            token_cache,
            refresh_locks,
            insights_cache: Arc::new(DashMap::new()),
        }
    }

    /// Access the low-level client (for authorize URLs).
    pub fn client(&self) -> &PlatformClient {
        &self.client
    }

    // ─── Token Management ────────────────────────────────────────────────

    /// Get a valid (non-expired) access token for a connected account.
    ///
    /// This method uses a multi-layer strategy:
    /// 1. Check in-memory cache (fast path - no I/O)
    /// 2. Acquire per-account lock to prevent duplicate refresh calls
    /// 3. Re-check cache after lock (another task may have refreshed)
    /// 4. Fetch from Firestore and decrypt only the access token (lazy)
    /// 5. If token is valid, cache and return
    /// 6. If expired, decrypt refresh token and refresh with the platform
    /// 7. Handle cross-instance races via re-read on invalid_grant
    pub async fn get_valid_access_token(
        &self,
        user_id: &str,
        platform: Platform,
    ) -> Result<String, AppError> {
        let key: AccountKey = (user_id.to_string(), platform);
        let now = Utc::now();
        let margin = Duration::seconds(TOKEN_REFRESH_MARGIN_SECS);

        // STEP 1: Check cache (fast path - no I/O)
        if let Some(cached) = self.token_cache.get(&key) {
            if now + margin < cached.expires_at {
                return Ok(cached.access_token.clone());
            }
            // Token expired or expiring soon - fall through to refresh
        }

        // STEP 2: Acquire per-account refresh lock. Only one task per
        // account performs the refresh; others wait here.
        let lock = self
            .refresh_locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let _guard = lock.lock().await;

        // STEP 3: Re-check cache after acquiring lock (double-check).
        if let Some(cached) = self.token_cache.get(&key) {
            if now + margin < cached.expires_at {
                return Ok(cached.access_token.clone());
            }
        }

        // STEP 4: Fetch from Firestore and decrypt (lazy - access only)
        let tokens = self
            .db
            .get_platform_tokens(user_id, platform)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!("{} connection for user {}", platform, user_id))
            })?;

        let access_token = self.kms.decrypt(&tokens.access_token_encrypted).await?;

        let expires_at = DateTime::parse_from_rfc3339(&tokens.expires_at)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to parse expiry: {}", e)))?
            .with_timezone(&Utc);

        // STEP 5: Token still valid - cache and return
        if now + margin < expires_at {
            self.token_cache.insert(
                key,
                CachedToken {
                    access_token: access_token.clone(),
                    expires_at,
                },
            );
            return Ok(access_token);
        }

        // STEP 6: Token expired - refresh if the platform gave us a
        // refresh token; otherwise the connection is dead.
        tracing::info!(user_id, platform = %platform, "Access token expired, refreshing");

        let Some(refresh_encrypted) = tokens.refresh_token_encrypted.as_deref() else {
            return Err(AppError::PlatformApi(
                AppError::PLATFORM_TOKEN_ERROR.to_string(),
            ));
        };

        let refresh_token = self.kms.decrypt(refresh_encrypted).await?;

        // Cross-instance race: if another instance already refreshed, the
        // platform rejects our old refresh token. Fetch the winner's tokens.
        let new_tokens = match self.client.refresh_token(platform, &refresh_token).await {
            Ok(t) => t,
            Err(AppError::PlatformApi(ref msg)) if msg.contains("invalid_grant") => {
                tracing::info!(
                    user_id,
                    platform = %platform,
                    "Refresh token race detected - another instance won, fetching their tokens"
                );
                return self.fetch_and_cache_from_db(user_id, platform).await;
            }
            Err(e) => return Err(e),
        };

        // STEP 7: Encrypt and store new tokens
        let rotated_refresh = new_tokens
            .refresh_token
            .as_deref()
            .or(Some(refresh_token.as_str()));
        let (new_enc_access, new_enc_refresh) = crate::services::kms::encrypt_tokens(
            &self.kms,
            &new_tokens.access_token,
            rotated_refresh,
        )
        .await?;

        let new_expires_at = now + Duration::seconds(new_tokens.expires_in.unwrap_or(3600));

        let updated_tokens = PlatformTokens {
            access_token_encrypted: new_enc_access,
            refresh_token_encrypted: new_enc_refresh,
            expires_at: new_expires_at.to_rfc3339(),
            ..tokens
        };

        self.db.set_platform_tokens(&updated_tokens).await?;

        // STEP 8: Update cache with new token
        self.token_cache.insert(
            key,
            CachedToken {
                access_token: new_tokens.access_token.clone(),
                expires_at: new_expires_at,
            },
        );

        tracing::info!(user_id, platform = %platform, "Token refreshed and cached");
        Ok(new_tokens.access_token)
    }

    /// Fetch fresh tokens from Firestore (after cross-instance race) and cache.
    async fn fetch_and_cache_from_db(
        &self,
        user_id: &str,
        platform: Platform,
    ) -> Result<String, AppError> {
        let tokens = self
            .db
            .get_platform_tokens(user_id, platform)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!("{} connection for user {}", platform, user_id))
            })?;

        let access_token = self.kms.decrypt(&tokens.access_token_encrypted).await?;

        let expires_at = DateTime::parse_from_rfc3339(&tokens.expires_at)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to parse expiry: {}", e)))?
            .with_timezone(&Utc);

        self.token_cache.insert(
            (user_id.to_string(), platform),
            CachedToken {
                access_token: access_token.clone(),
                expires_at,
            },
        );

        Ok(access_token)
    }

    // ─── OAuth Callback Handling ─────────────────────────────────────────

    /// Handle a connect callback: exchange the code, fetch the account
    /// profile, encrypt and store the tokens.
    pub async fn handle_connect_callback(
        &self,
        user_id: &str,
        platform: Platform,
        code: &str,
        callback_url: &str,
        code_verifier: Option<&str>,
    ) -> Result<ConnectResult, AppError> {
        let token_response = self
            .client
            .exchange_code(platform, code, callback_url, code_verifier)
            .await?;

        // Identify the connected account while the token is in hand
        let profile = self
            .client
            .fetch_profile(platform, &token_response.access_token)
            .await?;

        let now = Utc::now();
        let expires_at = now + Duration::seconds(token_response.expires_in.unwrap_or(3600));

        let (enc_access, enc_refresh) = crate::services::kms::encrypt_tokens(
            &self.kms,
            &token_response.access_token,
            token_response.refresh_token.as_deref(),
        )
        .await?;

        let scopes = token_response
            .scope
            .as_deref()
            .map(|s| {
                s.split([' ', ','])
                    .filter(|p| !p.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_else(|| {
                default_scopes(platform)
                    .iter()
                    .map(|s| s.to_string())
                    .collect()
            });

        let tokens = PlatformTokens {
            user_id: user_id.to_string(),
            platform,
            access_token_encrypted: enc_access,
            refresh_token_encrypted: enc_refresh,
            expires_at: expires_at.to_rfc3339(),
            scopes,
            platform_user_id: profile.id.clone(),
            platform_username: profile.username.clone(),
            connected_at: now.to_rfc3339(),
        };

        self.db.set_platform_tokens(&tokens).await?;

        // Seed the cache so the first API call skips KMS
        self.token_cache.insert(
            (user_id.to_string(), platform),
            CachedToken {
                access_token: token_response.access_token,
                expires_at,
            },
        );

        tracing::info!(
            user_id,
            platform = %platform,
            platform_user_id = %profile.id,
            "Platform connected, tokens stored"
        );

        Ok(ConnectResult {
            platform,
            platform_user_id: profile.id,
            platform_username: profile.username,
        })
    }

    // ─── API Wrappers ────────────────────────────────────────────────────

    /// Publish a text post for the user on the given platform.
    pub async fn publish(
        &self,
        user_id: &str,
        platform: Platform,
        text: &str,
    ) -> Result<String, AppError> {
        let access_token = self.get_valid_access_token(user_id, platform).await?;
        let account = self.stored_profile(user_id, platform).await?;
        self.client
            .create_post(platform, &access_token, &account, text)
            .await
    }

    /// Account insights, served from a 15-minute cache.
    pub async fn account_insights(
        &self,
        user_id: &str,
        platform: Platform,
    ) -> Result<AccountInsights, AppError> {
        let key: AccountKey = (user_id.to_string(), platform);
        let now = Utc::now();

        if let Some(cached) = self.insights_cache.get(&key) {
            if now < cached.expires_at {
                return Ok(cached.insights.clone());
            }
        }

        let access_token = self.get_valid_access_token(user_id, platform).await?;
        let account = self.stored_profile(user_id, platform).await?;
        let insights = self
            .client
            .fetch_insights(platform, &access_token, &account)
            .await?;

        self.insights_cache.insert(
            key,
            CachedInsights {
                insights: insights.clone(),
                expires_at: now + Duration::seconds(INSIGHTS_CACHE_TTL_SECS),
            },
        );

        Ok(insights)
    }

    /// Disconnect a platform: revoke upstream (best effort), delete
    /// stored tokens, drop cache entries.
    pub async fn disconnect(&self, user_id: &str, platform: Platform) -> Result<(), AppError> {
        let key: AccountKey = (user_id.to_string(), platform);

        // Get a usable token for revocation before deleting
        let token = match self.get_valid_access_token(user_id, platform).await {
            Ok(t) => Some(t),
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    user_id,
                    platform = %platform,
                    "Could not obtain token for revocation (continuing with deletion)"
                );
                None
            }
        };

        // Delete tokens first to block concurrent use
        self.db.delete_platform_tokens(user_id, platform).await?;
        self.token_cache.remove(&key);
        self.insights_cache.remove(&key);
        self.refresh_locks.remove(&key);

        if let Some(token) = token {
            if let Err(e) = self.client.revoke(platform, &token).await {
                tracing::warn!(
                    error = %e,
                    user_id,
                    platform = %platform,
                    "Upstream revocation failed (tokens already deleted locally)"
                );
            }
        }

        tracing::info!(user_id, platform = %platform, "Platform disconnected");
        Ok(())
    }

    /// Disconnect every connected platform (account deletion).
    pub async fn disconnect_all(&self, user_id: &str) -> Result<(), AppError> {
        for tokens in self.db.list_platform_tokens(user_id).await? {
            if let Err(e) = self.disconnect(user_id, tokens.platform).await {
                tracing::warn!(
                    error = %e,
                    user_id,
                    platform = %tokens.platform,
                    "Failed to disconnect platform during account deletion"
                );
            }
        }
        Ok(())
    }

    /// The stored platform identity for a connection.
    async fn stored_profile(
        &self,
        user_id: &str,
        platform: Platform,
    ) -> Result<PlatformProfile, AppError> {
        let tokens = self
            .db
            .get_platform_tokens(user_id, platform)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!("{} connection for user {}", platform, user_id))
            })?;

        Ok(PlatformProfile {
            id: tokens.platform_user_id,
            username: tokens.platform_username,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_client() -> PlatformClient {
        PlatformClient::new(&Config::test_default())
    }

    #[test]
    fn test_authorize_url_contains_state_and_scopes() {
        let client = test_client();
        let url = client.authorize_url(
            Platform::Linkedin,
            "http://localhost:8080/auth/connect/linkedin/callback",
            "signed-state",
            None,
        );

        assert!(url.starts_with("https://www.linkedin.com/oauth/v2/authorization?"));
        assert!(url.contains("state=signed-state"));
        assert!(url.contains("w_member_social"));
        assert!(url.contains("response_type=code"));
    }

    #[test]
    fn test_reddit_authorize_url_requests_permanent_token() {
        let client = test_client();
        let url = client.authorize_url(Platform::Reddit, "http://cb", "s", None);
        assert!(url.contains("duration=permanent"));
    }

    #[test]
    fn test_twitter_authorize_url_carries_pkce_challenge() {
        let client = test_client();
        let url = client.authorize_url(Platform::Twitter, "http://cb", "s", Some("challenge123"));
        assert!(url.contains("code_challenge=challenge123"));
        assert!(url.contains("code_challenge_method=plain"));

        let without = client.authorize_url(Platform::Twitter, "http://cb", "s", None);
        assert!(!without.contains("code_challenge"));
    }

    #[test]
    fn test_classify_error_sentinels() {
        let rate_limited = classify_error(
            Platform::Twitter,
            reqwest::StatusCode::TOO_MANY_REQUESTS,
            String::new(),
        );
        assert!(matches!(
            rate_limited,
            AppError::PlatformApi(ref m) if m == AppError::PLATFORM_RATE_LIMIT
        ));

        let unauthorized = classify_error(
            Platform::Reddit,
            reqwest::StatusCode::UNAUTHORIZED,
            String::new(),
        );
        assert!(unauthorized.is_platform_token_error());

        let raced = classify_error(
            Platform::Twitter,
            reqwest::StatusCode::BAD_REQUEST,
            r#"{"error":"invalid_grant"}"#.to_string(),
        );
        assert!(matches!(
            raced,
            AppError::PlatformApi(ref m) if m.contains("invalid_grant")
        ));
    }
}
