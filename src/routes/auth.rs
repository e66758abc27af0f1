// SPDX-License-Identifier: MIT

//! Authentication routes: Google sign-in and platform OAuth connect flows.

use axum::{
    extract::{Path, Query, State},
    response::Redirect,
    routing::{get, post},
    Extension, Json, Router,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{AppError, Result};
use crate::middleware::auth::{create_jwt, AuthUser, SESSION_COOKIE};
use crate::models::{Platform, User};
use crate::services::OidcError;
use crate::AppState;

// Type alias for HMAC-SHA256
type HmacSha256 = Hmac<Sha256>;

/// Public auth routes (no session required).
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/auth/google", post(google_sign_in))
        .route("/auth/logout", get(logout))
}

/// Platform connect routes (session required; wrapped with `require_auth`
/// in routes/mod.rs).
pub fn connect_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/auth/connect/{platform}", get(connect_start))
        .route("/auth/connect/{platform}/callback", get(connect_callback))
}

// ─── Google Sign-In ──────────────────────────────────────────

/// Request body for Google sign-in.
#[derive(Deserialize)]
pub struct GoogleSignInRequest {
    /// Google-issued ID token (the Sign-In "credential")
    pub id_token: String,
}

/// Response for a successful sign-in.
#[derive(Serialize)]
pub struct SignInResponse {
    pub token: String,
    pub user_id: String,
    pub email: String,
    pub display_name: String,
}

/// Verify a Google ID token, upsert the user, and mint a session JWT.
///
/// The JWT is returned in the body and also set as the session cookie.
async fn google_sign_in(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(body): Json<GoogleSignInRequest>,
) -> Result<(CookieJar, Json<SignInResponse>)> {
    let verified = state
        .google_verifier
        .verify_id_token(&body.id_token)
        .await
        .map_err(|e| match e {
            OidcError::Forbidden(msg) => {
                tracing::warn!(reason = %msg, "Google ID token rejected");
                AppError::InvalidToken
            }
            OidcError::Transient(msg) => {
                AppError::Internal(anyhow::anyhow!("OIDC verification unavailable: {}", msg))
            }
        })?;

    let now = chrono::Utc::now().to_rfc3339();
    let display_name = verified
        .name
        .clone()
        .unwrap_or_else(|| verified.email.clone());

    // Preserve created_at for returning users
    let user = match state.db.get_user(&verified.subject).await? {
        Some(mut existing) => {
            existing.email = verified.email.clone();
            existing.display_name = display_name.clone();
            existing.picture = verified.picture.clone();
            existing.last_active = now.clone();
            existing
        }
        None => User {
            user_id: verified.subject.clone(),
            email: verified.email.clone(),
            display_name: display_name.clone(),
            picture: verified.picture.clone(),
            created_at: now.clone(),
            last_active: now,
            deletion_requested_at: None,
        },
    };

    state.db.upsert_user(&user).await?;

    let jwt = create_jwt(&user.user_id, &state.config.jwt_signing_key)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("JWT creation failed: {}", e)))?;

    tracing::info!(user_id = %user.user_id, "User signed in");

    let cookie = session_cookie(jwt.clone());

    Ok((
        jar.add(cookie),
        Json(SignInResponse {
            token: jwt,
            user_id: user.user_id,
            email: user.email,
            display_name: user.display_name,
        }),
    ))
}

/// Build the session cookie for a freshly minted JWT.
fn session_cookie(jwt: String) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, jwt))
        .path("/")
        .http_only(true)
        .secure(true)
        .same_site(SameSite::Lax)
        .max_age(time::Duration::days(30))
        .build()
}

/// Logout - clear the session cookie.
async fn logout(State(state): State<Arc<AppState>>, jar: CookieJar) -> (CookieJar, Redirect) {
    let removal = Cookie::build((SESSION_COOKIE, ""))
        .path("/")
        .max_age(time::Duration::ZERO)
        .build();

    (
        jar.add(removal),
        Redirect::temporary(&state.config.frontend_url),
    )
}

// ─── Platform Connect Flow ───────────────────────────────────

/// Query parameters for starting a connect flow.
#[derive(Deserialize)]
pub struct ConnectStartParams {
    /// Frontend URL to redirect back to after OAuth completes.
    /// If not provided, uses FRONTEND_URL config.
    #[serde(default)]
    redirect_uri: Option<String>,
}

/// Start a platform OAuth flow - redirect to the platform's consent page.
async fn connect_start(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(platform): Path<String>,
    Query(params): Query<ConnectStartParams>,
) -> Result<Redirect> {
    let platform = parse_platform(&platform)?;

    let frontend_url = params
        .redirect_uri
        .unwrap_or_else(|| state.config.frontend_url.clone());

    let oauth_state = sign_state(&user.user_id, &frontend_url, &state.config.oauth_state_key)?;

    let callback_url = callback_url(&state.config.api_url, platform);

    // Twitter requires PKCE; the verifier is derived from the signed state
    // so the callback can recompute it without server-side storage.
    let code_challenge = if platform == Platform::Twitter {
        Some(pkce_verifier(&state.config.oauth_state_key, &oauth_state))
    } else {
        None
    };

    let auth_url = state.social_service.client().authorize_url(
        platform,
        &callback_url,
        &oauth_state,
        code_challenge.as_deref(),
    );

    tracing::info!(
        user_id = %user.user_id,
        platform = %platform,
        "Starting connect flow, redirecting to platform"
    );

    Ok(Redirect::temporary(&auth_url))
}

#[derive(Deserialize)]
pub struct CallbackParams {
    #[serde(default)]
    code: Option<String>,
    state: String,
    #[serde(default)]
    error: Option<String>,
}

/// OAuth callback - exchange code for tokens and store the connection.
async fn connect_callback(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(platform): Path<String>,
    Query(params): Query<CallbackParams>,
) -> Result<Redirect> {
    let platform = parse_platform(&platform)?;

    // Decode and verify the state parameter
    let decoded = verify_and_decode_state(&params.state, &state.config.oauth_state_key);
    let Some((state_user_id, frontend_url)) = decoded else {
        tracing::warn!("Invalid or tampered state parameter on connect callback");
        return Err(AppError::BadRequest("Invalid state parameter".to_string()));
    };

    // The state must belong to the session user
    if state_user_id != user.user_id {
        tracing::warn!(
            session_user = %user.user_id,
            state_user = %state_user_id,
            "Connect callback state/session user mismatch"
        );
        return Err(AppError::BadRequest("State does not match session".to_string()));
    }

    // Platform-reported errors (user denied, etc.) go back to the frontend
    if let Some(error) = params.error {
        tracing::warn!(platform = %platform, error = %error, "OAuth error from platform");
        let redirect = format!("{}/connections?error={}", frontend_url, error);
        return Ok(Redirect::temporary(&redirect));
    }

    let Some(code) = params.code else {
        return Err(AppError::BadRequest("Missing authorization code".to_string()));
    };

    let callback_url = callback_url(&state.config.api_url, platform);
    let code_verifier = if platform == Platform::Twitter {
        Some(pkce_verifier(&state.config.oauth_state_key, &params.state))
    } else {
        None
    };

    let result = state
        .social_service
        .handle_connect_callback(
            &user.user_id,
            platform,
            &code,
            &callback_url,
            code_verifier.as_deref(),
        )
        .await?;

    tracing::info!(
        user_id = %user.user_id,
        platform = %platform,
        platform_user_id = %result.platform_user_id,
        "Platform connected"
    );

    let redirect = format!("{}/connections?connected={}", frontend_url, platform);
    Ok(Redirect::temporary(&redirect))
}

fn parse_platform(raw: &str) -> Result<Platform> {
    Platform::parse(raw)
        .ok_or_else(|| AppError::BadRequest(format!("Unknown platform: {}", raw)))
}

fn callback_url(api_url: &str, platform: Platform) -> String {
    format!(
        "{}/auth/connect/{}/callback",
        api_url.trim_end_matches('/'),
        platform
    )
}

// ─── Signed State ────────────────────────────────────────────

/// Sign `user_id` and `frontend_url` into an opaque OAuth state value.
///
/// Format inside the base64: "user_id|frontend_url|timestamp_hex|signature_hex".
fn sign_state(user_id: &str, frontend_url: &str, secret: &[u8]) -> Result<String> {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("System time error: {}", e)))?
        .as_millis();

    let state_payload = format!("{}|{}|{:x}", user_id, frontend_url, timestamp);

    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("HMAC init failed: {}", e)))?;
    mac.update(state_payload.as_bytes());
    let signature = mac.finalize().into_bytes();

    let signed_state = format!("{}|{}", state_payload, hex::encode(signature));

    Ok(URL_SAFE_NO_PAD.encode(signed_state.as_bytes()))
}

/// Verify the HMAC signature and decode (user_id, frontend_url) from the
/// OAuth state parameter.
fn verify_and_decode_state(state: &str, secret: &[u8]) -> Option<(String, String)> {
    let bytes = URL_SAFE_NO_PAD.decode(state).ok()?;
    let state_str = String::from_utf8(bytes).ok()?;

    // Format is "user_id|frontend_url|timestamp_hex|signature_hex"
    let parts: Vec<&str> = state_str.splitn(4, '|').collect();
    if parts.len() != 4 {
        return None;
    }

    let user_id = parts[0];
    let frontend_url = parts[1];
    let timestamp_hex = parts[2];
    let signature_hex = parts[3];

    // Reconstruct payload and verify signature
    let payload = format!("{}|{}|{}", user_id, frontend_url, timestamp_hex);

    let mut mac = HmacSha256::new_from_slice(secret).ok()?;
    mac.update(payload.as_bytes());

    let expected_signature = hex::encode(mac.finalize().into_bytes());

    if signature_hex != expected_signature {
        tracing::error!("OAuth state signature mismatch! Potential tampering.");
        return None;
    }

    Some((user_id.to_string(), frontend_url.to_string()))
}

/// Derive the PKCE code verifier from the signed state.
///
/// Deterministic, so the callback recomputes the same value the consent
/// redirect was built with; nothing is stored server-side between the two.
fn pkce_verifier(secret: &[u8], signed_state: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(b"pkce|");
    mac.update(signed_state.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_and_verify_state_roundtrip() {
        let secret = b"secret_key";
        let state = sign_state("user-42", "https://example.com", secret).unwrap();

        let result = verify_and_decode_state(&state, secret);
        assert_eq!(
            result,
            Some(("user-42".to_string(), "https://example.com".to_string()))
        );
    }

    #[test]
    fn test_verify_and_decode_state_invalid_signature() {
        let secret = b"secret_key";
        let state_data = "user-42|https://example.com|1a2b3c|invalid_signature";
        let encoded_state = URL_SAFE_NO_PAD.encode(state_data.as_bytes());

        let result = verify_and_decode_state(&encoded_state, secret);
        assert_eq!(result, None);
    }

    #[test]
    fn test_verify_and_decode_state_wrong_secret() {
        let secret = b"secret_key";
        let state = sign_state("user-42", "https://example.com", secret).unwrap();

        let result = verify_and_decode_state(&state, b"wrong_key");
        assert_eq!(result, None);
    }

    #[test]
    fn test_verify_and_decode_state_malformed() {
        let secret = b"secret_key";
        let encoded_state = URL_SAFE_NO_PAD.encode("invalid|format");
        let result = verify_and_decode_state(&encoded_state, secret);
        assert_eq!(result, None);
    }

    #[test]
    fn test_pkce_verifier_deterministic() {
        let secret = b"secret_key";
        let state = sign_state("user-42", "https://example.com", secret).unwrap();

        let v1 = pkce_verifier(secret, &state);
        let v2 = pkce_verifier(secret, &state);
        assert_eq!(v1, v2);

        let other_state = sign_state("user-43", "https://example.com", secret).unwrap();
        assert_ne!(v1, pkce_verifier(secret, &other_state));
    }

    #[test]
    fn test_callback_url_trims_trailing_slash() {
        assert_eq!(
            callback_url("http://localhost:8080/", Platform::Reddit),
            "http://localhost:8080/auth/connect/reddit/callback"
        );
    }
}
