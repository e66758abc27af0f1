// SPDX-License-Identifier: MIT

//! Webhook endpoint security and dispatch tests.
//!
//! These run against the offline test app: they verify the path-uuid and
//! shared-secret defenses and that non-matching payloads are acknowledged
//! without touching any state.

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
};
use tower::ServiceExt;

mod common;

fn webhook_request(uuid: &str, auth: Option<&str>, body: &str) -> Request<Body> {
    let mut builder = Request::builder()
        .method(Method::POST)
        .uri(format!("/webhook/helius/{}", uuid))
        .header(header::CONTENT_TYPE, "application/json");

    if let Some(auth) = auth {
        builder = builder.header(header::AUTHORIZATION, auth);
    }

    builder.body(Body::from(body.to_string())).unwrap()
}

#[tokio::test]
async fn test_webhook_wrong_uuid_is_404() {
    let (app, state) = common::create_test_app();

    let response = app
        .oneshot(webhook_request(
            "wrong-uuid",
            Some(&state.config.helius_webhook_secret),
            "[]",
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_webhook_missing_auth_is_403() {
    let (app, state) = common::create_test_app();
    let uuid = state.config.webhook_path_uuid.clone();

    let response = app
        .oneshot(webhook_request(&uuid, None, "[]"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_webhook_wrong_secret_is_403() {
    let (app, state) = common::create_test_app();
    let uuid = state.config.webhook_path_uuid.clone();

    let response = app
        .oneshot(webhook_request(&uuid, Some("not-the-secret"), "[]"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_webhook_empty_batch_acknowledged() {
    let (app, state) = common::create_test_app();
    let uuid = state.config.webhook_path_uuid.clone();

    let response = app
        .oneshot(webhook_request(
            &uuid,
            Some(&state.config.helius_webhook_secret),
            "[]",
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_webhook_unparseable_payload_still_acknowledged() {
    // A malformed body must not trigger Helius retries
    let (app, state) = common::create_test_app();
    let uuid = state.config.webhook_path_uuid.clone();

    let response = app
        .oneshot(webhook_request(
            &uuid,
            Some(&state.config.helius_webhook_secret),
            r#"{"unexpected": "shape"}"#,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_webhook_foreign_mint_transfers_ignored() {
    // Transfers of other tokens never reach the tier service (which would
    // error against the offline DB); the batch is simply acknowledged.
    let (app, state) = common::create_test_app();
    let uuid = state.config.webhook_path_uuid.clone();

    let body = r#"[{
        "type": "TRANSFER",
        "signature": "sig1",
        "tokenTransfers": [{
            "mint": "SomeOtherMint111111111111111111111111111111",
            "fromUserAccount": "walletA",
            "toUserAccount": "walletB"
        }]
    }]"#;

    let response = app
        .oneshot(webhook_request(
            &uuid,
            Some(&state.config.helius_webhook_secret),
            body,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}
