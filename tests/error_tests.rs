// SPDX-License-Identifier: MIT

use axum::http::StatusCode;
use axum::response::IntoResponse;
use postforge::error::AppError;

#[test]
fn test_is_platform_token_error_matches() {
    let err = AppError::PlatformApi(AppError::PLATFORM_TOKEN_ERROR.to_string());
    assert!(err.is_platform_token_error());

    let err = AppError::PlatformApi("invalid_grant: refresh token consumed".to_string());
    assert!(err.is_platform_token_error());
}

#[test]
fn test_is_platform_token_error_no_match() {
    let err = AppError::PlatformApi(AppError::PLATFORM_RATE_LIMIT.to_string());
    assert!(!err.is_platform_token_error());

    let err = AppError::BadRequest("Bad Request".to_string());
    assert!(!err.is_platform_token_error());
}

#[test]
fn test_error_status_codes() {
    let cases = [
        (AppError::Unauthorized, StatusCode::UNAUTHORIZED),
        (AppError::InvalidToken, StatusCode::UNAUTHORIZED),
        (AppError::TierRequired("premium"), StatusCode::FORBIDDEN),
        (AppError::QuotaExceeded("posts"), StatusCode::TOO_MANY_REQUESTS),
        (
            AppError::NotFound("x".to_string()),
            StatusCode::NOT_FOUND,
        ),
        (
            AppError::BadRequest("x".to_string()),
            StatusCode::BAD_REQUEST,
        ),
        (
            AppError::PlatformApi("x".to_string()),
            StatusCode::BAD_GATEWAY,
        ),
        (
            AppError::Upstream("x".to_string()),
            StatusCode::BAD_GATEWAY,
        ),
        (
            AppError::Database("x".to_string()),
            StatusCode::INTERNAL_SERVER_ERROR,
        ),
    ];

    for (error, expected) in cases {
        let response = error.into_response();
        assert_eq!(response.status(), expected);
    }
}
