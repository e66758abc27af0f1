// SPDX-License-Identifier: MIT

//! PostForge API Server
//!
//! Publishes posts to connected social platforms, derives subscription
//! tiers from on-chain token balances, and tracks posting streaks.

use postforge::{
    config::Config,
    db::FirestoreDb,
    services::{
        GamificationService, GoogleIdVerifier, KmsService, PostPublisher, ResearchService,
        SocialService, TierService,
    },
    AppState,
};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured JSON logging for GCP
    init_logging();

    // Load configuration from environment
    let config = Config::from_env().expect("Failed to load configuration");
    tracing::info!(port = config.port, "Starting PostForge API");

    // Initialize Firestore database
    let db = FirestoreDb::new(&config.gcp_project_id)
        .await
        .expect("Failed to connect to Firestore");

    // Initialize Google Sign-In verifier
    let google_verifier =
        Arc::new(GoogleIdVerifier::new(&config).expect("Failed to initialize OIDC verifier"));

    // Initialize KMS service
    let kms = KmsService::new(&config.gcp_project_id, &config.gcp_region, "token-encryption")
        .await
        .expect("Failed to initialize KMS service");
    tracing::info!("KMS service initialized");

    // Initialize shared token cache and refresh locks
    // These are shared across all SocialService instances within this instance
    let token_cache = Arc::new(dashmap::DashMap::new());
    let refresh_locks = Arc::new(dashmap::DashMap::new());
    tracing::info!("Token cache initialized");

    // Initialize services
    let social_service = SocialService::new(&config, db.clone(), kms, token_cache, refresh_locks);
    let tier_service = TierService::new(&config, db.clone());
    let gamification = GamificationService::new(db.clone());
    let research_service = ResearchService::new(&config);
    let publisher = PostPublisher::new(social_service.clone(), gamification.clone(), db.clone());

    // Build shared state
    let state = Arc::new(AppState {
        config: config.clone(),
        db,
        google_verifier,
        social_service,
        tier_service,
        gamification,
        research_service,
        publisher,
    });

    // Build router
    let app = postforge::routes::create_router(state);

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(address = %addr, "Server listening");

    axum::serve(listener, app).await?;
    Ok(())
}

/// Initialize structured JSON logging (GCP-compliant).
fn init_logging() {
    let format = tracing_subscriber::fmt::layer()
        .json()
        .with_target(false)
        .with_current_span(true)
        .flatten_event(true);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("postforge=debug".parse().unwrap())
                .add_directive("info".parse().unwrap()),
        )
        .with(format)
        .init();
}
