// SPDX-License-Identifier: MIT

use postforge::config::Config;
use postforge::db::FirestoreDb;
use postforge::routes::create_router;
use postforge::services::{
    GamificationService, GoogleIdVerifier, KmsService, PostPublisher, ResearchService,
    SocialService, TierService,
};
use postforge::AppState;
use std::sync::Arc;

/// Check if emulator is available via environment variable.
#[allow(dead_code)]
pub fn emulator_available() -> bool {
    std::env::var("FIRESTORE_EMULATOR_HOST").is_ok()
}

/// Skip test with message if emulator not available.
#[macro_export]
macro_rules! require_emulator {
    () => {
        if !crate::common::emulator_available() {
            eprintln!("⚠️  Skipping: FIRESTORE_EMULATOR_HOST not set");
            return;
        }
    };
}

/// Create a test database connection.
#[allow(dead_code)]
pub async fn test_db() -> FirestoreDb {
    FirestoreDb::new("test-project")
        .await
        .expect("Failed to connect to Firestore emulator")
}

/// Create a mock database connection (offline).
#[allow(dead_code)]
pub fn test_db_offline() -> FirestoreDb {
    FirestoreDb::new_mock()
}

/// Create a test app with offline mock dependencies.
/// Returns the router and the shared state.
#[allow(dead_code)]
pub fn create_test_app() -> (axum::Router, Arc<AppState>) {
    let config = Config::test_default();
    let db = test_db_offline();

    let google_verifier =
        Arc::new(GoogleIdVerifier::new(&config).expect("Failed to build verifier"));

    let kms = KmsService::new_mock();
    let token_cache = Arc::new(dashmap::DashMap::new());
    let refresh_locks = Arc::new(dashmap::DashMap::new());

    let social_service =
        SocialService::new(&config, db.clone(), kms, token_cache, refresh_locks);
    let tier_service = TierService::new(&config, db.clone());
    let gamification = GamificationService::new(db.clone());
    let research_service = ResearchService::new(&config);
    let publisher = PostPublisher::new(social_service.clone(), gamification.clone(), db.clone());

    let state = Arc::new(AppState {
        config,
        db,
        google_verifier,
        social_service,
        tier_service,
        gamification,
        research_service,
        publisher,
    });

    (create_router(state.clone()), state)
}
