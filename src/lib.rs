// SPDX-License-Identifier: MIT

//! PostForge: social media automation backend
//!
//! This crate provides the backend API for publishing posts across
//! connected social platforms, with token-gated subscription tiers,
//! posting streaks and achievements, and research aggregation.

pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod time_utils;

use config::Config;
use db::FirestoreDb;
use services::{
    GamificationService, GoogleIdVerifier, PostPublisher, ResearchService, SocialService,
    TierService,
};
use std::sync::Arc;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub db: FirestoreDb,
    pub google_verifier: Arc<GoogleIdVerifier>,
    pub social_service: SocialService,
    pub tier_service: TierService,
    pub gamification: GamificationService,
    pub research_service: ResearchService,
    pub publisher: PostPublisher,
}
