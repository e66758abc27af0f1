// SPDX-License-Identifier: MIT

//! Services module - business logic layer.

pub mod cache;
pub mod gamification;
pub mod google_auth;
pub mod kms;
pub mod publisher;
pub mod research;
pub mod social;
pub mod tier;

pub use gamification::GamificationService;
pub use google_auth::{GoogleIdVerifier, OidcError, VerifiedGoogleUser};
pub use kms::KmsService;
pub use publisher::PostPublisher;
pub use research::ResearchService;
pub use social::{ConnectResult, SocialService};
pub use tier::TierService;
