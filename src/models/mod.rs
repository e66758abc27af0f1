// SPDX-License-Identifier: MIT

//! Data models for the application.

pub mod achievement;
pub mod platform;
pub mod post;
pub mod streak;
pub mod subscription;
pub mod user;

pub use achievement::{Achievement, AchievementKind};
pub use platform::{Platform, PlatformTokens};
pub use post::Post;
pub use streak::UserStreak;
pub use subscription::{Tier, TokenBalance, UserSubscription};
pub use user::User;
