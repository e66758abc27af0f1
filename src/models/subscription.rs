// SPDX-License-Identifier: MIT

//! Subscription tiers, token-derived gating, and daily usage counters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Minimum UI token balance for each paid-equivalent tier.
pub const BASIC_MIN_BALANCE: f64 = 1_000.0;
pub const PREMIUM_MIN_BALANCE: f64 = 10_000.0;
pub const AGENCY_MIN_BALANCE: f64 = 50_000.0;

/// Subscription tier, ordered from least to most privileged.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    #[default]
    Free,
    Basic,
    Premium,
    Agency,
}

impl Tier {
    /// Lowercase name used in API responses.
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Free => "free",
            Tier::Basic => "basic",
            Tier::Premium => "premium",
            Tier::Agency => "agency",
        }
    }

    /// Derive a tier from a wallet's UI token balance.
    ///
    /// Monotonic: a higher balance never maps to a lower tier.
    pub fn from_token_balance(ui_amount: f64) -> Tier {
        if ui_amount >= AGENCY_MIN_BALANCE {
            Tier::Agency
        } else if ui_amount >= PREMIUM_MIN_BALANCE {
            Tier::Premium
        } else if ui_amount >= BASIC_MIN_BALANCE {
            Tier::Basic
        } else {
            Tier::Free
        }
    }

    /// Daily publish limit; `None` means unlimited.
    pub fn daily_post_limit(&self) -> Option<u32> {
        match self {
            Tier::Free => Some(3),
            Tier::Basic => Some(10),
            Tier::Premium => Some(50),
            Tier::Agency => None,
        }
    }

    /// Daily research-call limit; `None` means unlimited.
    pub fn daily_research_limit(&self) -> Option<u32> {
        match self {
            Tier::Free => Some(2),
            Tier::Basic => Some(10),
            Tier::Premium => Some(50),
            Tier::Agency => None,
        }
    }
}

/// Snapshot of a wallet's project-token balance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenBalance {
    /// Wallet address (base58)
    pub wallet: String,
    /// Raw token amount (smallest units)
    pub amount_raw: u64,
    /// Mint decimals
    pub decimals: u8,
    /// Human-readable amount (raw / 10^decimals)
    pub ui_amount: f64,
    /// Tier derived from `ui_amount`
    pub tier: Tier,
}

impl TokenBalance {
    /// Build a snapshot from raw chain data, deriving ui amount and tier.
    pub fn from_raw(wallet: String, amount_raw: u64, decimals: u8) -> Self {
        let ui_amount = amount_raw as f64 / 10f64.powi(decimals as i32);
        Self {
            wallet,
            amount_raw,
            decimals,
            ui_amount,
            tier: Tier::from_token_balance(ui_amount),
        }
    }
}

/// Per-user subscription state, stored in Firestore.
///
/// Stored in the `subscriptions` collection, keyed by user id. The daily
/// usage counters reset lazily when `usage_day` differs from today.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSubscription {
    /// Owning user
    pub user_id: String,
    /// Paid subscription tier (managed out of band)
    #[serde(default)]
    pub paid_tier: Tier,
    /// Paid tier expiry (ISO 8601); None means no paid subscription
    #[serde(default)]
    pub paid_until: Option<String>,
    /// Linked Solana wallet address, if any
    #[serde(default)]
    pub wallet_address: Option<String>,
    /// Most recently derived token tier (fallback when balance fetch fails)
    #[serde(default)]
    pub token_tier: Tier,
    /// Posts published today
    #[serde(default)]
    pub posts_today: u32,
    /// Research calls made today
    #[serde(default)]
    pub research_today: u32,
    /// UTC day the counters belong to ("YYYY-MM-DD")
    #[serde(default)]
    pub usage_day: String,
    /// Last update timestamp (ISO 8601)
    #[serde(default)]
    pub updated_at: String,
}

impl UserSubscription {
    /// Empty subscription for a new user.
    pub fn new(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            paid_tier: Tier::Free,
            paid_until: None,
            wallet_address: None,
            token_tier: Tier::Free,
            posts_today: 0,
            research_today: 0,
            usage_day: String::new(),
            updated_at: String::new(),
        }
    }

    /// Paid tier, if the subscription has not lapsed at `now`.
    pub fn active_paid_tier(&self, now: DateTime<Utc>) -> Tier {
        match &self.paid_until {
            Some(until) => match DateTime::parse_from_rfc3339(until) {
                Ok(until) if now < until.with_timezone(&Utc) => self.paid_tier,
                _ => Tier::Free,
            },
            None => Tier::Free,
        }
    }

    /// Effective tier: the better of the active paid tier and the
    /// token-derived tier.
    pub fn effective_tier(&self, now: DateTime<Utc>) -> Tier {
        self.active_paid_tier(now).max(self.token_tier)
    }

    /// Reset the daily counters if the stored day is not `today`.
    pub fn rollover(&mut self, today: &str) {
        if self.usage_day != today {
            self.usage_day = today.to_string();
            self.posts_today = 0;
            self.research_today = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_tier_derivation_thresholds() {
        assert_eq!(Tier::from_token_balance(0.0), Tier::Free);
        assert_eq!(Tier::from_token_balance(999.99), Tier::Free);
        assert_eq!(Tier::from_token_balance(1_000.0), Tier::Basic);
        assert_eq!(Tier::from_token_balance(9_999.0), Tier::Basic);
        assert_eq!(Tier::from_token_balance(10_000.0), Tier::Premium);
        assert_eq!(Tier::from_token_balance(50_000.0), Tier::Agency);
        assert_eq!(Tier::from_token_balance(1_000_000.0), Tier::Agency);
    }

    #[test]
    fn test_tier_derivation_monotonic() {
        // Higher balance never maps to a lower tier
        let balances = [0.0, 1.0, 999.0, 1_000.0, 5_000.0, 10_000.0, 49_999.0, 50_000.0, 1e9];
        let mut prev = Tier::Free;
        for b in balances {
            let tier = Tier::from_token_balance(b);
            assert!(tier >= prev, "tier dropped at balance {}", b);
            prev = tier;
        }
    }

    #[test]
    fn test_token_balance_from_raw() {
        let balance = TokenBalance::from_raw("wallet1".to_string(), 10_000_000_000, 6);
        assert_eq!(balance.ui_amount, 10_000.0);
        assert_eq!(balance.tier, Tier::Premium);
    }

    #[test]
    fn test_effective_tier_prefers_better() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();

        let mut sub = UserSubscription::new("u1");
        sub.token_tier = Tier::Premium;
        sub.paid_tier = Tier::Basic;
        sub.paid_until = Some("2024-06-01T00:00:00Z".to_string());
        assert_eq!(sub.effective_tier(now), Tier::Premium);

        sub.paid_tier = Tier::Agency;
        assert_eq!(sub.effective_tier(now), Tier::Agency);
    }

    #[test]
    fn test_expired_paid_tier_ignored() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();

        let mut sub = UserSubscription::new("u1");
        sub.paid_tier = Tier::Agency;
        sub.paid_until = Some("2024-01-01T00:00:00Z".to_string());
        assert_eq!(sub.effective_tier(now), Tier::Free);
    }

    #[test]
    fn test_usage_rollover_resets_counters() {
        let mut sub = UserSubscription::new("u1");
        sub.usage_day = "2024-03-01".to_string();
        sub.posts_today = 3;
        sub.research_today = 2;

        sub.rollover("2024-03-01");
        assert_eq!(sub.posts_today, 3); // Same day: untouched

        sub.rollover("2024-03-02");
        assert_eq!(sub.posts_today, 0);
        assert_eq!(sub.research_today, 0);
        assert_eq!(sub.usage_day, "2024-03-02");
    }
}
