// SPDX-License-Identifier: MIT

//! Tier engine: token-balance lookups, effective-tier computation, and
//! daily usage accounting.
//!
//! Balance queries go to Helius RPC and are cached for five minutes with
//! single-flight refresh. Any balance-fetch failure falls back to the
//! stored subscription state rather than failing the request.

use crate::config::Config;
use crate::db::FirestoreDb;
use crate::error::AppError;
use crate::models::{Tier, TokenBalance, UserSubscription};
use crate::services::cache::SingleFlightCache;
use crate::time_utils::utc_today_string;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

/// How long wallet balances are served from cache.
const BALANCE_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

/// Tier engine backed by Helius RPC and Firestore.
#[derive(Clone)]
pub struct TierService {
    http: reqwest::Client,
    db: FirestoreDb,
    rpc_url: String,
    token_mint: String,
    balance_cache: Arc<SingleFlightCache<TokenBalance>>,
}

impl TierService {
    pub fn new(config: &Config, db: FirestoreDb) -> Self {
        Self {
            http: reqwest::Client::new(),
            db,
            rpc_url: format!(
                "https://mainnet.helius-rpc.com/?api-key={}",
                config.helius_api_key
            ),
            token_mint: config.token_mint.clone(),
            balance_cache: Arc::new(SingleFlightCache::new(BALANCE_CACHE_TTL)),
        }
    }

    // ─── Balance Queries ─────────────────────────────────────────────────

    /// Project-token balance for a wallet, served from the 5-minute cache.
    pub async fn token_balance(&self, wallet: &str) -> Result<TokenBalance, AppError> {
        let wallet_owned = wallet.to_string();
        self.balance_cache
            .get_or_fetch(wallet, || self.fetch_balance(wallet_owned))
            .await
    }

    /// Drop the cached balance for a wallet (webhook-driven invalidation).
    pub fn invalidate_wallet(&self, wallet: &str) {
        self.balance_cache.invalidate(wallet);
    }

    /// Query Helius RPC for the wallet's token accounts holding our mint.
    async fn fetch_balance(&self, wallet: String) -> Result<TokenBalance, AppError> {
        let request = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "getTokenAccountsByOwner",
            "params": [
                wallet,
                { "mint": self.token_mint },
                { "encoding": "jsonParsed" }
            ]
        });

        let response = self
            .http
            .post(&self.rpc_url)
            .json(&request)
            .send()
            .await
            .map_err(|e| AppError::Upstream(format!("Helius RPC request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(AppError::Upstream(format!(
                "Helius RPC returned status {}",
                response.status()
            )));
        }

        let body: RpcResponse = response
            .json()
            .await
            .map_err(|e| AppError::Upstream(format!("Helius RPC parse error: {}", e)))?;

        if let Some(err) = body.error {
            return Err(AppError::Upstream(format!(
                "Helius RPC error {}: {}",
                err.code, err.message
            )));
        }

        // A wallet can hold the mint across several token accounts; sum them
        let mut amount_raw: u64 = 0;
        let mut decimals: u8 = 0;

        for account in body
            .result
            .map(|r| r.value)
            .unwrap_or_default()
        {
            let info = account.account.data.parsed.info;
            amount_raw = amount_raw.saturating_add(
                info.token_amount
                    .amount
                    .parse::<u64>()
                    .unwrap_or(0),
            );
            decimals = info.token_amount.decimals;
        }

        let balance = TokenBalance::from_raw(wallet, amount_raw, decimals);

        tracing::debug!(
            wallet = %balance.wallet,
            ui_amount = balance.ui_amount,
            tier = %balance.tier.as_str(),
            "Fetched token balance"
        );

        Ok(balance)
    }

    // ─── Subscription State ──────────────────────────────────────────────

    /// The user's subscription record, defaulting for first-time users.
    pub async fn subscription_for(&self, user_id: &str) -> Result<UserSubscription, AppError> {
        Ok(self
            .db
            .get_subscription(user_id)
            .await?
            .unwrap_or_else(|| UserSubscription::new(user_id)))
    }

    /// Effective tier for a user, refreshing the token-derived tier from
    /// the linked wallet when possible.
    ///
    /// On balance-fetch failure the stored `token_tier` is used, so a
    /// Helius outage degrades to stale tiers instead of locked-out users.
    pub async fn effective_subscription(
        &self,
        user_id: &str,
    ) -> Result<UserSubscription, AppError> {
        let mut sub = self.subscription_for(user_id).await?;

        if let Some(wallet) = sub.wallet_address.clone() {
            match self.token_balance(&wallet).await {
                Ok(balance) => {
                    if balance.tier != sub.token_tier {
                        sub.token_tier = balance.tier;
                        sub.updated_at = chrono::Utc::now().to_rfc3339();
                        self.db.set_subscription(&sub).await?;
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        user_id,
                        "Balance fetch failed, using stored token tier"
                    );
                }
            }
        }

        Ok(sub)
    }

    /// Effective tier only (no counters).
    pub async fn effective_tier(&self, user_id: &str) -> Result<Tier, AppError> {
        Ok(self
            .effective_subscription(user_id)
            .await?
            .effective_tier(chrono::Utc::now()))
    }

    // ─── Daily Usage Accounting ──────────────────────────────────────────

    /// Consume one daily post credit, or fail with `QuotaExceeded`.
    pub async fn consume_post_credit(&self, user_id: &str) -> Result<Tier, AppError> {
        let mut sub = self.effective_subscription(user_id).await?;
        let tier = sub.effective_tier(chrono::Utc::now());

        sub.rollover(&utc_today_string());

        if let Some(limit) = tier.daily_post_limit() {
            if sub.posts_today >= limit {
                return Err(AppError::QuotaExceeded("posts"));
            }
        }

        sub.posts_today += 1;
        sub.updated_at = chrono::Utc::now().to_rfc3339();
        self.db.set_subscription(&sub).await?;

        Ok(tier)
    }

    /// Consume one daily research credit, or fail with `QuotaExceeded`.
    pub async fn consume_research_credit(&self, user_id: &str) -> Result<Tier, AppError> {
        let mut sub = self.effective_subscription(user_id).await?;
        let tier = sub.effective_tier(chrono::Utc::now());

        sub.rollover(&utc_today_string());

        if let Some(limit) = tier.daily_research_limit() {
            if sub.research_today >= limit {
                return Err(AppError::QuotaExceeded("research"));
            }
        }

        sub.research_today += 1;
        sub.updated_at = chrono::Utc::now().to_rfc3339();
        self.db.set_subscription(&sub).await?;

        Ok(tier)
    }

    // ─── Wallet Linking / Webhook Dispatch ───────────────────────────────

    /// Link a wallet to the user's subscription and derive its tier.
    pub async fn link_wallet(
        &self,
        user_id: &str,
        wallet: &str,
    ) -> Result<UserSubscription, AppError> {
        let mut sub = self.subscription_for(user_id).await?;
        sub.wallet_address = Some(wallet.to_string());

        // Best effort: derive the tier now; webhooks keep it current later
        match self.token_balance(wallet).await {
            Ok(balance) => sub.token_tier = balance.tier,
            Err(e) => {
                tracing::warn!(error = %e, user_id, wallet, "Initial balance fetch failed");
            }
        }

        sub.updated_at = chrono::Utc::now().to_rfc3339();
        self.db.set_subscription(&sub).await?;

        tracing::info!(user_id, wallet, tier = %sub.token_tier.as_str(), "Wallet linked");
        Ok(sub)
    }

    /// React to an on-chain transfer touching `wallet`: invalidate the
    /// cached balance and re-derive the owner's tier.
    ///
    /// Returns the affected user and their new token tier, or `None` if
    /// the wallet is not linked to any subscription.
    pub async fn handle_balance_change(
        &self,
        wallet: &str,
    ) -> Result<Option<(String, Tier)>, AppError> {
        let Some(sub) = self.db.find_subscription_by_wallet(wallet).await? else {
            return Ok(None);
        };

        self.invalidate_wallet(wallet);

        let balance = self.token_balance(wallet).await?;
        self.db.save_token_tier(&sub.user_id, balance.tier).await?;

        tracing::info!(
            user_id = %sub.user_id,
            wallet,
            tier = %balance.tier.as_str(),
            "Tier re-derived after balance change"
        );

        Ok(Some((sub.user_id, balance.tier)))
    }
}

// ─── Helius RPC wire types ───────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<RpcResult>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct RpcResult {
    value: Vec<RpcTokenAccount>,
}

#[derive(Debug, Deserialize)]
struct RpcTokenAccount {
    account: RpcAccount,
}

#[derive(Debug, Deserialize)]
struct RpcAccount {
    data: RpcAccountData,
}

#[derive(Debug, Deserialize)]
struct RpcAccountData {
    parsed: RpcParsed,
}

#[derive(Debug, Deserialize)]
struct RpcParsed {
    info: RpcTokenInfo,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcTokenInfo {
    token_amount: RpcTokenAmount,
}

#[derive(Debug, Deserialize)]
struct RpcTokenAmount {
    amount: String,
    decimals: u8,
}
