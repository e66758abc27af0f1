// SPDX-License-Identifier: MIT

//! Webhook routes for Helius on-chain events.

use crate::AppState;
use axum::{
    extract::{Json, Path, State},
    http::{header, HeaderMap, StatusCode},
    routing::post,
    Router,
};
use serde::Deserialize;
use std::sync::Arc;
use subtle::ConstantTimeEq;

/// Webhook routes.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/webhook/helius/{uuid}", post(handle_event))
}

/// A Helius enhanced transaction (the fields we care about).
#[derive(Deserialize, Debug)]
struct HeliusTransaction {
    #[serde(rename = "type", default)]
    tx_type: Option<String>,
    #[serde(default)]
    signature: Option<String>,
    #[serde(rename = "tokenTransfers", default)]
    token_transfers: Vec<HeliusTokenTransfer>,
}

/// One token transfer inside a transaction.
#[derive(Deserialize, Debug)]
struct HeliusTokenTransfer {
    #[serde(default)]
    mint: Option<String>,
    #[serde(rename = "fromUserAccount", default)]
    from_user_account: Option<String>,
    #[serde(rename = "toUserAccount", default)]
    to_user_account: Option<String>,
}

/// Constant-time comparison of the webhook auth header with the secret.
fn authorized(headers: &HeaderMap, secret: &str) -> bool {
    let Some(received) = headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
    else {
        return false;
    };

    received.as_bytes().ct_eq(secret.as_bytes()).into()
}

/// Handle incoming Helius webhook events (POST).
///
/// Any transfer of the project token touching a linked wallet invalidates
/// that wallet's balance cache and re-derives the owner's tier.
async fn handle_event(
    State(state): State<Arc<AppState>>,
    Path(uuid): Path<String>,
    headers: HeaderMap,
    Json(payload): Json<serde_json::Value>,
) -> StatusCode {
    // Validate Path UUID
    if uuid != state.config.webhook_path_uuid {
        tracing::warn!(
            received_uuid = %uuid,
            "Security Alert: Webhook path UUID mismatch"
        );
        return StatusCode::NOT_FOUND;
    }

    // Validate the shared-secret Authorization header
    if !authorized(&headers, &state.config.helius_webhook_secret) {
        tracing::warn!("Security Alert: Webhook authorization header mismatch");
        return StatusCode::FORBIDDEN;
    }

    let transactions: Vec<HeliusTransaction> = match serde_json::from_value(payload) {
        Ok(txs) => txs,
        Err(e) => {
            tracing::error!(error = %e, "Failed to parse webhook payload");
            return StatusCode::OK; // Still ack to avoid Helius retry storms
        }
    };

    tracing::info!(count = transactions.len(), "Webhook events received");

    for tx in transactions {
        let wallets = affected_wallets(&tx, &state.config.token_mint);

        if wallets.is_empty() {
            tracing::debug!(
                tx_type = tx.tx_type.as_deref().unwrap_or("unknown"),
                "Ignoring transaction without project-token transfers"
            );
            continue;
        }

        for wallet in wallets {
            match state.tier_service.handle_balance_change(&wallet).await {
                Ok(Some((user_id, tier))) => {
                    tracing::info!(
                        user_id = %user_id,
                        wallet = %wallet,
                        tier = %tier.as_str(),
                        signature = tx.signature.as_deref().unwrap_or(""),
                        "Tier updated from webhook"
                    );
                }
                Ok(None) => {
                    tracing::debug!(wallet = %wallet, "Transfer wallet not linked to any user");
                }
                Err(e) => {
                    tracing::error!(error = %e, wallet = %wallet, "Failed to handle balance change");
                }
            }
        }
    }

    // Always return 200 OK quickly (Helius requirement)
    StatusCode::OK
}

/// Wallets touched by transfers of the project token in this transaction.
fn affected_wallets(tx: &HeliusTransaction, token_mint: &str) -> Vec<String> {
    let mut wallets = Vec::new();

    for transfer in &tx.token_transfers {
        if transfer.mint.as_deref() != Some(token_mint) {
            continue;
        }

        for wallet in [&transfer.from_user_account, &transfer.to_user_account]
            .into_iter()
            .flatten()
        {
            if !wallet.is_empty() && !wallets.contains(wallet) {
                wallets.push(wallet.clone());
            }
        }
    }

    wallets
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transfer(mint: &str, from: &str, to: &str) -> HeliusTokenTransfer {
        HeliusTokenTransfer {
            mint: Some(mint.to_string()),
            from_user_account: Some(from.to_string()),
            to_user_account: Some(to.to_string()),
        }
    }

    #[test]
    fn test_affected_wallets_filters_by_mint() {
        let tx = HeliusTransaction {
            tx_type: Some("TRANSFER".to_string()),
            signature: None,
            token_transfers: vec![
                transfer("OUR_MINT", "walletA", "walletB"),
                transfer("OTHER_MINT", "walletC", "walletD"),
            ],
        };

        let wallets = affected_wallets(&tx, "OUR_MINT");
        assert_eq!(wallets, vec!["walletA".to_string(), "walletB".to_string()]);
    }

    #[test]
    fn test_affected_wallets_dedupes() {
        let tx = HeliusTransaction {
            tx_type: None,
            signature: None,
            token_transfers: vec![
                transfer("M", "walletA", "walletB"),
                transfer("M", "walletB", "walletA"),
            ],
        };

        let wallets = affected_wallets(&tx, "M");
        assert_eq!(wallets.len(), 2);
    }

    #[test]
    fn test_authorized_constant_time_check() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, "secret123".parse().unwrap());

        assert!(authorized(&headers, "secret123"));
        assert!(!authorized(&headers, "secret124"));
        assert!(!authorized(&HeaderMap::new(), "secret123"));
    }
}
