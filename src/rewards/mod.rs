//! Reward service client.
//!
//! The reward collaborator is opaque: the server requests token grants
//! over REST and never blocks the simulation on the outcome. Failures are
//! retried a bounded number of times and then surfaced as a non-fatal
//! notice; game state (score, kills) is never rolled back.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, warn};
use uuid::Uuid;

use crate::config::Config;

const MAX_ATTEMPTS: u32 = 3;
const BACKOFF_BASE_MS: u64 = 250;

/// Request body for a token grant
#[derive(Debug, Clone, Serialize)]
struct AwardRequest {
    account: Uuid,
    amount: u32,
    reason: String,
}

/// Reward service response
#[derive(Debug, Clone, Deserialize)]
pub struct RewardReceipt {
    pub success: bool,
    #[serde(default)]
    pub transaction_ref: Option<String>,
}

/// Reward service errors
#[derive(Debug, thiserror::Error)]
pub enum RewardError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("API error (status {status}): {body}")]
    Api { status: u16, body: String },
}

/// REST client for the external reward service
#[derive(Clone)]
pub struct RewardService {
    client: Client,
    base_url: String,
    api_key: String,
}

impl RewardService {
    pub fn new(config: &Config) -> Self {
        Self {
            client: Client::new(),
            base_url: config.reward_service_url.clone(),
            api_key: config.reward_service_key.clone(),
        }
    }

    /// Request a token grant; one attempt
    pub async fn award_tokens(
        &self,
        account: Uuid,
        amount: u32,
        reason: &str,
    ) -> Result<RewardReceipt, RewardError> {
        let url = format!("{}/v1/awards", self.base_url);
        let body = AwardRequest {
            account,
            amount,
            reason: reason.to_string(),
        };

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(RewardError::Api { status, body });
        }

        Ok(response.json().await?)
    }

    /// Award with bounded retries and backoff. Returns None after the
    /// final failure; the caller reports a non-fatal notice to the player.
    pub async fn award_with_retry(
        &self,
        account: Uuid,
        amount: u32,
        reason: &str,
    ) -> Option<RewardReceipt> {
        for attempt in 1..=MAX_ATTEMPTS {
            match self.award_tokens(account, amount, reason).await {
                Ok(receipt) if receipt.success => return Some(receipt),
                Ok(receipt) => {
                    warn!(
                        account = %account,
                        amount,
                        reason,
                        attempt,
                        "Reward service declined the grant"
                    );
                    return Some(receipt);
                }
                Err(e) => {
                    warn!(
                        account = %account,
                        amount,
                        reason,
                        attempt,
                        error = %e,
                        "Reward request failed"
                    );
                    if attempt < MAX_ATTEMPTS {
                        tokio::time::sleep(Duration::from_millis(
                            BACKOFF_BASE_MS * 2u64.pow(attempt - 1),
                        ))
                        .await;
                    }
                }
            }
        }

        error!(
            account = %account,
            amount,
            reason,
            "Reward grant abandoned after {} attempts",
            MAX_ATTEMPTS
        );
        None
    }
}
