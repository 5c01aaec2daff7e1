//! Chain submission clients
//!
//! `ChainClient` is the seam between the scheduling engine and whatever signs and
//! broadcasts the registration extrinsic. Production runs talk to a signing relay
//! over HTTP; simulation runs use an in-process market.

use async_trait::async_trait;
use dashmap::DashSet;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::config::SimulationConfig;
use crate::types::{FeeRecommendation, SubmissionOutcome, WalletId};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChainError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Chain request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Unexpected response: {0}")]
    InvalidResponse(String),
}

#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Submit one registration for `wallet` paying `fee`
    async fn submit(
        &self,
        wallet: &WalletId,
        fee: &FeeRecommendation,
    ) -> Result<SubmissionOutcome, ChainError>;

    /// Whether the wallet already holds a slot on the subnet
    async fn is_registered(&self, _wallet: &WalletId) -> Result<bool, ChainError> {
        Ok(false)
    }

    /// Remaining open slots, when the backend can tell
    async fn open_slots(&self) -> Result<Option<u32>, ChainError> {
        Ok(None)
    }

    /// Current registration (burn) cost, when the backend can tell
    async fn registration_cost(&self) -> Result<Option<u64>, ChainError> {
        Ok(None)
    }

    /// Spendable balance behind `wallet`, when the backend can tell
    async fn balance(&self, _wallet: &WalletId) -> Result<Option<u64>, ChainError> {
        Ok(None)
    }
}

#[derive(Debug, Serialize)]
struct SubmitRequest<'a> {
    wallet: &'a str,
    subnet_id: u16,
    network: &'a str,
    base_fee: u64,
    priority_fee: u64,
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    status: String,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RegisteredResponse {
    registered: bool,
}

#[derive(Debug, Deserialize)]
struct SlotsResponse {
    open_slots: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct CostResponse {
    cost: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct BalanceResponse {
    balance: Option<u64>,
}

/// HTTP client for a signing relay exposing `/submit`, `/registered`, `/slots`,
/// `/cost` and `/balance`
#[derive(Debug, Clone)]
pub struct RelayChainClient {
    base_url: String,
    network: String,
    subnet_id: u16,
    timeout: Duration,
    client: reqwest::Client,
}

impl RelayChainClient {
    pub fn new(
        base_url: impl Into<String>,
        network: impl Into<String>,
        subnet_id: u16,
        timeout: Duration,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            network: network.into(),
            subnet_id,
            timeout,
            client: reqwest::Client::new(),
        }
    }

    fn classify(&self, e: reqwest::Error) -> ChainError {
        if e.is_timeout() {
            ChainError::Timeout {
                timeout_ms: self.timeout.as_millis() as u64,
            }
        } else if e.is_decode() {
            ChainError::InvalidResponse(e.to_string())
        } else {
            ChainError::Network(e.to_string())
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T, ChainError> {
        let url = reqwest::Url::parse_with_params(&format!("{}{}", self.base_url, path), params)
            .map_err(|e| ChainError::Network(format!("invalid relay url: {}", e)))?;
        let response = self
            .client
            .get(url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| self.classify(e))?
            .error_for_status()
            .map_err(|e| self.classify(e))?;
        response.json().await.map_err(|e| self.classify(e))
    }
}

#[async_trait]
impl ChainClient for RelayChainClient {
    async fn submit(
        &self,
        wallet: &WalletId,
        fee: &FeeRecommendation,
    ) -> Result<SubmissionOutcome, ChainError> {
        let body = SubmitRequest {
            wallet: wallet.as_str(),
            subnet_id: self.subnet_id,
            network: &self.network,
            base_fee: fee.base_fee,
            priority_fee: fee.priority_fee,
        };

        let response = self
            .client
            .post(format!("{}/submit", self.base_url))
            .json(&body)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| self.classify(e))?
            .error_for_status()
            .map_err(|e| self.classify(e))?;

        let parsed: SubmitResponse = response.json().await.map_err(|e| self.classify(e))?;
        debug!(wallet = %wallet, status = %parsed.status, "Relay answered submission");

        match parsed.status.as_str() {
            "accepted" => Ok(SubmissionOutcome::Accepted),
            "rejected_low_fee" => Ok(SubmissionOutcome::RejectedLowFee),
            "rejected" => Ok(SubmissionOutcome::RejectedOther {
                reason: parsed.reason.unwrap_or_else(|| "rejected".to_string()),
            }),
            other => Err(ChainError::InvalidResponse(format!(
                "unknown submission status '{}'",
                other
            ))),
        }
    }

    async fn is_registered(&self, wallet: &WalletId) -> Result<bool, ChainError> {
        let response: RegisteredResponse = self
            .get_json(
                "/registered",
                &[
                    ("wallet", wallet.to_string()),
                    ("subnet_id", self.subnet_id.to_string()),
                ],
            )
            .await?;
        Ok(response.registered)
    }

    async fn open_slots(&self) -> Result<Option<u32>, ChainError> {
        let response: SlotsResponse = self
            .get_json("/slots", &[("subnet_id", self.subnet_id.to_string())])
            .await?;
        Ok(response.open_slots)
    }

    async fn registration_cost(&self) -> Result<Option<u64>, ChainError> {
        let response: CostResponse = self
            .get_json(
                "/cost",
                &[
                    ("network", self.network.clone()),
                    ("subnet_id", self.subnet_id.to_string()),
                ],
            )
            .await?;
        Ok(response.cost)
    }

    async fn balance(&self, wallet: &WalletId) -> Result<Option<u64>, ChainError> {
        let response: BalanceResponse = self
            .get_json("/balance", &[("wallet", wallet.to_string())])
            .await?;
        Ok(response.balance)
    }
}

/// In-process registration market.
///
/// A submission is accepted when its total fee meets the current clearing
/// price and a slot is left; the clearing price drifts after each submission.
#[derive(Debug)]
pub struct SimulatedChainClient {
    clearing_price: Mutex<u64>,
    price_drift: f64,
    open_slots: AtomicU32,
    error_rate: f64,
    latency: Duration,
    burn_cost: Option<u64>,
    wallet_balance: Option<u64>,
    registered: DashSet<WalletId>,
}

impl SimulatedChainClient {
    pub fn new(config: &SimulationConfig) -> Self {
        Self {
            clearing_price: Mutex::new(config.clearing_price),
            price_drift: config.price_drift,
            open_slots: AtomicU32::new(config.open_slots),
            error_rate: config.error_rate,
            latency: Duration::from_millis(config.latency_ms),
            burn_cost: config.burn_cost,
            wallet_balance: config.wallet_balance,
            registered: DashSet::new(),
        }
    }

    pub fn clearing_price(&self) -> u64 {
        *self.clearing_price.lock()
    }

    fn drift(&self) {
        let mut price = self.clearing_price.lock();
        let factor = 1.0 + (fastrand::f64() - 0.5) * 2.0 * self.price_drift;
        *price = ((*price as f64) * factor).round().max(1.0) as u64;
    }

    fn take_slot(&self) -> bool {
        self.open_slots
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl ChainClient for SimulatedChainClient {
    async fn submit(
        &self,
        wallet: &WalletId,
        fee: &FeeRecommendation,
    ) -> Result<SubmissionOutcome, ChainError> {
        if !self.latency.is_zero() {
            let jitter = fastrand::u64(0..=self.latency.as_millis() as u64 / 2);
            tokio::time::sleep(self.latency + Duration::from_millis(jitter)).await;
        }

        if fastrand::f64() < self.error_rate {
            return Err(ChainError::Network("simulated connection reset".to_string()));
        }

        let price = self.clearing_price();
        self.drift();

        if self.registered.contains(wallet) {
            return Ok(SubmissionOutcome::RejectedOther {
                reason: "already registered".to_string(),
            });
        }
        if fee.total() < price {
            return Ok(SubmissionOutcome::RejectedLowFee);
        }
        if !self.take_slot() {
            return Ok(SubmissionOutcome::RejectedOther {
                reason: "no open slots".to_string(),
            });
        }

        self.registered.insert(wallet.clone());
        Ok(SubmissionOutcome::Accepted)
    }

    async fn is_registered(&self, wallet: &WalletId) -> Result<bool, ChainError> {
        Ok(self.registered.contains(wallet))
    }

    async fn open_slots(&self) -> Result<Option<u32>, ChainError> {
        Ok(Some(self.open_slots.load(Ordering::SeqCst)))
    }

    async fn registration_cost(&self) -> Result<Option<u64>, ChainError> {
        Ok(self.burn_cost)
    }

    async fn balance(&self, _wallet: &WalletId) -> Result<Option<u64>, ChainError> {
        Ok(self.wallet_balance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sim(clearing_price: u64, open_slots: u32) -> SimulatedChainClient {
        SimulatedChainClient::new(&SimulationConfig {
            clearing_price,
            price_drift: 0.0,
            open_slots,
            error_rate: 0.0,
            latency_ms: 0,
            ..SimulationConfig::default()
        })
    }

    fn fee(total: u64) -> FeeRecommendation {
        FeeRecommendation {
            base_fee: total,
            priority_fee: 0,
            valid_until_height: 10,
        }
    }

    #[tokio::test]
    async fn test_simulated_market() {
        let chain = sim(1_000, 1);
        let a = WalletId::new("cold/a");
        let b = WalletId::new("cold/b");

        assert_eq!(chain.submit(&a, &fee(900)).await.unwrap(), SubmissionOutcome::RejectedLowFee);
        assert_eq!(chain.submit(&a, &fee(1_000)).await.unwrap(), SubmissionOutcome::Accepted);
        assert!(chain.is_registered(&a).await.unwrap());
        assert_eq!(chain.open_slots().await.unwrap(), Some(0));

        assert!(matches!(
            chain.submit(&b, &fee(5_000)).await.unwrap(),
            SubmissionOutcome::RejectedOther { .. }
        ));
        assert!(!chain.is_registered(&b).await.unwrap());
    }

    #[tokio::test]
    async fn test_simulated_errors() {
        let chain = SimulatedChainClient::new(&SimulationConfig {
            error_rate: 1.0,
            latency_ms: 0,
            ..SimulationConfig::default()
        });
        let result = chain.submit(&WalletId::new("w"), &fee(u64::MAX)).await;
        assert!(matches!(result, Err(ChainError::Network(_))));
    }

    #[tokio::test]
    async fn test_simulated_cost_and_balance() {
        let wallet = WalletId::new("cold/a");
        assert_eq!(sim(1_000, 1).registration_cost().await.unwrap(), None);
        assert_eq!(sim(1_000, 1).balance(&wallet).await.unwrap(), None);

        let chain = SimulatedChainClient::new(&SimulationConfig {
            latency_ms: 0,
            burn_cost: Some(2_000),
            wallet_balance: Some(1_500),
            ..SimulationConfig::default()
        });
        assert_eq!(chain.registration_cost().await.unwrap(), Some(2_000));
        assert_eq!(chain.balance(&wallet).await.unwrap(), Some(1_500));
    }

    #[test]
    fn test_relay_base_url_normalized() {
        let client = RelayChainClient::new("http://relay:8900/", "finney", 1, Duration::from_secs(1));
        assert_eq!(client.base_url, "http://relay:8900");
    }
}
