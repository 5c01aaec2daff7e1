//! Structured per-wallet attempt logging

use std::time::Duration;

use crate::observability::RunId;
use crate::types::{FeeRecommendation, WalletId};

/// Structured logger for one wallet's attempt lifecycle
#[derive(Debug, Clone)]
pub struct AttemptLogger {
    context_id: String,
}

impl AttemptLogger {
    pub fn new(run_id: &RunId, wallet: &WalletId) -> Self {
        Self {
            context_id: format!("{}:{}", run_id.short(), wallet),
        }
    }

    pub fn context_id(&self) -> &str {
        &self.context_id
    }

    pub fn log_waiting(&self, height: u64, blocks_until_open: u64) {
        tracing::debug!(
            context_id = %self.context_id,
            height = %height,
            blocks_until_open = %blocks_until_open,
            "Waiting for registration window"
        );
    }

    pub fn log_attempt_started(&self, attempt: u32, height: u64, fee: &FeeRecommendation) {
        tracing::info!(
            context_id = %self.context_id,
            attempt = %attempt,
            height = %height,
            base_fee = %fee.base_fee,
            priority_fee = %fee.priority_fee,
            "Submitting registration"
        );
    }

    pub fn log_accepted(&self, attempt: u32, fee_paid: u64, latency_ms: u64) {
        tracing::info!(
            context_id = %self.context_id,
            attempt = %attempt,
            fee_paid = %fee_paid,
            latency_ms = %latency_ms,
            "Registration accepted"
        );
    }

    pub fn log_rejected(&self, attempt: u32, low_fee: bool, reason: &str, latency_ms: u64) {
        tracing::warn!(
            context_id = %self.context_id,
            attempt = %attempt,
            low_fee = %low_fee,
            reason = %reason,
            latency_ms = %latency_ms,
            "Registration rejected"
        );
    }

    pub fn log_error(&self, attempt: u32, error: &str, latency_ms: u64) {
        tracing::warn!(
            context_id = %self.context_id,
            attempt = %attempt,
            error = %error,
            latency_ms = %latency_ms,
            "Registration submission failed"
        );
    }

    pub fn log_backoff(&self, attempt: u32, delay: Duration) {
        tracing::debug!(
            context_id = %self.context_id,
            attempt = %attempt,
            delay_ms = %delay.as_millis(),
            "Backing off before next attempt"
        );
    }

    pub fn log_abandoned(&self, attempts: u32, reason: &str) {
        tracing::warn!(
            context_id = %self.context_id,
            attempts = %attempts,
            reason = %reason,
            "Wallet abandoned"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_id() {
        let run = RunId::from("0123456789abcdef");
        let logger = AttemptLogger::new(&run, &WalletId::new("cold/hot"));
        assert_eq!(logger.context_id(), "01234567:cold/hot");
    }
}
