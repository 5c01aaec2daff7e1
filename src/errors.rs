//! Crate-level error types
//!
//! Component errors (`SourceError`, `ChainError`, `FeeError`, `NotifyError`) live next
//! to the component that raises them. `RegistrationError` is what crosses module
//! boundaries: executors record it as a wallet's last error and the coordinator
//! returns it from construction.

use thiserror::Error;

use crate::block_monitor::SourceError;
use crate::chain::ChainError;
use crate::fee_controller::FeeError;

/// Configuration loading or validation failure
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {message}")]
    Io { path: String, message: String },

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Invalid value for {var}: {message}")]
    Env { var: String, message: String },

    #[error("Configuration validation error: {0}")]
    Validation(String),
}

impl ConfigError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}

/// Errors surfaced by the registration engine
#[derive(Debug, Clone, Error)]
pub enum RegistrationError {
    #[error("Block source error: {0}")]
    Source(#[from] SourceError),

    #[error("Quorum lost: {responding}/{total} sources responded (quorum {quorum})")]
    QuorumLost {
        responding: usize,
        total: usize,
        quorum: usize,
    },

    #[error("Submission rejected: {reason}")]
    SubmissionRejected { low_fee: bool, reason: String },

    #[error("Submission failed: {0}")]
    Submission(#[from] ChainError),

    #[error("Fee unavailable: {0}")]
    Fee(#[from] FeeError),

    #[error("Registration window closed at height {height}")]
    WindowClosed { height: u64 },

    #[error("No open registration slots remain")]
    SlotsFilled,

    #[error("Insufficient balance: {balance} < {required}")]
    InsufficientBalance { balance: u64, required: u64 },

    #[error("Shutdown requested")]
    ShutdownRequested,

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl RegistrationError {
    /// Fatal errors stop the run before any wallet is attempted
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Config(_))
    }

    /// Low-fee rejections retry with a uniform delay instead of exponential backoff
    pub fn is_low_fee_rejection(&self) -> bool {
        matches!(self, Self::SubmissionRejected { low_fee: true, .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        let config = RegistrationError::from(ConfigError::validation("no sources"));
        assert!(config.is_fatal());
        assert!(!RegistrationError::ShutdownRequested.is_fatal());
        assert!(!RegistrationError::WindowClosed { height: 10 }.is_fatal());
    }

    #[test]
    fn test_low_fee_rejection() {
        let low = RegistrationError::SubmissionRejected {
            low_fee: true,
            reason: "fee below clearing price".into(),
        };
        let other = RegistrationError::SubmissionRejected {
            low_fee: false,
            reason: "bad nonce".into(),
        };
        assert!(low.is_low_fee_rejection());
        assert!(!other.is_low_fee_rejection());
    }

    #[test]
    fn test_component_errors_convert() {
        let fee = RegistrationError::from(FeeError::StaleWindow {
            tick: 7,
            observed_tick: Some(5),
        });
        assert!(fee.to_string().starts_with("Fee unavailable"));
        assert!(!fee.is_fatal());

        let source = RegistrationError::from(SourceError::Timeout {
            source_id: "rpc".into(),
            timeout_ms: 1_000,
        });
        assert!(source.to_string().starts_with("Block source error"));

        let balance = RegistrationError::InsufficientBalance {
            balance: 5,
            required: 10,
        };
        assert_eq!(balance.to_string(), "Insufficient balance: 5 < 10");
    }

    #[test]
    fn test_display() {
        let err = RegistrationError::QuorumLost {
            responding: 1,
            total: 3,
            quorum: 2,
        };
        assert_eq!(
            err.to_string(),
            "Quorum lost: 1/3 sources responded (quorum 2)"
        );
    }
}
