//! Common types used throughout the registration engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Wallet identifier (`coldkey/hotkey` for wallets discovered on disk)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WalletId(String);

impl WalletId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WalletId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for WalletId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for WalletId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Lifecycle state of a wallet registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalletState {
    /// Not started yet (queued behind the worker pool)
    Idle,
    /// Waiting for the registration window to open
    Waiting,
    /// Submitting or backing off between submissions
    Attempting,
    /// Registration accepted (terminal)
    Registered,
    /// Gave up for this run (terminal)
    Abandoned,
}

impl WalletState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Registered | Self::Abandoned)
    }
}

impl fmt::Display for WalletState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Waiting => "waiting",
            Self::Attempting => "attempting",
            Self::Registered => "registered",
            Self::Abandoned => "abandoned",
        };
        write!(f, "{}", s)
    }
}

/// A single block height observation from one source. Immutable once created.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockSnapshot {
    pub height: u64,
    pub source: String,
    pub observed_at: DateTime<Utc>,
    pub latency: Duration,
}

impl BlockSnapshot {
    pub fn new(height: u64, source: impl Into<String>, latency: Duration) -> Self {
        Self {
            height,
            source: source.into(),
            observed_at: Utc::now(),
            latency,
        }
    }
}

/// How much the published block height can be trusted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    /// At least quorum sources responded this tick
    High,
    /// Some, but fewer than quorum, sources responded
    Degraded,
    /// No source responded; openness is held from the previous state
    Unknown,
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::High => write!(f, "high"),
            Self::Degraded => write!(f, "degraded"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Registration window state derived from one monitor tick.
///
/// Published wholesale by the block monitor; never mutated after publication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WindowState {
    pub height: u64,
    pub tempo_position: u64,
    pub is_open: bool,
    /// Blocks until the open range closes (0 while closed)
    pub blocks_remaining: u64,
    /// Blocks until the next window opens (0 while open)
    pub blocks_until_open: u64,
    pub confidence: Confidence,
    pub responding: usize,
    pub total_sources: usize,
    /// Monitor tick that produced this state
    pub tick: u64,
    /// Tick of the last real height observation (`None` before the first one)
    pub observed_tick: Option<u64>,
}

impl WindowState {
    /// State published before the first monitor tick
    pub fn initial(total_sources: usize) -> Self {
        Self {
            height: 0,
            tempo_position: 0,
            is_open: false,
            blocks_remaining: 0,
            blocks_until_open: 0,
            confidence: Confidence::Unknown,
            responding: 0,
            total_sources,
            tick: 0,
            observed_tick: None,
        }
    }

    /// True when the underlying observation is older than one tick
    pub fn is_stale(&self) -> bool {
        match self.observed_tick {
            None => true,
            Some(observed) => self.tick.saturating_sub(observed) > 1,
        }
    }

    pub fn status_line(&self) -> String {
        if self.observed_tick.is_none() {
            return "Unknown".to_string();
        }
        if self.is_open {
            format!("WINDOW ACTIVE - {} blocks left", self.blocks_remaining)
        } else {
            format!("Next window in ~{} blocks", self.blocks_until_open)
        }
    }
}

/// Result of one submission attempt, as seen by the fee controller and the report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Accepted,
    RejectedLowFee,
    RejectedOther,
    Error,
}

impl fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Accepted => "accepted",
            Self::RejectedLowFee => "rejected_low_fee",
            Self::RejectedOther => "rejected_other",
            Self::Error => "error",
        };
        write!(f, "{}", s)
    }
}

/// Outcome carried by a congestion sample
pub type SampleOutcome = AttemptOutcome;

/// Fee feedback sample. Appended to the fee controller history, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CongestionSample {
    pub timestamp: DateTime<Utc>,
    pub fee_paid: u64,
    pub outcome: AttemptOutcome,
}

impl CongestionSample {
    pub fn now(fee_paid: u64, outcome: AttemptOutcome) -> Self {
        Self {
            timestamp: Utc::now(),
            fee_paid,
            outcome,
        }
    }
}

/// Fee snapshot handed to a worker for one or more submissions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeRecommendation {
    pub base_fee: u64,
    pub priority_fee: u64,
    /// Last block height at which this recommendation may be reused
    pub valid_until_height: u64,
}

impl FeeRecommendation {
    pub fn total(&self) -> u64 {
        self.base_fee.saturating_add(self.priority_fee)
    }

    pub fn is_valid_at(&self, height: u64) -> bool {
        height <= self.valid_until_height
    }
}

/// Answer from the chain client for an accepted-for-processing submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionOutcome {
    Accepted,
    RejectedLowFee,
    RejectedOther { reason: String },
}

/// One submission attempt. Append-only; aggregated into the run report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub wallet_id: WalletId,
    pub attempt: u32,
    pub height: u64,
    pub fee_used: u64,
    pub base_fee: u64,
    pub priority_fee: u64,
    pub outcome: AttemptOutcome,
    pub latency_ms: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(WalletState::Registered.is_terminal());
        assert!(WalletState::Abandoned.is_terminal());
        assert!(!WalletState::Waiting.is_terminal());
        assert!(!WalletState::Attempting.is_terminal());
        assert!(!WalletState::Idle.is_terminal());
    }

    #[test]
    fn test_window_staleness() {
        let mut state = WindowState::initial(3);
        assert!(state.is_stale());

        state.tick = 5;
        state.observed_tick = Some(5);
        assert!(!state.is_stale());

        state.tick = 6;
        assert!(!state.is_stale());

        state.tick = 7;
        assert!(state.is_stale());
    }

    #[test]
    fn test_status_line() {
        let mut state = WindowState::initial(1);
        assert_eq!(state.status_line(), "Unknown");

        state.observed_tick = Some(1);
        state.is_open = true;
        state.blocks_remaining = 12;
        assert_eq!(state.status_line(), "WINDOW ACTIVE - 12 blocks left");

        state.is_open = false;
        state.blocks_until_open = 40;
        assert_eq!(state.status_line(), "Next window in ~40 blocks");
    }

    #[test]
    fn test_fee_total_and_validity() {
        let fee = FeeRecommendation {
            base_fee: 1_000,
            priority_fee: 250,
            valid_until_height: 105,
        };
        assert_eq!(fee.total(), 1_250);
        assert!(fee.is_valid_at(105));
        assert!(!fee.is_valid_at(106));
    }

    #[test]
    fn test_outcome_serialization() {
        let json = serde_json::to_string(&AttemptOutcome::RejectedLowFee).unwrap();
        assert_eq!(json, "\"rejected_low_fee\"");
    }
}
