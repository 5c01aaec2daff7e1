//! Adaptive priority fee controller
//!
//! Keeps a bounded, time-windowed history of congestion samples and a single
//! fee multiplier. The multiplier only moves when a sample is recorded:
//! low-fee rejections above the rejection threshold push it up by `step_up`,
//! acceptances while the rejection rate is at or below the threshold pull it
//! down by `step_down`. It is always kept within `[1.0, max_multiplier]`.
//!
//! Observed block times feed a separate congestion score in `[0.0, 1.0]`.
//! Slow blocks raise it, blocks at or under the expected time decay it. The
//! score scales the feedback multiplier by up to `1 + congestion_weight`, and
//! the product is still capped at `max_multiplier`.

use chrono::Duration as ChronoDuration;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::errors::ConfigError;
use crate::metrics::metrics;
use crate::types::{AttemptOutcome, CongestionSample, FeeRecommendation, WindowState};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FeeError {
    #[error("Window data is stale (tick {tick}, last observation {observed_tick:?})")]
    StaleWindow {
        tick: u64,
        observed_tick: Option<u64>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeConfig {
    /// Registration cost paid on every submission (rao), used when the chain
    /// cannot report a live cost
    #[serde(default = "default_base_fee")]
    pub base_fee: u64,

    /// Priority fee at multiplier 1.0 (rao)
    #[serde(default = "default_base_priority_fee")]
    pub base_priority_fee: u64,

    /// Set from the top-level `enable_priority_fee` option
    #[serde(skip, default = "default_true")]
    pub enable_priority_fee: bool,

    #[serde(default = "default_step_up")]
    pub step_up: f64,

    #[serde(default = "default_step_down")]
    pub step_down: f64,

    #[serde(default = "default_max_multiplier")]
    pub max_multiplier: f64,

    /// Low-fee rejection rate above which rejections raise the multiplier
    #[serde(default = "default_rejection_threshold")]
    pub rejection_threshold: f64,

    #[serde(default = "default_sample_window_secs")]
    pub sample_window_secs: u64,

    #[serde(default = "default_max_samples")]
    pub max_samples: usize,

    /// Blocks past the current height a recommendation stays valid
    #[serde(default = "default_validity_blocks")]
    pub validity_blocks: u64,

    /// Block time the network targets; congestion rises above it
    #[serde(default = "default_expected_block_secs")]
    pub expected_block_secs: f64,

    /// Extra multiplier applied at full congestion
    #[serde(default = "default_congestion_weight")]
    pub congestion_weight: f64,
}

fn default_base_fee() -> u64 { 1_000_000_000 }
fn default_base_priority_fee() -> u64 { 500_000_000 }
fn default_true() -> bool { true }
fn default_step_up() -> f64 { 1.5 }
fn default_step_down() -> f64 { 0.9 }
fn default_max_multiplier() -> f64 { 4.0 }
fn default_rejection_threshold() -> f64 { 0.25 }
fn default_sample_window_secs() -> u64 { 600 }
fn default_max_samples() -> usize { 64 }
fn default_validity_blocks() -> u64 { 3 }
fn default_expected_block_secs() -> f64 { 12.0 }
fn default_congestion_weight() -> f64 { 0.5 }

impl Default for FeeConfig {
    fn default() -> Self {
        Self {
            base_fee: default_base_fee(),
            base_priority_fee: default_base_priority_fee(),
            enable_priority_fee: default_true(),
            step_up: default_step_up(),
            step_down: default_step_down(),
            max_multiplier: default_max_multiplier(),
            rejection_threshold: default_rejection_threshold(),
            sample_window_secs: default_sample_window_secs(),
            max_samples: default_max_samples(),
            validity_blocks: default_validity_blocks(),
            expected_block_secs: default_expected_block_secs(),
            congestion_weight: default_congestion_weight(),
        }
    }
}

impl FeeConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.step_up <= 1.0 {
            return Err(ConfigError::validation("fee.step_up must be > 1.0"));
        }
        if self.step_down <= 0.0 || self.step_down > 1.0 {
            return Err(ConfigError::validation("fee.step_down must be in range (0.0, 1.0]"));
        }
        if self.max_multiplier < 1.0 {
            return Err(ConfigError::validation("fee.max_multiplier must be >= 1.0"));
        }
        if !(0.0..=1.0).contains(&self.rejection_threshold) {
            return Err(ConfigError::validation(
                "fee.rejection_threshold must be in range [0.0, 1.0]",
            ));
        }
        if self.max_samples == 0 {
            return Err(ConfigError::validation("fee.max_samples must be > 0"));
        }
        if !(self.expected_block_secs > 0.0) {
            return Err(ConfigError::validation("fee.expected_block_secs must be > 0"));
        }
        if !(self.congestion_weight >= 0.0) {
            return Err(ConfigError::validation("fee.congestion_weight must be >= 0.0"));
        }
        Ok(())
    }

    /// Largest total fee the controller can ever recommend
    pub fn max_total_fee(&self) -> u64 {
        let max_priority = if self.enable_priority_fee {
            (self.base_priority_fee as f64 * self.max_multiplier).round() as u64
        } else {
            0
        };
        self.base_fee.saturating_add(max_priority)
    }
}

/// Fee history summary for status reporting
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeeStats {
    pub multiplier: f64,
    pub congestion: f64,
    pub samples: usize,
    pub success_rate: f64,
    pub low_fee_rejection_rate: f64,
    pub avg_fee_paid: u64,
    pub min_fee_paid: u64,
    pub max_fee_paid: u64,
}

#[derive(Debug)]
struct FeeState {
    samples: VecDeque<CongestionSample>,
    multiplier: f64,
    congestion: f64,
}

#[derive(Debug)]
pub struct FeeController {
    config: FeeConfig,
    state: RwLock<FeeState>,
}

impl FeeController {
    pub fn new(config: FeeConfig) -> Self {
        metrics().fee_multiplier.set(1.0);
        Self {
            state: RwLock::new(FeeState {
                samples: VecDeque::with_capacity(config.max_samples),
                multiplier: 1.0,
                congestion: 0.0,
            }),
            config,
        }
    }

    pub fn config(&self) -> &FeeConfig {
        &self.config
    }

    pub fn multiplier(&self) -> f64 {
        self.state.read().multiplier
    }

    pub fn congestion(&self) -> f64 {
        self.state.read().congestion
    }

    /// Feedback multiplier scaled by congestion, capped at `max_multiplier`
    pub fn effective_multiplier(&self) -> f64 {
        let state = self.state.read();
        self.scaled(state.multiplier, state.congestion)
    }

    fn scaled(&self, multiplier: f64, congestion: f64) -> f64 {
        (multiplier * (1.0 + congestion * self.config.congestion_weight))
            .min(self.config.max_multiplier)
            .max(1.0)
    }

    /// Recommend a fee for the given window using the configured base fee.
    ///
    /// Refused when the window has not been observed for more than one tick.
    pub fn recommend(&self, window: &WindowState) -> Result<FeeRecommendation, FeeError> {
        self.recommend_with_cost(window, None)
    }

    /// Recommend a fee on top of a live registration cost when one is known
    pub fn recommend_with_cost(
        &self,
        window: &WindowState,
        registration_cost: Option<u64>,
    ) -> Result<FeeRecommendation, FeeError> {
        if window.is_stale() {
            return Err(FeeError::StaleWindow {
                tick: window.tick,
                observed_tick: window.observed_tick,
            });
        }

        let multiplier = self.effective_multiplier();
        let priority_fee = if self.config.enable_priority_fee {
            (self.config.base_priority_fee as f64 * multiplier).round() as u64
        } else {
            0
        };

        Ok(FeeRecommendation {
            base_fee: registration_cost.unwrap_or(self.config.base_fee),
            priority_fee,
            valid_until_height: window.height.saturating_add(self.config.validity_blocks),
        })
    }

    /// Append a sample and adjust the multiplier
    pub fn record(&self, sample: CongestionSample) {
        let mut state = self.state.write();
        let outcome = sample.outcome;
        let newest = sample.timestamp;

        state.samples.push_back(sample);
        let window = ChronoDuration::seconds(self.config.sample_window_secs as i64);
        while let Some(front) = state.samples.front() {
            if state.samples.len() > self.config.max_samples || newest - front.timestamp > window {
                state.samples.pop_front();
            } else {
                break;
            }
        }

        let rate = low_fee_rate(&state.samples);
        let before = state.multiplier;
        match outcome {
            AttemptOutcome::RejectedLowFee if rate > self.config.rejection_threshold => {
                state.multiplier = (before * self.config.step_up).min(self.config.max_multiplier);
            }
            AttemptOutcome::Accepted if rate <= self.config.rejection_threshold => {
                state.multiplier = (before * self.config.step_down).max(1.0);
            }
            _ => {}
        }

        if state.multiplier != before {
            debug!(
                outcome = %outcome,
                rejection_rate = rate,
                from = before,
                to = state.multiplier,
                "Fee multiplier adjusted"
            );
            metrics()
                .fee_multiplier
                .set(self.scaled(state.multiplier, state.congestion));
        }
    }

    /// Fold one observed block time into the congestion score
    pub fn observe_block_time(&self, block_time: Duration) {
        let ratio = block_time.as_secs_f64() / self.config.expected_block_secs;
        let mut state = self.state.write();
        let before = state.congestion;
        let (step, cap) = if ratio > 2.0 {
            (0.1, 1.0)
        } else if ratio > 1.5 {
            (0.05, 0.8)
        } else if ratio > 1.0 {
            (0.02, 0.5)
        } else {
            (-0.05, 1.0)
        };

        state.congestion = if step < 0.0 {
            (before + step).max(0.0)
        } else if before < cap {
            (before + step).min(cap)
        } else {
            before
        };

        if state.congestion != before {
            debug!(
                block_time_ms = block_time.as_millis() as u64,
                from = before,
                to = state.congestion,
                "Block congestion adjusted"
            );
            metrics()
                .fee_multiplier
                .set(self.scaled(state.multiplier, state.congestion));
        }
    }

    pub fn stats(&self) -> FeeStats {
        let state = self.state.read();
        let samples = &state.samples;
        let count = samples.len();

        let accepted = samples
            .iter()
            .filter(|s| s.outcome == AttemptOutcome::Accepted)
            .count();
        let total_paid: u128 = samples.iter().map(|s| u128::from(s.fee_paid)).sum();

        FeeStats {
            multiplier: state.multiplier,
            congestion: state.congestion,
            samples: count,
            success_rate: if count == 0 { 0.0 } else { accepted as f64 / count as f64 },
            low_fee_rejection_rate: low_fee_rate(samples),
            avg_fee_paid: if count == 0 { 0 } else { (total_paid / count as u128) as u64 },
            min_fee_paid: samples.iter().map(|s| s.fee_paid).min().unwrap_or(0),
            max_fee_paid: samples.iter().map(|s| s.fee_paid).max().unwrap_or(0),
        }
    }
}

fn low_fee_rate(samples: &VecDeque<CongestionSample>) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let low = samples
        .iter()
        .filter(|s| s.outcome == AttemptOutcome::RejectedLowFee)
        .count();
    low as f64 / samples.len() as f64
}
