//! Test Utilities Module
//!
//! Scripted collaborators for deterministic tests: block sources with fixed or
//! sequenced heights, a chain client that replays queued outcomes, and a
//! notifier that records everything it is asked to deliver.
//!
//! These utilities are only compiled when running tests or when the
//! `test_utils` feature is enabled.

#![cfg(any(test, feature = "test_utils"))]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::block_monitor::{BlockSource, SourceError};
use crate::chain::{ChainClient, ChainError};
use crate::notifier::{NotificationEvent, Notifier, NotifyError};
use crate::types::{BlockSnapshot, FeeRecommendation, SubmissionOutcome, WalletId};

/// One scripted reply from a block source
#[derive(Debug, Clone)]
pub enum SourceStep {
    Height(u64),
    Fail,
    Slow(u64, Duration),
}

/// Block source that replays a script; the last step repeats forever
pub struct ScriptedBlockSource {
    id: String,
    steps: Mutex<VecDeque<SourceStep>>,
    last: Mutex<SourceStep>,
    calls: AtomicUsize,
}

impl ScriptedBlockSource {
    pub fn scripted(id: &str, steps: Vec<SourceStep>) -> Arc<Self> {
        let last = steps.last().cloned().unwrap_or(SourceStep::Fail);
        Arc::new(Self {
            id: id.to_string(),
            steps: Mutex::new(steps.into()),
            last: Mutex::new(last),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn fixed(id: &str, height: u64) -> Arc<dyn BlockSource> {
        Self::scripted(id, vec![SourceStep::Height(height)])
    }

    pub fn failing(id: &str) -> Arc<dyn BlockSource> {
        Self::scripted(id, vec![SourceStep::Fail])
    }

    pub fn slow(id: &str, height: u64, delay: Duration) -> Arc<dyn BlockSource> {
        Self::scripted(id, vec![SourceStep::Slow(height, delay)])
    }

    /// Heights returned in order, the final one repeating
    pub fn sequence(id: &str, heights: &[u64]) -> Arc<Self> {
        Self::scripted(id, heights.iter().copied().map(SourceStep::Height).collect())
    }

    /// Replace the repeating step once the script runs out
    pub fn set_next(&self, step: SourceStep) {
        self.steps.lock().clear();
        *self.last.lock() = step;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BlockSource for ScriptedBlockSource {
    fn id(&self) -> &str {
        &self.id
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(1)
    }

    async fn fetch(&self) -> Result<BlockSnapshot, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let step = self
            .steps
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.last.lock().clone());

        match step {
            SourceStep::Height(height) => {
                Ok(BlockSnapshot::new(height, self.id.clone(), Duration::from_millis(1)))
            }
            SourceStep::Fail => Err(SourceError::Unreachable {
                source_id: self.id.clone(),
                message: "scripted failure".to_string(),
            }),
            SourceStep::Slow(height, delay) => {
                tokio::time::sleep(delay).await;
                Ok(BlockSnapshot::new(height, self.id.clone(), delay))
            }
        }
    }
}

/// Scripted reply from the chain
#[derive(Debug, Clone)]
pub enum ChainStep {
    Outcome(SubmissionOutcome),
    Error(ChainError),
    /// Never answers; exercises the submit timeout and cancellation
    Hang,
}

/// Chain client that replays queued submission results
///
/// Once the queue is empty every submission is accepted.
#[derive(Default)]
pub struct ScriptedChainClient {
    steps: Mutex<VecDeque<ChainStep>>,
    submissions: Mutex<Vec<(WalletId, u64)>>,
    registered: Mutex<HashSet<WalletId>>,
    open_slots: Mutex<Option<u32>>,
    registration_cost: Mutex<Option<u64>>,
    balances: Mutex<HashMap<WalletId, u64>>,
    hang_registered_checks: AtomicBool,
    registered_checks: AtomicUsize,
}

impl ScriptedChainClient {
    pub fn new(steps: Vec<ChainStep>) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps.into()),
            ..Self::default()
        })
    }

    pub fn accepting() -> Arc<Self> {
        Self::new(Vec::new())
    }

    pub fn outcomes(outcomes: Vec<SubmissionOutcome>) -> Arc<Self> {
        Self::new(outcomes.into_iter().map(ChainStep::Outcome).collect())
    }

    pub fn push(&self, step: ChainStep) {
        self.steps.lock().push_back(step);
    }

    pub fn mark_registered(&self, wallet: &WalletId) {
        self.registered.lock().insert(wallet.clone());
    }

    pub fn set_open_slots(&self, slots: Option<u32>) {
        *self.open_slots.lock() = slots;
    }

    pub fn set_registration_cost(&self, cost: Option<u64>) {
        *self.registration_cost.lock() = cost;
    }

    pub fn set_balance(&self, wallet: &WalletId, balance: u64) {
        self.balances.lock().insert(wallet.clone(), balance);
    }

    /// Make `is_registered` never answer
    pub fn hang_registered_checks(&self) {
        self.hang_registered_checks.store(true, Ordering::SeqCst);
    }

    pub fn submit_count(&self) -> usize {
        self.submissions.lock().len()
    }

    pub fn submissions_for(&self, wallet: &WalletId) -> usize {
        self.submissions.lock().iter().filter(|(w, _)| w == wallet).count()
    }

    /// Total fee of every submission, in order
    pub fn fees(&self) -> Vec<u64> {
        self.submissions.lock().iter().map(|(_, fee)| *fee).collect()
    }

    pub fn registered_checks(&self) -> usize {
        self.registered_checks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChainClient for ScriptedChainClient {
    async fn submit(
        &self,
        wallet: &WalletId,
        fee: &FeeRecommendation,
    ) -> Result<SubmissionOutcome, ChainError> {
        self.submissions.lock().push((wallet.clone(), fee.total()));
        let step = self
            .steps
            .lock()
            .pop_front()
            .unwrap_or(ChainStep::Outcome(SubmissionOutcome::Accepted));

        match step {
            ChainStep::Outcome(outcome) => {
                if outcome == SubmissionOutcome::Accepted {
                    self.registered.lock().insert(wallet.clone());
                }
                Ok(outcome)
            }
            ChainStep::Error(e) => Err(e),
            ChainStep::Hang => std::future::pending().await,
        }
    }

    async fn is_registered(&self, wallet: &WalletId) -> Result<bool, ChainError> {
        self.registered_checks.fetch_add(1, Ordering::SeqCst);
        if self.hang_registered_checks.load(Ordering::SeqCst) {
            return std::future::pending().await;
        }
        Ok(self.registered.lock().contains(wallet))
    }

    async fn open_slots(&self) -> Result<Option<u32>, ChainError> {
        Ok(*self.open_slots.lock())
    }

    async fn registration_cost(&self) -> Result<Option<u64>, ChainError> {
        Ok(*self.registration_cost.lock())
    }

    async fn balance(&self, wallet: &WalletId) -> Result<Option<u64>, ChainError> {
        Ok(self.balances.lock().get(wallet).copied())
    }
}

/// Notifier that keeps every event; `failing` records and then errors
#[derive(Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<NotificationEvent>>,
    fail: bool,
}

impl RecordingNotifier {
    pub fn failing() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn events(&self) -> Vec<NotificationEvent> {
        self.events.lock().clone()
    }

    pub fn count(&self, kind: &str) -> usize {
        self.events.lock().iter().filter(|e| e.kind() == kind).count()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, event: &NotificationEvent) -> Result<(), NotifyError> {
        self.events.lock().push(event.clone());
        if self.fail {
            return Err(NotifyError::Transport("scripted failure".to_string()));
        }
        Ok(())
    }
}
