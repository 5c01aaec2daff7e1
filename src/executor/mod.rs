//! Per-wallet attempt executor
//!
//! Drives one wallet through `Idle -> Waiting -> Attempting -> Registered |
//! Abandoned`. The executor owns its wallet exclusively and reports progress to
//! the coordinator as `ExecutorEvent`s; the only state it shares is read-only
//! (window states) or synchronized inside the fee controller.
//!
//! Every chain call and every wait is raced against cancellation. A
//! submission cut short by cancellation still yields an `Error` record with
//! detail `cancelled`, so each attempt produces exactly one record.

pub mod backoff;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, instrument, warn};

use crate::cancel::{either_cancelled, CancelReason, CancelSignal};
use crate::chain::{ChainClient, ChainError};
use crate::errors::RegistrationError;
use crate::fee_controller::{FeeController, FeeError};
use crate::metrics::{metrics, Timer};
use crate::observability::RunId;
use crate::structured_logging::AttemptLogger;
use crate::types::{
    AttemptOutcome, AttemptRecord, CongestionSample, FeeRecommendation, SubmissionOutcome,
    WalletState, WindowState,
};
use crate::wallet::{Wallet, WalletSnapshot};

use backoff::{BackoffKind, BackoffPolicy};

#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    /// Maximum total submissions for the wallet
    pub max_retries: u32,
    /// Windows the wallet may enter before it is abandoned
    pub max_windows: u32,
    /// Re-check period while waiting for window updates
    pub wait_timeout: Duration,
    pub submit_timeout: Duration,
    pub backoff: BackoffPolicy,
}

/// Progress reported to the coordinator
#[derive(Debug, Clone)]
pub enum ExecutorEvent {
    StateChanged(WalletSnapshot),
    Attempt(AttemptRecord),
    Registered {
        snapshot: WalletSnapshot,
        fee_paid: Option<u64>,
    },
    Abandoned {
        snapshot: WalletSnapshot,
        reason: String,
    },
}

/// Shared collaborators handed to every executor
#[derive(Clone)]
pub struct ExecutorContext {
    pub chain: Arc<dyn ChainClient>,
    pub fees: Arc<FeeController>,
    pub window_rx: watch::Receiver<Arc<WindowState>>,
    pub settings: ExecutorSettings,
    pub shutdown: CancelSignal,
    pub events: mpsc::UnboundedSender<ExecutorEvent>,
    pub run_id: RunId,
}

enum WindowOutcome {
    Registered,
    Exhausted,
    Closed { height: u64 },
    Cancelled(CancelReason),
}

pub struct AttemptExecutor {
    wallet: Wallet,
    ctx: ExecutorContext,
    cancel: CancelSignal,
    logger: AttemptLogger,
    cached_fee: Option<FeeRecommendation>,
    windows_entered: u32,
    consecutive_failures: u32,
}

impl AttemptExecutor {
    /// `cancel` is the wallet's own signal; the global shutdown comes with `ctx`
    pub fn new(wallet: Wallet, ctx: ExecutorContext, cancel: CancelSignal) -> Self {
        let logger = AttemptLogger::new(&ctx.run_id, wallet.id());
        Self {
            wallet,
            ctx,
            cancel,
            logger,
            cached_fee: None,
            windows_entered: 0,
            consecutive_failures: 0,
        }
    }

    pub fn wallet(&self) -> &Wallet {
        &self.wallet
    }

    /// Drive the wallet until it is terminal or cancelled
    #[instrument(skip(self), fields(wallet = %self.wallet.id()))]
    pub async fn run(mut self) -> WalletSnapshot {
        if let Some(reason) = self.cancel_reason() {
            self.on_cancelled(reason);
            return self.wallet.snapshot();
        }

        let precheck = self
            .guarded(self.ctx.chain.is_registered(self.wallet.id()))
            .await;
        match precheck {
            Err(reason) => {
                self.on_cancelled(reason);
                return self.wallet.snapshot();
            }
            Ok(Ok(true)) => {
                info!("Wallet already registered; skipping");
                self.finish_registered(None);
                return self.wallet.snapshot();
            }
            Ok(Ok(false)) => {}
            Ok(Err(e)) => warn!(error = %e, "Registration pre-check failed; continuing"),
        }

        let balance_check = self.check_balance().await;
        match balance_check {
            Err(reason) => {
                self.on_cancelled(reason);
                return self.wallet.snapshot();
            }
            Ok(Some(error)) => {
                self.abandon(error.to_string());
                return self.wallet.snapshot();
            }
            Ok(None) => {}
        }

        loop {
            self.set_state(WalletState::Waiting);

            let window = match self.wait_for_open_window().await {
                Ok(window) => window,
                Err(reason) => {
                    self.on_cancelled(reason);
                    break;
                }
            };
            self.windows_entered += 1;

            match self.attempt_in_window(window).await {
                WindowOutcome::Registered | WindowOutcome::Exhausted => break,
                WindowOutcome::Cancelled(reason) => {
                    self.on_cancelled(reason);
                    break;
                }
                WindowOutcome::Closed { height } => {
                    let error = RegistrationError::WindowClosed { height };
                    if self.windows_entered >= self.ctx.settings.max_windows {
                        self.abandon(error.to_string());
                        break;
                    }
                    info!(
                        windows_entered = self.windows_entered,
                        max_windows = self.ctx.settings.max_windows,
                        "Window closed; waiting for the next one"
                    );
                    self.wallet.set_last_error(error.to_string());
                }
            }
        }

        self.wallet.snapshot()
    }

    async fn wait_for_open_window(&mut self) -> Result<Arc<WindowState>, CancelReason> {
        let shutdown = self.ctx.shutdown.clone();
        let cancel = self.cancel.clone();
        let mut logged = false;

        loop {
            if let Some(reason) = self.cancel_reason() {
                return Err(reason);
            }

            let window = self.ctx.window_rx.borrow_and_update().clone();
            if window.is_open && !window.is_stale() {
                return Ok(window);
            }
            if !logged {
                self.logger.log_waiting(window.height, window.blocks_until_open);
                logged = true;
            }

            tokio::select! {
                reason = either_cancelled(&shutdown, &cancel) => return Err(reason),
                changed = self.ctx.window_rx.changed() => {
                    if changed.is_err() {
                        warn!("Window publisher gone; stopping");
                        return Err(CancelReason::Shutdown);
                    }
                }
                _ = tokio::time::sleep(self.ctx.settings.wait_timeout) => {
                    debug!("Window wait timed out; re-checking");
                }
            }
        }
    }

    /// Abandon-worthy error when the balance cannot cover the registration cost.
    ///
    /// Unknown balances pass; an unknown cost falls back to the configured base fee.
    async fn check_balance(&self) -> Result<Option<RegistrationError>, CancelReason> {
        let balance = match self.guarded(self.ctx.chain.balance(self.wallet.id())).await? {
            Ok(Some(balance)) => balance,
            Ok(None) => return Ok(None),
            Err(e) => {
                warn!(error = %e, "Balance pre-check failed; continuing");
                return Ok(None);
            }
        };

        let fallback = self.ctx.fees.config().base_fee;
        let required = match self.guarded(self.ctx.chain.registration_cost()).await? {
            Ok(cost) => cost.unwrap_or(fallback),
            Err(e) => {
                warn!(error = %e, "Registration cost unavailable; checking against base fee");
                fallback
            }
        };

        if balance < required {
            return Ok(Some(RegistrationError::InsufficientBalance { balance, required }));
        }
        debug!(balance, required, "Balance covers registration cost");
        Ok(None)
    }

    async fn attempt_in_window(&mut self, mut window: Arc<WindowState>) -> WindowOutcome {
        let shutdown = self.ctx.shutdown.clone();
        let cancel = self.cancel.clone();

        loop {
            if let Some(reason) = self.cancel_reason() {
                return WindowOutcome::Cancelled(reason);
            }

            let fee = match self.cached_fee(&window) {
                Some(fee) => Ok(fee),
                None => {
                    let queried = self.guarded(self.ctx.chain.registration_cost()).await;
                    let cost = match queried {
                        Err(reason) => return WindowOutcome::Cancelled(reason),
                        Ok(Ok(cost)) => cost,
                        Ok(Err(e)) => {
                            debug!(error = %e, "Registration cost unavailable; using base fee");
                            None
                        }
                    };
                    self.fresh_fee(&window, cost)
                }
            };
            let fee = match fee {
                Ok(fee) => fee,
                Err(e) => {
                    let error = RegistrationError::from(e);
                    debug!(error = %error, "Waiting for fresh window data");
                    tokio::select! {
                        reason = either_cancelled(&shutdown, &cancel) => {
                            return WindowOutcome::Cancelled(reason);
                        }
                        changed = self.ctx.window_rx.changed() => {
                            if changed.is_err() {
                                return WindowOutcome::Cancelled(CancelReason::Shutdown);
                            }
                        }
                        _ = tokio::time::sleep(self.ctx.settings.wait_timeout) => {}
                    }
                    window = self.ctx.window_rx.borrow_and_update().clone();
                    if !window.is_open {
                        return WindowOutcome::Closed {
                            height: window.height,
                        };
                    }
                    continue;
                }
            };

            self.set_state(WalletState::Attempting);
            let attempt = self.wallet.begin_attempt();
            self.logger.log_attempt_started(attempt, window.height, &fee);
            metrics().attempts_total.inc();

            let timer = Timer::start();
            let submitted = self
                .guarded(self.ctx.chain.submit(self.wallet.id(), &fee))
                .await;
            let result = match submitted {
                Ok(result) => result,
                Err(reason) => {
                    let latency_ms = timer.elapsed_ms();
                    self.logger.log_error(attempt, "cancelled", latency_ms);
                    let record = self.record(
                        attempt,
                        window.height,
                        &fee,
                        AttemptOutcome::Error,
                        latency_ms,
                        Some("cancelled".to_string()),
                    );
                    self.emit(ExecutorEvent::Attempt(record));
                    return WindowOutcome::Cancelled(reason);
                }
            };
            timer.observe_duration(&metrics().submit_latency);
            let latency_ms = timer.elapsed_ms();

            let (outcome, detail) = match &result {
                Ok(SubmissionOutcome::Accepted) => (AttemptOutcome::Accepted, None),
                Ok(SubmissionOutcome::RejectedLowFee) => (AttemptOutcome::RejectedLowFee, None),
                Ok(SubmissionOutcome::RejectedOther { reason }) => {
                    (AttemptOutcome::RejectedOther, Some(reason.clone()))
                }
                Err(e) => (AttemptOutcome::Error, Some(e.to_string())),
            };

            self.ctx
                .fees
                .record(CongestionSample::now(fee.total(), outcome));
            let record = self.record(attempt, window.height, &fee, outcome, latency_ms, detail);
            self.emit(ExecutorEvent::Attempt(record));

            let error = match result {
                Ok(SubmissionOutcome::Accepted) => {
                    self.logger.log_accepted(attempt, fee.total(), latency_ms);
                    self.finish_registered(Some(fee.total()));
                    return WindowOutcome::Registered;
                }
                Ok(SubmissionOutcome::RejectedLowFee) => {
                    metrics().low_fee_rejections_total.inc();
                    self.cached_fee = None;
                    RegistrationError::SubmissionRejected {
                        low_fee: true,
                        reason: "fee below clearing price".to_string(),
                    }
                }
                Ok(SubmissionOutcome::RejectedOther { reason }) => {
                    metrics().other_rejections_total.inc();
                    self.cached_fee = None;
                    RegistrationError::SubmissionRejected {
                        low_fee: false,
                        reason,
                    }
                }
                Err(e) => {
                    metrics().submission_errors_total.inc();
                    RegistrationError::Submission(e)
                }
            };
            match &error {
                RegistrationError::SubmissionRejected { low_fee, .. } => {
                    self.logger
                        .log_rejected(attempt, *low_fee, &error.to_string(), latency_ms)
                }
                _ => self.logger.log_error(attempt, &error.to_string(), latency_ms),
            }
            self.wallet.set_last_error(error.to_string());
            let kind = if error.is_low_fee_rejection() {
                BackoffKind::Uniform
            } else {
                BackoffKind::Exponential
            };
            self.consecutive_failures += 1;

            if self.wallet.attempts() >= self.ctx.settings.max_retries {
                let reason = format!(
                    "{} attempts exhausted; last error: {}",
                    self.wallet.attempts(),
                    self.wallet.last_error().unwrap_or("unknown")
                );
                self.abandon(reason);
                return WindowOutcome::Exhausted;
            }

            let delay = self
                .ctx
                .settings
                .backoff
                .next_delay(kind, self.consecutive_failures);
            self.logger.log_backoff(attempt, delay);
            tokio::select! {
                reason = either_cancelled(&shutdown, &cancel) => {
                    return WindowOutcome::Cancelled(reason);
                }
                _ = tokio::time::sleep(delay) => {}
            }

            window = self.ctx.window_rx.borrow_and_update().clone();
            if !window.is_open {
                return WindowOutcome::Closed {
                    height: window.height,
                };
            }
        }
    }

    /// The cached fee, while it is valid for the current height
    fn cached_fee(&self, window: &WindowState) -> Option<FeeRecommendation> {
        self.cached_fee
            .as_ref()
            .filter(|fee| fee.is_valid_at(window.height) && !window.is_stale())
            .cloned()
    }

    fn fresh_fee(
        &mut self,
        window: &WindowState,
        registration_cost: Option<u64>,
    ) -> Result<FeeRecommendation, FeeError> {
        let fee = self.ctx.fees.recommend_with_cost(window, registration_cost)?;
        self.cached_fee = Some(fee.clone());
        Ok(fee)
    }

    /// Run a chain call under the submit timeout, giving up on cancellation
    async fn guarded<T, F>(&self, call: F) -> Result<Result<T, ChainError>, CancelReason>
    where
        F: Future<Output = Result<T, ChainError>>,
    {
        let timeout = self.ctx.settings.submit_timeout;
        tokio::select! {
            reason = either_cancelled(&self.ctx.shutdown, &self.cancel) => Err(reason),
            result = tokio::time::timeout(timeout, call) => Ok(result.unwrap_or_else(|_| {
                Err(ChainError::Timeout {
                    timeout_ms: timeout.as_millis() as u64,
                })
            })),
        }
    }

    fn record(
        &self,
        attempt: u32,
        height: u64,
        fee: &FeeRecommendation,
        outcome: AttemptOutcome,
        latency_ms: u64,
        detail: Option<String>,
    ) -> AttemptRecord {
        AttemptRecord {
            wallet_id: self.wallet.id().clone(),
            attempt,
            height,
            fee_used: fee.total(),
            base_fee: fee.base_fee,
            priority_fee: fee.priority_fee,
            outcome,
            latency_ms,
            timestamp: chrono::Utc::now(),
            detail,
        }
    }

    fn cancel_reason(&self) -> Option<CancelReason> {
        self.ctx.shutdown.reason().or_else(|| self.cancel.reason())
    }

    fn on_cancelled(&mut self, reason: CancelReason) {
        match reason {
            CancelReason::Shutdown => {
                // Shutdown leaves the wallet non-terminal
                if self.wallet.state() == WalletState::Attempting {
                    self.set_state(WalletState::Waiting);
                }
                self.wallet
                    .set_last_error(RegistrationError::ShutdownRequested.to_string());
                self.emit(ExecutorEvent::StateChanged(self.wallet.snapshot()));
                info!(attempts = self.wallet.attempts(), "Executor stopped by shutdown");
            }
            CancelReason::ConfirmedRegistered => {
                info!("Registration confirmed independently; stopping");
                self.finish_registered(None);
            }
            CancelReason::SlotsFilled => {
                self.abandon(RegistrationError::SlotsFilled.to_string());
            }
        }
    }

    fn set_state(&mut self, next: WalletState) {
        match self.wallet.transition(next) {
            Ok(true) => self.emit(ExecutorEvent::StateChanged(self.wallet.snapshot())),
            Ok(false) => {}
            Err(e) => warn!(error = %e, "Ignoring wallet state change"),
        }
    }

    fn finish_registered(&mut self, fee_paid: Option<u64>) {
        if let Err(e) = self.wallet.transition(WalletState::Registered) {
            warn!(error = %e, "Wallet already terminal");
            return;
        }
        metrics().registrations_total.inc();
        self.emit(ExecutorEvent::Registered {
            snapshot: self.wallet.snapshot(),
            fee_paid,
        });
    }

    fn abandon(&mut self, reason: String) {
        if let Err(e) = self.wallet.transition(WalletState::Abandoned) {
            warn!(error = %e, "Wallet already terminal");
            return;
        }
        self.wallet.set_last_error(reason.clone());
        self.logger.log_abandoned(self.wallet.attempts(), &reason);
        metrics().abandonments_total.inc();
        self.emit(ExecutorEvent::Abandoned {
            snapshot: self.wallet.snapshot(),
            reason,
        });
    }

    fn emit(&self, event: ExecutorEvent) {
        if self.ctx.events.send(event).is_err() {
            debug!("Coordinator event channel closed");
        }
    }
}
