//! Registration coordinator
//!
//! Owns the block monitor and fee controller, runs a fixed pool of workers that
//! pull attempt executors from a shared queue, and aggregates executor events
//! into wallet snapshots, notifications and the final run report.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};

use crate::block_monitor::reconcile::default_quorum;
use crate::block_monitor::{BlockMonitor, BlockSource};
use crate::cancel::{CancelReason, CancelSignal};
use crate::chain::ChainClient;
use crate::config::Config;
use crate::errors::RegistrationError;
use crate::executor::{AttemptExecutor, ExecutorContext, ExecutorEvent, ExecutorSettings};
use crate::fee_controller::FeeController;
use crate::metrics::metrics;
use crate::notifier::{NotificationDispatcher, NotificationEvent, Notifier, RunProgress};
use crate::observability::RunId;
use crate::report::RunReport;
use crate::types::{Confidence, WalletId, WindowState};
use crate::wallet::{Wallet, WalletSnapshot};

#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    pub thread_count: usize,
    pub confirmation_interval: Duration,
    pub status_interval: Duration,
    pub status_notify_interval: Duration,
    pub shutdown_grace: Duration,
}

impl CoordinatorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            thread_count: config.thread_count,
            confirmation_interval: Duration::from_millis(config.confirmation_interval_ms),
            status_interval: Duration::from_secs(config.status_interval_secs),
            status_notify_interval: Duration::from_secs(config.status_notify_interval_secs),
            shutdown_grace: Duration::from_millis(config.shutdown_grace_ms),
        }
    }
}

pub struct RegistrationCoordinator {
    monitor: Arc<BlockMonitor>,
    fees: Arc<FeeController>,
    chain: Arc<dyn ChainClient>,
    notifier: Arc<dyn Notifier>,
    executor_settings: ExecutorSettings,
    settings: CoordinatorSettings,
    run_id: RunId,
}

impl RegistrationCoordinator {
    /// Validate the configuration and assemble the engine. Configuration errors
    /// are the only fatal errors.
    pub fn new(
        config: &Config,
        sources: Vec<Arc<dyn BlockSource>>,
        chain: Arc<dyn ChainClient>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, RegistrationError> {
        config.validate()?;
        if sources.len() != config.sources.len() {
            warn!(
                built = sources.len(),
                configured = config.sources.len(),
                "Source count differs from configuration"
            );
        }

        let mut monitor_config = config.monitor_config()?;
        monitor_config.quorum = config
            .quorum
            .unwrap_or_else(|| default_quorum(sources.len()))
            .min(sources.len().max(1));
        let monitor = Arc::new(BlockMonitor::new(sources, monitor_config)?);

        Ok(Self {
            monitor,
            fees: Arc::new(FeeController::new(config.fee_config())),
            chain,
            notifier,
            executor_settings: config.executor_settings(),
            settings: CoordinatorSettings::from_config(config),
            run_id: RunId::new(),
        })
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    pub fn monitor(&self) -> &Arc<BlockMonitor> {
        &self.monitor
    }

    pub fn fees(&self) -> &Arc<FeeController> {
        &self.fees
    }

    /// Run every wallet to a terminal state, or until `shutdown` fires
    #[instrument(skip_all, fields(run_id = %self.run_id, wallets = wallets.len()))]
    pub async fn run(&self, wallets: Vec<Wallet>, shutdown: CancelSignal) -> RunReport {
        let started_at = chrono::Utc::now();
        let total = wallets.len();
        info!(
            threads = self.settings.thread_count,
            "Starting registration run for {} wallets", total
        );

        let dispatcher = NotificationDispatcher::spawn(Arc::clone(&self.notifier));
        let background_stop = CancelSignal::new();
        let monitor_handle = tokio::spawn(Arc::clone(&self.monitor).run(background_stop.clone()));

        let snapshots: Arc<DashMap<WalletId, WalletSnapshot>> = Arc::new(DashMap::new());
        let wallet_cancels: Arc<DashMap<WalletId, CancelSignal>> = Arc::new(DashMap::new());
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();

        let ctx = ExecutorContext {
            chain: Arc::clone(&self.chain),
            fees: Arc::clone(&self.fees),
            window_rx: self.monitor.subscribe(),
            settings: self.executor_settings.clone(),
            shutdown: shutdown.clone(),
            events: event_tx,
            run_id: self.run_id.clone(),
        };

        let mut queue = VecDeque::with_capacity(total);
        for wallet in wallets {
            let cancel = CancelSignal::new();
            snapshots.insert(wallet.id().clone(), wallet.snapshot());
            wallet_cancels.insert(wallet.id().clone(), cancel.clone());
            queue.push_back(AttemptExecutor::new(wallet, ctx.clone(), cancel));
        }
        // Executors hold the only senders now; the channel closes when they finish
        drop(ctx);

        let queue = Arc::new(Mutex::new(queue));
        let mut workers = JoinSet::new();
        for worker_id in 0..self.settings.thread_count.min(total) {
            let queue = Arc::clone(&queue);
            workers.spawn(async move {
                loop {
                    let next = queue.lock().pop_front();
                    let Some(executor) = next else { break };
                    metrics().active_executors.inc();
                    let _active = scopeguard::guard((), |_| metrics().active_executors.dec());
                    let snapshot = executor.run().await;
                    debug!(worker_id, wallet = %snapshot.wallet_id, state = %snapshot.state, "Executor finished");
                }
            });
        }

        let watcher = tokio::spawn(confirmation_watcher(
            Arc::clone(&self.chain),
            Arc::clone(&snapshots),
            Arc::clone(&wallet_cancels),
            self.settings.confirmation_interval,
            background_stop.clone(),
        ));

        let mut records = Vec::new();
        let mut window_rx = self.monitor.subscribe();
        let mut last_window = window_rx.borrow_and_update().clone();
        let mut monitor_alive = true;
        let mut block_times = BlockTimeTracker::default();

        let mut status_tick = interval_at(
            Instant::now() + self.settings.status_interval,
            self.settings.status_interval,
        );
        status_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut notify_tick = interval_at(
            Instant::now() + self.settings.status_notify_interval,
            self.settings.status_notify_interval,
        );
        notify_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                event = event_rx.recv() => match event {
                    Some(event) => self.handle_event(event, &snapshots, &mut records, &dispatcher),
                    None => {
                        info!("All executors finished");
                        break;
                    }
                },
                changed = window_rx.changed(), if monitor_alive => {
                    if changed.is_err() {
                        monitor_alive = false;
                        continue;
                    }
                    let next = window_rx.borrow_and_update().clone();
                    window_notifications(&last_window, &next, &dispatcher);
                    if next.observed_tick == Some(next.tick) {
                        if let Some(block_time) = block_times.observe(next.height, Instant::now()) {
                            self.fees.observe_block_time(block_time);
                        }
                    }
                    last_window = next;
                }
                _ = status_tick.tick() => {
                    self.log_status(&last_window, &progress_of(&snapshots));
                }
                _ = notify_tick.tick() => {
                    dispatcher.dispatch(NotificationEvent::StatusUpdate {
                        window: (*last_window).clone(),
                        progress: progress_of(&snapshots),
                        fee: self.fees.stats(),
                    });
                }
                reason = shutdown.cancelled() => {
                    info!(?reason, "Shutdown requested; stopping executors");
                    break;
                }
            }
        }

        background_stop.cancel(CancelReason::Shutdown);

        // Collect what executors report while they wind down
        let grace = self.settings.shutdown_grace;
        let deadline = Instant::now() + grace;
        loop {
            match tokio::time::timeout_at(deadline, event_rx.recv()).await {
                Ok(Some(event)) => self.handle_event(event, &snapshots, &mut records, &dispatcher),
                Ok(None) => break,
                Err(_) => {
                    warn!(grace_ms = grace.as_millis() as u64, "Executors did not stop within grace period");
                    break;
                }
            }
        }
        workers.abort_all();
        while workers.join_next().await.is_some() {}

        if let Err(e) = monitor_handle.await {
            warn!(error = %e, "Block monitor task failed");
        }
        if let Err(e) = watcher.await {
            warn!(error = %e, "Confirmation watcher task failed");
        }

        let mut wallets: Vec<WalletSnapshot> = snapshots.iter().map(|e| e.value().clone()).collect();
        wallets.sort_by(|a, b| a.wallet_id.cmp(&b.wallet_id));

        let report = RunReport {
            run_id: self.run_id.clone(),
            started_at,
            finished_at: chrono::Utc::now(),
            records,
            wallets,
            fee: self.fees.stats(),
        };

        let progress = report.progress();
        info!(
            registered = progress.registered,
            abandoned = progress.abandoned,
            pending = progress.pending,
            attempts = report.records.len(),
            "Registration run finished"
        );
        dispatcher.dispatch(NotificationEvent::RunFinished { progress });
        dispatcher.flush(grace).await;

        report
    }

    fn handle_event(
        &self,
        event: ExecutorEvent,
        snapshots: &DashMap<WalletId, WalletSnapshot>,
        records: &mut Vec<crate::types::AttemptRecord>,
        dispatcher: &NotificationDispatcher,
    ) {
        match event {
            ExecutorEvent::StateChanged(snapshot) => {
                snapshots.insert(snapshot.wallet_id.clone(), snapshot);
            }
            ExecutorEvent::Attempt(record) => {
                records.push(record);
            }
            ExecutorEvent::Registered { snapshot, fee_paid } => {
                info!(wallet = %snapshot.wallet_id, attempts = snapshot.attempts, "Wallet registered");
                dispatcher.dispatch(NotificationEvent::WalletRegistered {
                    wallet: snapshot.wallet_id.clone(),
                    label: snapshot.label.clone(),
                    attempts: snapshot.attempts,
                    fee_paid,
                });
                snapshots.insert(snapshot.wallet_id.clone(), snapshot);
            }
            ExecutorEvent::Abandoned { snapshot, reason } => {
                warn!(wallet = %snapshot.wallet_id, attempts = snapshot.attempts, reason = %reason, "Wallet abandoned");
                dispatcher.dispatch(NotificationEvent::WalletAbandoned {
                    wallet: snapshot.wallet_id.clone(),
                    label: snapshot.label.clone(),
                    attempts: snapshot.attempts,
                    reason,
                });
                snapshots.insert(snapshot.wallet_id.clone(), snapshot);
            }
        }
    }

    fn log_status(&self, window: &WindowState, progress: &RunProgress) {
        let fee = self.fees.stats();
        info!(
            height = window.height,
            window = %window.status_line(),
            confidence = %window.confidence,
            registered = progress.registered,
            abandoned = progress.abandoned,
            pending = progress.pending,
            total = progress.total,
            success_rate = format!("{:.1}%", progress.success_rate()),
            fee_multiplier = format!("{:.2}", fee.multiplier),
            "Registration status"
        );
        for source in self.monitor.source_stats() {
            debug!(
                source = %source.source,
                status = ?source.status,
                success_rate = source.success_rate,
                ewma_latency_ms = source.ewma_latency_ms,
                "Block source health"
            );
        }
    }
}

fn progress_of(snapshots: &DashMap<WalletId, WalletSnapshot>) -> RunProgress {
    let mut progress = RunProgress {
        total: snapshots.len(),
        ..RunProgress::default()
    };
    for entry in snapshots.iter() {
        match entry.value().state {
            crate::types::WalletState::Registered => progress.registered += 1,
            crate::types::WalletState::Abandoned => progress.abandoned += 1,
            _ => progress.pending += 1,
        }
    }
    progress
}

/// Average time per block between observed height changes
#[derive(Debug, Default)]
struct BlockTimeTracker {
    last: Option<(u64, Instant)>,
}

impl BlockTimeTracker {
    fn observe(&mut self, height: u64, at: Instant) -> Option<Duration> {
        match self.last {
            None if height > 0 => {
                self.last = Some((height, at));
                None
            }
            Some((previous, since)) if height > previous => {
                self.last = Some((height, at));
                let blocks = u32::try_from(height - previous).unwrap_or(u32::MAX);
                Some(at.duration_since(since) / blocks)
            }
            _ => None,
        }
    }
}

/// Window and monitor-health transitions worth telling the operator about
fn window_notifications(
    previous: &WindowState,
    next: &WindowState,
    dispatcher: &NotificationDispatcher,
) {
    if !previous.is_open && next.is_open {
        dispatcher.dispatch(NotificationEvent::WindowOpened {
            height: next.height,
            blocks_remaining: next.blocks_remaining,
        });
    } else if previous.is_open && !next.is_open {
        dispatcher.dispatch(NotificationEvent::WindowClosed {
            height: next.height,
            blocks_until_open: next.blocks_until_open,
        });
    }

    if previous.confidence == next.confidence {
        return;
    }
    match next.confidence {
        Confidence::High if previous.observed_tick.is_some() => {
            dispatcher.dispatch(NotificationEvent::MonitorRecovered {
                responding: next.responding,
                total: next.total_sources,
            });
        }
        Confidence::High => {}
        Confidence::Degraded | Confidence::Unknown => {
            if previous.confidence == Confidence::High || previous.observed_tick.is_none() {
                dispatcher.dispatch(NotificationEvent::MonitorDegraded {
                    responding: next.responding,
                    total: next.total_sources,
                });
            }
        }
    }
}

/// Polls the chain for independent confirmations and slot exhaustion
async fn confirmation_watcher(
    chain: Arc<dyn ChainClient>,
    snapshots: Arc<DashMap<WalletId, WalletSnapshot>>,
    wallet_cancels: Arc<DashMap<WalletId, CancelSignal>>,
    period: Duration,
    stop: CancelSignal,
) {
    let mut tick = interval_at(Instant::now() + period, period);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = tick.tick() => {}
        }

        let pending: Vec<WalletId> = snapshots
            .iter()
            .filter(|e| !e.value().state.is_terminal())
            .map(|e| e.key().clone())
            .collect();
        if pending.is_empty() {
            continue;
        }

        match chain.open_slots().await {
            Ok(Some(0)) => {
                info!(pending = pending.len(), "No open slots remain; cancelling pending wallets");
                for id in &pending {
                    if let Some(cancel) = wallet_cancels.get(id) {
                        cancel.cancel(CancelReason::SlotsFilled);
                    }
                }
                continue;
            }
            Ok(_) => {}
            Err(e) => debug!(error = %e, "Open slot check failed"),
        }

        let checks = futures::future::join_all(pending.iter().map(|id| chain.is_registered(id))).await;
        for (id, result) in pending.iter().zip(checks) {
            match result {
                Ok(true) => {
                    if let Some(cancel) = wallet_cancels.get(id) {
                        if cancel.cancel(CancelReason::ConfirmedRegistered) {
                            info!(wallet = %id, "Registration confirmed on chain");
                        }
                    }
                }
                Ok(false) => {}
                Err(e) => debug!(wallet = %id, error = %e, "Registration check failed"),
            }
        }
    }
}
