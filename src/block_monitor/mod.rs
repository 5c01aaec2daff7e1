//! Block monitor: polls every source each tick, reconciles the heights and
//! publishes the registration window state.
//!
//! Each tick fans out one fetch per source (each bounded by its own timeout),
//! fans the results back in, reconciles them with a median/quorum rule and
//! publishes a single `WindowState` through a `watch` channel. Readers always
//! see a whole state; the monitor is the only writer.

pub mod health;
pub mod reconcile;
pub mod source;
pub mod window;

pub use health::{HealthStatus, SourceHealth, SourceStats};
pub use reconcile::{reconcile, Reconciliation};
pub use source::{build_source, BlockSource, HttpJsonSource, SourceError, SubstrateRpcSource};
pub use window::WindowSchedule;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument, warn};

use crate::cancel::CancelSignal;
use crate::errors::{ConfigError, RegistrationError};
use crate::metrics::metrics;
use crate::types::{BlockSnapshot, Confidence, WindowState};

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub poll_interval: Duration,
    pub quorum: usize,
    pub schedule: WindowSchedule,
}

pub struct BlockMonitor {
    sources: Vec<Arc<dyn BlockSource>>,
    health: Vec<Arc<SourceHealth>>,
    config: MonitorConfig,
    window_tx: watch::Sender<Arc<WindowState>>,
    tick_count: AtomicU64,
}

impl BlockMonitor {
    pub fn new(
        sources: Vec<Arc<dyn BlockSource>>,
        config: MonitorConfig,
    ) -> Result<Self, ConfigError> {
        if sources.is_empty() {
            return Err(ConfigError::validation("at least one block source is required"));
        }
        if config.quorum == 0 || config.quorum > sources.len() {
            return Err(ConfigError::validation(format!(
                "quorum must be in range [1, {}]",
                sources.len()
            )));
        }

        let health = sources
            .iter()
            .map(|s| Arc::new(SourceHealth::new(s.id())))
            .collect();
        let (window_tx, _) = watch::channel(Arc::new(WindowState::initial(sources.len())));

        Ok(Self {
            sources,
            health,
            config,
            window_tx,
            tick_count: AtomicU64::new(0),
        })
    }

    /// Receiver for published window states
    pub fn subscribe(&self) -> watch::Receiver<Arc<WindowState>> {
        self.window_tx.subscribe()
    }

    /// Latest published state
    pub fn latest(&self) -> Arc<WindowState> {
        self.window_tx.borrow().clone()
    }

    pub fn schedule(&self) -> &WindowSchedule {
        &self.config.schedule
    }

    pub fn source_stats(&self) -> Vec<SourceStats> {
        self.health.iter().map(|h| h.stats()).collect()
    }

    /// Poll until cancelled
    #[instrument(skip_all, fields(sources = self.sources.len()))]
    pub async fn run(self: Arc<Self>, cancel: CancelSignal) {
        info!(
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            quorum = self.config.quorum,
            "Block monitor started"
        );

        let mut interval = tokio::time::interval(self.config.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                reason = cancel.cancelled() => {
                    info!(?reason, "Block monitor stopping");
                    break;
                }
                _ = interval.tick() => {
                    tokio::select! {
                        biased;
                        reason = cancel.cancelled() => {
                            info!(?reason, "Block monitor stopping mid-tick");
                            break;
                        }
                        _ = self.tick() => {}
                    }
                }
            }
        }
    }

    /// Run one poll/reconcile/publish cycle and return the published state
    pub async fn tick(&self) -> Arc<WindowState> {
        let tick = self.tick_count.fetch_add(1, Ordering::SeqCst) + 1;
        let snapshots = self.poll_sources().await;

        let reconciliation = reconcile(&snapshots, self.sources.len(), self.config.quorum);
        let previous = self.latest();
        let state = Arc::new(reconcile::next_window_state(
            &self.config.schedule,
            &previous,
            &reconciliation,
            tick,
        ));

        self.log_transition(&previous, &state, &reconciliation);
        self.update_gauges(&state);

        self.window_tx.send_replace(Arc::clone(&state));
        state
    }

    async fn poll_sources(&self) -> Vec<BlockSnapshot> {
        let mut set = JoinSet::new();
        for (idx, source) in self.sources.iter().enumerate() {
            let source = Arc::clone(source);
            set.spawn(async move {
                let timeout = source.timeout();
                let result = match tokio::time::timeout(timeout, source.fetch()).await {
                    Ok(result) => result,
                    Err(_) => Err(SourceError::Timeout {
                        source_id: source.id().to_string(),
                        timeout_ms: timeout.as_millis() as u64,
                    }),
                };
                (idx, result)
            });
        }

        let mut snapshots = Vec::with_capacity(self.sources.len());
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((idx, Ok(snapshot))) => {
                    self.health[idx].record_success(snapshot.latency);
                    metrics()
                        .source_latency
                        .observe(snapshot.latency.as_secs_f64());
                    debug!(
                        source = %snapshot.source,
                        height = snapshot.height,
                        latency_ms = snapshot.latency.as_millis() as u64,
                        "Block source responded"
                    );
                    snapshots.push(snapshot);
                }
                Ok((idx, Err(e))) => {
                    let kind = e.kind();
                    let error = RegistrationError::from(e);
                    self.health[idx].record_failure(&error.to_string());
                    metrics().source_failures_total.inc();
                    debug!(kind, error = %error, "Block source failed");
                }
                Err(e) => {
                    metrics().source_failures_total.inc();
                    warn!(error = %e, "Block source task failed");
                }
            }
        }
        snapshots
    }

    fn log_transition(
        &self,
        previous: &WindowState,
        next: &WindowState,
        reconciliation: &Reconciliation,
    ) {
        if reconciliation.spread > 0 {
            debug!(
                spread = reconciliation.spread,
                median = ?reconciliation.median,
                "Block sources disagree"
            );
        }

        if previous.confidence != next.confidence {
            match next.confidence {
                Confidence::High => info!(
                    responding = next.responding,
                    total = next.total_sources,
                    "Block monitor confidence restored"
                ),
                Confidence::Degraded => {
                    let error = RegistrationError::QuorumLost {
                        responding: next.responding,
                        total: next.total_sources,
                        quorum: self.config.quorum,
                    };
                    warn!(error = %error, "Block monitor degraded");
                }
                Confidence::Unknown => warn!(
                    total = next.total_sources,
                    held_open = next.is_open,
                    "No block source responded; holding previous window state"
                ),
            }
        }

        if previous.is_open != next.is_open {
            info!(
                height = next.height,
                tempo_position = next.tempo_position,
                status = %next.status_line(),
                "Registration window {}",
                if next.is_open { "opened" } else { "closed" }
            );
        }
    }

    fn update_gauges(&self, state: &WindowState) {
        let m = metrics();
        m.block_height.set(state.height as i64);
        m.window_open.set(i64::from(state.is_open));
        m.responding_sources.set(state.responding as i64);
    }
}
