//! Operator notifications
//!
//! Delivery is best effort: a failing notifier is logged and counted, never
//! allowed to stall or fail a registration.

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::fee_controller::FeeStats;
use crate::types::{WalletId, WindowState};

#[derive(Debug, Clone, Error)]
pub enum NotifyError {
    #[error("Notification transport error: {0}")]
    Transport(String),

    #[error("Notification rejected with HTTP {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// Progress counters carried by status and final notifications
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunProgress {
    pub total: usize,
    pub registered: usize,
    pub abandoned: usize,
    pub pending: usize,
}

impl RunProgress {
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.registered as f64 / self.total as f64 * 100.0
        }
    }
}

#[derive(Debug, Clone)]
pub enum NotificationEvent {
    WalletRegistered {
        wallet: WalletId,
        label: String,
        attempts: u32,
        fee_paid: Option<u64>,
    },
    WalletAbandoned {
        wallet: WalletId,
        label: String,
        attempts: u32,
        reason: String,
    },
    WindowOpened {
        height: u64,
        blocks_remaining: u64,
    },
    WindowClosed {
        height: u64,
        blocks_until_open: u64,
    },
    MonitorDegraded {
        responding: usize,
        total: usize,
    },
    MonitorRecovered {
        responding: usize,
        total: usize,
    },
    StatusUpdate {
        window: WindowState,
        progress: RunProgress,
        fee: FeeStats,
    },
    RunFinished {
        progress: RunProgress,
    },
}

impl NotificationEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::WalletRegistered { .. } => "wallet_registered",
            Self::WalletAbandoned { .. } => "wallet_abandoned",
            Self::WindowOpened { .. } => "window_opened",
            Self::WindowClosed { .. } => "window_closed",
            Self::MonitorDegraded { .. } => "monitor_degraded",
            Self::MonitorRecovered { .. } => "monitor_recovered",
            Self::StatusUpdate { .. } => "status_update",
            Self::RunFinished { .. } => "run_finished",
        }
    }

    /// Markdown message body
    pub fn render(&self) -> String {
        match self {
            Self::WalletRegistered {
                wallet,
                label,
                attempts,
                fee_paid,
            } => {
                let mut msg = format!(
                    "✅ *Registration successful*\nWallet: `{}` ({})\nAttempts: {}",
                    wallet, label, attempts
                );
                if let Some(fee) = fee_paid {
                    msg.push_str(&format!("\nFee paid: {}", fee));
                }
                msg
            }
            Self::WalletAbandoned {
                wallet,
                label,
                attempts,
                reason,
            } => format!(
                "❌ *Registration failed*\nWallet: `{}` ({})\nAttempts: {}\nReason: {}",
                wallet, label, attempts, reason
            ),
            Self::WindowOpened {
                height,
                blocks_remaining,
            } => format!(
                "🟢 *Registration window open*\nBlock: {}\nBlocks left: {}",
                height, blocks_remaining
            ),
            Self::WindowClosed {
                height,
                blocks_until_open,
            } => format!(
                "🔴 *Registration window closed*\nBlock: {}\nNext window in ~{} blocks",
                height, blocks_until_open
            ),
            Self::MonitorDegraded { responding, total } => format!(
                "⚠️ *Block monitor degraded*\n{}/{} sources responding",
                responding, total
            ),
            Self::MonitorRecovered { responding, total } => format!(
                "✅ *Block monitor recovered*\n{}/{} sources responding",
                responding, total
            ),
            Self::StatusUpdate {
                window,
                progress,
                fee,
            } => format!(
                "📊 *Registration status*\nBlock: {}\nWindow: {}\nRegistered: {}/{}\nAbandoned: {}\nPending: {}\nSuccess rate: {:.1}%\nFee multiplier: {:.2}x\nCongestion: {:.0}%",
                window.height,
                window.status_line(),
                progress.registered,
                progress.total,
                progress.abandoned,
                progress.pending,
                progress.success_rate(),
                fee.multiplier,
                fee.congestion * 100.0
            ),
            Self::RunFinished { progress } => format!(
                "🏁 *Registration run finished*\nRegistered: {}/{}\nAbandoned: {}\nPending: {}",
                progress.registered, progress.total, progress.abandoned, progress.pending
            ),
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: &NotificationEvent) -> Result<(), NotifyError>;
}

/// Writes notifications to the log
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, event: &NotificationEvent) -> Result<(), NotifyError> {
        info!(kind = event.kind(), "{}", event.render().replace('\n', " | "));
        Ok(())
    }
}

/// Telegram Bot API `sendMessage` notifier
#[derive(Debug, Clone)]
pub struct TelegramNotifier {
    api_base: String,
    token: String,
    chat_id: String,
    client: reqwest::Client,
}

impl TelegramNotifier {
    pub fn new(
        api_base: impl Into<String>,
        token: impl Into<String>,
        chat_id: impl Into<String>,
    ) -> Self {
        Self {
            api_base: api_base.into().trim_end_matches('/').to_string(),
            token: token.into(),
            chat_id: chat_id.into(),
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
        }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify(&self, event: &NotificationEvent) -> Result<(), NotifyError> {
        let url = format!("{}/bot{}/sendMessage", self.api_base, self.token);
        let response = self
            .client
            .post(url)
            .json(&serde_json::json!({
                "chat_id": self.chat_id,
                "text": event.render(),
                "parse_mode": "Markdown",
            }))
            .send()
            .await
            .map_err(|e| NotifyError::Transport(e.without_url().to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

/// Fans notifications to several notifiers
pub struct CompositeNotifier {
    notifiers: Vec<Arc<dyn Notifier>>,
}

impl CompositeNotifier {
    pub fn new(notifiers: Vec<Arc<dyn Notifier>>) -> Self {
        Self { notifiers }
    }
}

#[async_trait]
impl Notifier for CompositeNotifier {
    async fn notify(&self, event: &NotificationEvent) -> Result<(), NotifyError> {
        let results =
            futures::future::join_all(self.notifiers.iter().map(|n| n.notify(event))).await;
        results.into_iter().find_map(Result::err).map_or(Ok(()), Err)
    }
}

/// Delivers notifications from a queue on a single background task
pub struct NotificationDispatcher {
    tx: mpsc::UnboundedSender<NotificationEvent>,
    handle: JoinHandle<()>,
}

impl NotificationDispatcher {
    pub fn spawn(notifier: Arc<dyn Notifier>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<NotificationEvent>();
        let handle = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match notifier.notify(&event).await {
                    Ok(()) => debug!(kind = event.kind(), "Notification delivered"),
                    Err(e) => {
                        crate::metrics::metrics().notification_failures_total.inc();
                        warn!(kind = event.kind(), error = %e, "Notification delivery failed");
                    }
                }
            }
        });
        Self { tx, handle }
    }

    /// Queue an event; never blocks
    pub fn dispatch(&self, event: NotificationEvent) {
        if self.tx.send(event).is_err() {
            warn!("Notification dispatcher stopped; event dropped");
        }
    }

    /// Close the queue and wait up to `grace` for pending deliveries
    pub async fn flush(self, grace: Duration) {
        let Self { tx, handle } = self;
        drop(tx);
        match tokio::time::timeout(grace, handle).await {
            Ok(Ok(())) => debug!("Notification queue drained"),
            Ok(Err(e)) => warn!(error = %e, "Notification task failed"),
            Err(_) => warn!(grace_ms = grace.as_millis() as u64, "Notification flush timed out"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::RecordingNotifier;

    #[test]
    fn test_render_registered() {
        let event = NotificationEvent::WalletRegistered {
            wallet: WalletId::new("cold/hot"),
            label: "miner-1".into(),
            attempts: 3,
            fee_paid: Some(1_500),
        };
        let text = event.render();
        assert!(text.contains("Registration successful"));
        assert!(text.contains("`cold/hot`"));
        assert!(text.contains("Attempts: 3"));
        assert!(text.contains("Fee paid: 1500"));
        assert_eq!(event.kind(), "wallet_registered");
    }

    #[test]
    fn test_progress_success_rate() {
        let progress = RunProgress {
            total: 4,
            registered: 1,
            abandoned: 1,
            pending: 2,
        };
        assert!((progress.success_rate() - 25.0).abs() < 1e-9);
        assert_eq!(RunProgress::default().success_rate(), 0.0);
    }

    #[tokio::test]
    async fn test_dispatcher_flush_delivers_all() {
        let recorder = Arc::new(RecordingNotifier::default());
        let dispatcher = NotificationDispatcher::spawn(recorder.clone());
        for height in 0..5 {
            dispatcher.dispatch(NotificationEvent::WindowOpened {
                height,
                blocks_remaining: 10,
            });
        }
        dispatcher.flush(Duration::from_secs(1)).await;
        assert_eq!(recorder.events().len(), 5);
    }

    #[tokio::test]
    async fn test_failures_do_not_stop_dispatch() {
        let recorder = Arc::new(RecordingNotifier::failing());
        let dispatcher = NotificationDispatcher::spawn(recorder.clone());
        dispatcher.dispatch(NotificationEvent::RunFinished {
            progress: RunProgress::default(),
        });
        dispatcher.dispatch(NotificationEvent::RunFinished {
            progress: RunProgress::default(),
        });
        dispatcher.flush(Duration::from_secs(1)).await;
        assert_eq!(recorder.events().len(), 2);
    }

    #[tokio::test]
    async fn test_composite_reports_first_error() {
        let ok = Arc::new(RecordingNotifier::default());
        let bad = Arc::new(RecordingNotifier::failing());
        let composite = CompositeNotifier::new(vec![bad.clone(), ok.clone()]);
        let result = composite
            .notify(&NotificationEvent::MonitorDegraded {
                responding: 1,
                total: 3,
            })
            .await;
        assert!(result.is_err());
        assert_eq!(ok.events().len(), 1);
        assert_eq!(bad.events().len(), 1);
    }
}
