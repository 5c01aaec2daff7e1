//! Cooperative cancellation with a reason
//!
//! One global signal (shutdown) is shared by every task; each wallet also gets
//! its own signal so the coordinator can stop a single executor when the wallet
//! is confirmed elsewhere or the subnet runs out of slots.

use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    /// Operator requested shutdown
    Shutdown,
    /// No open registration slots remain on the subnet
    SlotsFilled,
    /// The wallet was confirmed registered by an independent check
    ConfirmedRegistered,
}

/// Cloneable cancellation handle. The first reason set wins.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    tx: Arc<watch::Sender<Option<CancelReason>>>,
    rx: watch::Receiver<Option<CancelReason>>,
}

impl CancelSignal {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(None);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    /// Request cancellation. Returns false if the signal was already cancelled.
    pub fn cancel(&self, reason: CancelReason) -> bool {
        self.tx.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(reason);
                true
            } else {
                false
            }
        })
    }

    pub fn reason(&self) -> Option<CancelReason> {
        *self.rx.borrow()
    }

    pub fn is_cancelled(&self) -> bool {
        self.reason().is_some()
    }

    /// Resolves once the signal is cancelled
    pub async fn cancelled(&self) -> CancelReason {
        let mut rx = self.rx.clone();
        loop {
            if let Some(reason) = *rx.borrow_and_update() {
                return reason;
            }
            // The sender lives as long as `self`, so this only errors during teardown
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

impl Default for CancelSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolves with the first reason raised on either signal
pub async fn either_cancelled(a: &CancelSignal, b: &CancelSignal) -> CancelReason {
    tokio::select! {
        reason = a.cancelled() => reason,
        reason = b.cancelled() => reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_first_reason_wins() {
        let signal = CancelSignal::new();
        assert!(!signal.is_cancelled());

        assert!(signal.cancel(CancelReason::SlotsFilled));
        assert!(!signal.cancel(CancelReason::Shutdown));
        assert_eq!(signal.reason(), Some(CancelReason::SlotsFilled));
    }

    #[tokio::test]
    async fn test_clones_observe_cancellation() {
        let signal = CancelSignal::new();
        let observer = signal.clone();

        let waiter = tokio::spawn(async move { observer.cancelled().await });
        tokio::task::yield_now().await;
        signal.cancel(CancelReason::Shutdown);

        let reason = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reason, CancelReason::Shutdown);
    }

    #[tokio::test]
    async fn test_already_cancelled_resolves_immediately() {
        let signal = CancelSignal::new();
        signal.cancel(CancelReason::ConfirmedRegistered);
        assert_eq!(signal.cancelled().await, CancelReason::ConfirmedRegistered);
    }

    #[tokio::test]
    async fn test_either_cancelled() {
        let global = CancelSignal::new();
        let wallet = CancelSignal::new();
        wallet.cancel(CancelReason::SlotsFilled);
        assert_eq!(
            either_cancelled(&global, &wallet).await,
            CancelReason::SlotsFilled
        );
    }
}
