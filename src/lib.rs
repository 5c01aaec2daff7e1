//! Subnet Registrar Library
//!
//! Window-aware registration scheduler: a block monitor that reconciles
//! heights from several sources, an adaptive fee controller, per-wallet
//! attempt executors and the coordinator that runs them on a bounded pool.

pub mod block_monitor;
pub mod cancel;
pub mod chain;
pub mod config;
pub mod coordinator;
pub mod endpoints;
pub mod errors;
pub mod executor;
pub mod fee_controller;
pub mod metrics;
pub mod notifier;
pub mod observability;
pub mod report;
pub mod structured_logging;
pub mod types;
pub mod wallet;

// Test utilities (only compiled in test/test_utils feature)
#[cfg(any(test, feature = "test_utils"))]
pub mod test_utils;

#[cfg(test)]
mod tests;

pub use block_monitor::{BlockMonitor, BlockSource, WindowSchedule};
pub use cancel::{CancelReason, CancelSignal};
pub use chain::{ChainClient, RelayChainClient, SimulatedChainClient};
pub use config::Config;
pub use coordinator::RegistrationCoordinator;
pub use errors::{ConfigError, RegistrationError};
pub use executor::{AttemptExecutor, ExecutorEvent};
pub use fee_controller::FeeController;
pub use notifier::{NotificationEvent, Notifier};
pub use report::RunReport;
pub use types::{
    AttemptOutcome, AttemptRecord, Confidence, FeeRecommendation, WalletId, WalletState,
    WindowState,
};
pub use wallet::Wallet;
