//! Wallet state tracking and on-disk wallet discovery

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tracing::debug;

use crate::types::{WalletId, WalletState};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WalletError {
    #[error("Wallet {wallet} is already {state}; transition to {requested} refused")]
    TerminalState {
        wallet: WalletId,
        state: WalletState,
        requested: WalletState,
    },
}

/// Wallet entry from the configuration file or discovery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletEntry {
    pub id: String,
    #[serde(default)]
    pub label: Option<String>,
}

impl WalletEntry {
    pub fn into_wallet(self) -> Wallet {
        let label = self.label.unwrap_or_else(|| self.id.clone());
        Wallet::new(WalletId::new(self.id), label)
    }
}

/// A registration candidate. Owned by exactly one executor at a time.
#[derive(Debug, Clone)]
pub struct Wallet {
    id: WalletId,
    label: String,
    state: WalletState,
    attempts: u32,
    last_error: Option<String>,
}

/// Read-only view of a wallet, shared with the coordinator and the report
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WalletSnapshot {
    pub wallet_id: WalletId,
    pub label: String,
    pub state: WalletState,
    pub attempts: u32,
    pub last_error: Option<String>,
}

impl Wallet {
    pub fn new(id: WalletId, label: impl Into<String>) -> Self {
        Self {
            id,
            label: label.into(),
            state: WalletState::Idle,
            attempts: 0,
            last_error: None,
        }
    }

    pub fn id(&self) -> &WalletId {
        &self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn state(&self) -> WalletState {
        self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Move to `next`. Terminal states never change again.
    pub fn transition(&mut self, next: WalletState) -> Result<bool, WalletError> {
        if self.state == next {
            return Ok(false);
        }
        if self.state.is_terminal() {
            return Err(WalletError::TerminalState {
                wallet: self.id.clone(),
                state: self.state,
                requested: next,
            });
        }
        debug!(wallet = %self.id, from = %self.state, to = %next, "Wallet state change");
        self.state = next;
        Ok(true)
    }

    /// Count a submission and return its 1-based number
    pub fn begin_attempt(&mut self) -> u32 {
        self.attempts += 1;
        self.attempts
    }

    pub fn set_last_error(&mut self, error: impl Into<String>) {
        self.last_error = Some(error.into());
    }

    pub fn snapshot(&self) -> WalletSnapshot {
        WalletSnapshot {
            wallet_id: self.id.clone(),
            label: self.label.clone(),
            state: self.state,
            attempts: self.attempts,
            last_error: self.last_error.clone(),
        }
    }
}

/// Scan a `<root>/<coldkey>/hotkeys/<hotkey>` wallet tree.
///
/// Returns `coldkey/hotkey` entries sorted by id. Hidden entries (`.git`, ...) are skipped.
pub fn discover_wallets(root: &Path) -> std::io::Result<Vec<WalletEntry>> {
    let mut entries = Vec::new();

    for coldkey in std::fs::read_dir(root)? {
        let coldkey = coldkey?;
        if !coldkey.file_type()?.is_dir() {
            continue;
        }
        let cold_name = coldkey.file_name().to_string_lossy().into_owned();
        if cold_name.starts_with('.') {
            continue;
        }

        let hotkeys_dir = coldkey.path().join("hotkeys");
        if !hotkeys_dir.is_dir() {
            continue;
        }

        for hotkey in std::fs::read_dir(&hotkeys_dir)? {
            let hotkey = hotkey?;
            let hot_name = hotkey.file_name().to_string_lossy().into_owned();
            if hot_name.starts_with('.') {
                continue;
            }
            entries.push(WalletEntry {
                id: format!("{}/{}", cold_name, hot_name),
                label: None,
            });
        }
    }

    entries.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(entries)
}

/// Filter wallet entries by a `--wallets` selection (`all` or comma-separated ids)
pub fn select_wallets(entries: Vec<WalletEntry>, selection: &str) -> Vec<WalletEntry> {
    let selection = selection.trim();
    if selection.is_empty() || selection.eq_ignore_ascii_case("all") {
        return entries;
    }
    let wanted: Vec<&str> = selection
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();
    entries
        .into_iter()
        .filter(|entry| wanted.contains(&entry.id.as_str()))
        .collect()
}
