//! Median and quorum reconciliation of one tick's snapshots

use crate::block_monitor::window::WindowSchedule;
use crate::types::{BlockSnapshot, Confidence, WindowState};

/// Outcome of reconciling the snapshots gathered in one tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    pub median: Option<u64>,
    pub responding: usize,
    pub total: usize,
    pub confidence: Confidence,
    /// Highest minus lowest reported height
    pub spread: u64,
}

/// Strict majority of the configured sources
pub fn default_quorum(total: usize) -> usize {
    total / 2 + 1
}

/// Median of the reported heights. Even counts take the lower middle value.
pub fn median_height(snapshots: &[BlockSnapshot]) -> Option<u64> {
    if snapshots.is_empty() {
        return None;
    }
    let mut heights: Vec<u64> = snapshots.iter().map(|s| s.height).collect();
    heights.sort_unstable();
    Some(heights[(heights.len() - 1) / 2])
}

pub fn reconcile(snapshots: &[BlockSnapshot], total: usize, quorum: usize) -> Reconciliation {
    let responding = snapshots.len();
    let confidence = if responding == 0 {
        Confidence::Unknown
    } else if responding >= quorum {
        Confidence::High
    } else {
        Confidence::Degraded
    };

    let spread = match (
        snapshots.iter().map(|s| s.height).max(),
        snapshots.iter().map(|s| s.height).min(),
    ) {
        (Some(max), Some(min)) => max - min,
        _ => 0,
    };

    Reconciliation {
        median: median_height(snapshots),
        responding,
        total,
        confidence,
        spread,
    }
}

/// Derive the next published state from a reconciliation and the previous state.
///
/// With no responses the previous openness is held and the observation tick is
/// not advanced, so consumers can tell the data is stale. Published heights never
/// move backwards.
pub fn next_window_state(
    schedule: &WindowSchedule,
    previous: &WindowState,
    reconciliation: &Reconciliation,
    tick: u64,
) -> WindowState {
    match reconciliation.median {
        None => WindowState {
            confidence: Confidence::Unknown,
            responding: 0,
            total_sources: reconciliation.total,
            tick,
            ..previous.clone()
        },
        Some(median) => {
            let height = if previous.observed_tick.is_some() {
                median.max(previous.height)
            } else {
                median
            };
            let position = schedule.evaluate(height);
            WindowState {
                height,
                tempo_position: position.tempo_position,
                is_open: position.is_open,
                blocks_remaining: position.blocks_remaining,
                blocks_until_open: position.blocks_until_open,
                confidence: reconciliation.confidence,
                responding: reconciliation.responding,
                total_sources: reconciliation.total,
                tick,
                observed_tick: Some(tick),
            }
        }
    }
}
