//! Run report and JSON-lines export

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::io::Write;
use std::path::Path;

use crate::fee_controller::FeeStats;
use crate::notifier::RunProgress;
use crate::observability::RunId;
use crate::types::{AttemptRecord, WalletId, WalletState};
use crate::wallet::WalletSnapshot;

/// Everything a run produced: attempt records in completion order and the final
/// state of every wallet.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: RunId,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub records: Vec<AttemptRecord>,
    pub wallets: Vec<WalletSnapshot>,
    pub fee: FeeStats,
}

#[derive(Debug, Serialize)]
struct Summary<'a> {
    run_id: &'a RunId,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
    total: usize,
    registered: usize,
    abandoned: usize,
    pending: usize,
    fee: &'a FeeStats,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ReportLine<'a> {
    Attempt(&'a AttemptRecord),
    Wallet(&'a WalletSnapshot),
    Summary(Summary<'a>),
}

impl RunReport {
    pub fn progress(&self) -> RunProgress {
        let count = |state: WalletState| self.wallets.iter().filter(|w| w.state == state).count();
        let registered = count(WalletState::Registered);
        let abandoned = count(WalletState::Abandoned);
        RunProgress {
            total: self.wallets.len(),
            registered,
            abandoned,
            pending: self.wallets.len() - registered - abandoned,
        }
    }

    pub fn wallet(&self, id: &WalletId) -> Option<&WalletSnapshot> {
        self.wallets.iter().find(|w| &w.wallet_id == id)
    }

    pub fn records_for<'a>(&'a self, id: &'a WalletId) -> impl Iterator<Item = &'a AttemptRecord> + 'a {
        self.records.iter().filter(move |r| &r.wallet_id == id)
    }

    /// One JSON object per line: attempts, then wallets, then the summary
    pub fn write_jsonl<W: Write>(&self, mut out: W) -> std::io::Result<()> {
        for record in &self.records {
            serde_json::to_writer(&mut out, &ReportLine::Attempt(record))?;
            out.write_all(b"\n")?;
        }
        for wallet in &self.wallets {
            serde_json::to_writer(&mut out, &ReportLine::Wallet(wallet))?;
            out.write_all(b"\n")?;
        }

        let progress = self.progress();
        let summary = ReportLine::Summary(Summary {
            run_id: &self.run_id,
            started_at: self.started_at,
            finished_at: self.finished_at,
            total: progress.total,
            registered: progress.registered,
            abandoned: progress.abandoned,
            pending: progress.pending,
            fee: &self.fee,
        });
        serde_json::to_writer(&mut out, &summary)?;
        out.write_all(b"\n")?;
        out.flush()
    }

    pub fn write_to_path<P: AsRef<Path>>(&self, path: P) -> std::io::Result<()> {
        let file = std::fs::File::create(path)?;
        self.write_jsonl(std::io::BufWriter::new(file))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AttemptOutcome;
    use serde_json::Value;

    fn report() -> RunReport {
        let now = Utc::now();
        let a = WalletId::new("cold/a");
        RunReport {
            run_id: RunId::from("run-1"),
            started_at: now,
            finished_at: now,
            records: vec![AttemptRecord {
                wallet_id: a.clone(),
                attempt: 1,
                height: 4_000_020,
                fee_used: 1_500,
                base_fee: 1_000,
                priority_fee: 500,
                outcome: AttemptOutcome::Accepted,
                latency_ms: 120,
                timestamp: now,
                detail: None,
            }],
            wallets: vec![
                WalletSnapshot {
                    wallet_id: a,
                    label: "a".into(),
                    state: WalletState::Registered,
                    attempts: 1,
                    last_error: None,
                },
                WalletSnapshot {
                    wallet_id: WalletId::new("cold/b"),
                    label: "b".into(),
                    state: WalletState::Waiting,
                    attempts: 0,
                    last_error: Some("Shutdown requested".into()),
                },
            ],
            fee: FeeStats {
                multiplier: 1.0,
                congestion: 0.0,
                samples: 1,
                success_rate: 1.0,
                low_fee_rejection_rate: 0.0,
                avg_fee_paid: 1_500,
                min_fee_paid: 1_500,
                max_fee_paid: 1_500,
            },
        }
    }

    #[test]
    fn test_progress() {
        let progress = report().progress();
        assert_eq!(progress.total, 2);
        assert_eq!(progress.registered, 1);
        assert_eq!(progress.pending, 1);
    }

    #[test]
    fn test_jsonl_lines() {
        let mut buf = Vec::new();
        report().write_jsonl(&mut buf).unwrap();
        let lines: Vec<Value> = String::from_utf8(buf)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();

        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0]["type"], "attempt");
        assert_eq!(lines[0]["wallet_id"], "cold/a");
        assert_eq!(lines[0]["outcome"], "accepted");
        assert_eq!(lines[1]["type"], "wallet");
        assert_eq!(lines[1]["state"], "registered");
        assert_eq!(lines[2]["last_error"], "Shutdown requested");
        assert_eq!(lines[3]["type"], "summary");
        assert_eq!(lines[3]["run_id"], "run-1");
        assert_eq!(lines[3]["registered"], 1);
        assert_eq!(lines[3]["pending"], 1);
    }
}
