//! Benchmark for height reconciliation and fee recommendation

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::time::Duration;

use subnet_registrar::block_monitor::reconcile::{next_window_state, reconcile};
use subnet_registrar::block_monitor::WindowSchedule;
use subnet_registrar::fee_controller::{FeeConfig, FeeController};
use subnet_registrar::types::{AttemptOutcome, BlockSnapshot, CongestionSample, WindowState};

fn snapshots(count: usize) -> Vec<BlockSnapshot> {
    (0..count)
        .map(|i| {
            BlockSnapshot::new(
                4_000_000 + (i as u64 % 3),
                format!("source-{}", i),
                Duration::from_millis(40),
            )
        })
        .collect()
}

fn bench_reconcile(c: &mut Criterion) {
    let mut group = c.benchmark_group("reconcile");
    let schedule = WindowSchedule::new(360, 10, 60).unwrap();

    for count in [3usize, 5, 9, 17].iter() {
        let snaps = snapshots(*count);
        let previous = WindowState::initial(*count);

        group.bench_with_input(BenchmarkId::new("median_quorum", count), &snaps, |b, snaps| {
            b.iter(|| {
                let rec = reconcile(black_box(snaps), *count, *count / 2 + 1);
                black_box(next_window_state(&schedule, &previous, &rec, 1))
            });
        });
    }

    group.finish();
}

fn bench_fee_recommend(c: &mut Criterion) {
    let fees = FeeController::new(FeeConfig::default());
    for i in 0..64 {
        let outcome = if i % 3 == 0 {
            AttemptOutcome::RejectedLowFee
        } else {
            AttemptOutcome::Accepted
        };
        fees.record(CongestionSample::now(1_500_000_000, outcome));
    }
    let window = WindowState {
        height: 4_000_020,
        is_open: true,
        tick: 1,
        observed_tick: Some(1),
        ..WindowState::initial(3)
    };

    c.bench_function("fee_recommend", |b| {
        b.iter(|| black_box(fees.recommend(black_box(&window))))
    });

    c.bench_function("fee_record", |b| {
        b.iter(|| fees.record(CongestionSample::now(1_500_000_000, AttemptOutcome::Accepted)))
    });
}

criterion_group!(benches, bench_reconcile, bench_fee_recommend);
criterion_main!(benches);
