//! Block monitor scenarios across several ticks

use std::sync::Arc;
use std::time::Duration;

use crate::block_monitor::{BlockMonitor, BlockSource, MonitorConfig, WindowSchedule};
use crate::cancel::{CancelReason, CancelSignal};
use crate::test_utils::{ScriptedBlockSource, SourceStep};
use crate::types::Confidence;

fn monitor(sources: Vec<Arc<dyn BlockSource>>, quorum: usize) -> Arc<BlockMonitor> {
    Arc::new(
        BlockMonitor::new(
            sources,
            MonitorConfig {
                poll_interval: Duration::from_secs(5),
                quorum,
                schedule: WindowSchedule::new(360, 10, 60).unwrap(),
            },
        )
        .unwrap(),
    )
}

#[tokio::test]
async fn test_confidence_follows_responding_sources() {
    use SourceStep::{Fail, Height};

    let a = ScriptedBlockSource::scripted("a", vec![Height(100), Height(380), Fail, Fail]);
    let b = ScriptedBlockSource::scripted("b", vec![Height(101), Fail, Fail, Fail]);
    let c = ScriptedBlockSource::scripted("c", vec![Height(100), Fail, Fail, Fail]);
    let m = monitor(vec![a as Arc<dyn BlockSource>, b, c], 2);

    let first = m.tick().await;
    assert_eq!(first.height, 100);
    assert_eq!(first.confidence, Confidence::High);
    assert!(!first.is_open);

    let second = m.tick().await;
    assert_eq!(second.confidence, Confidence::Degraded);
    assert_eq!(second.responding, 1);
    assert_eq!(second.height, 380);
    assert!(second.is_open);

    let third = m.tick().await;
    assert_eq!(third.confidence, Confidence::Unknown);
    assert_eq!(third.height, 380);
    assert!(third.is_open, "openness is held while no source answers");
    assert!(!third.is_stale());

    let fourth = m.tick().await;
    assert_eq!(fourth.confidence, Confidence::Unknown);
    assert!(fourth.is_stale());
}

#[tokio::test]
async fn test_published_height_never_decreases() {
    let a = ScriptedBlockSource::sequence("a", &[500, 490]);
    let b = ScriptedBlockSource::sequence("b", &[500, 491]);
    let m = monitor(vec![a as Arc<dyn BlockSource>, b], 2);

    assert_eq!(m.tick().await.height, 500);
    assert_eq!(m.tick().await.height, 500);
}

#[tokio::test]
async fn test_recovers_when_sources_return() {
    let a = ScriptedBlockSource::scripted("a", vec![SourceStep::Fail]);
    let b = ScriptedBlockSource::scripted("b", vec![SourceStep::Fail]);
    let m = monitor(vec![a.clone() as Arc<dyn BlockSource>, b.clone()], 2);

    let blind = m.tick().await;
    assert_eq!(blind.confidence, Confidence::Unknown);
    assert_eq!(blind.status_line(), "Unknown");

    a.set_next(SourceStep::Height(20));
    b.set_next(SourceStep::Height(21));
    let seen = m.tick().await;
    assert_eq!(seen.confidence, Confidence::High);
    assert_eq!(seen.height, 20);
    assert_eq!(seen.status_line(), "WINDOW ACTIVE - 40 blocks left");
}

#[tokio::test(start_paused = true)]
async fn test_run_publishes_until_cancelled() {
    let a = ScriptedBlockSource::sequence("a", &[20]);
    let m = monitor(vec![a.clone() as Arc<dyn BlockSource>], 1);
    let mut rx = m.subscribe();
    let stop = CancelSignal::new();

    let handle = tokio::spawn(Arc::clone(&m).run(stop.clone()));

    rx.changed().await.unwrap();
    assert_eq!(rx.borrow_and_update().tick, 1);
    rx.changed().await.unwrap();
    assert_eq!(rx.borrow_and_update().tick, 2);

    stop.cancel(CancelReason::Shutdown);
    handle.await.unwrap();
    let calls = a.calls();
    assert!(calls >= 2);

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(a.calls(), calls);
}

#[tokio::test]
async fn test_source_failures_reach_health_stats() {
    let good = ScriptedBlockSource::fixed("good", 100);
    let bad = ScriptedBlockSource::failing("bad");
    let m = monitor(vec![good, bad], 1);

    m.tick().await;

    let stats = m.source_stats();
    let bad_stats = stats.iter().find(|s| s.source == "bad").unwrap();
    let last_error = bad_stats.last_error.as_deref().unwrap();
    assert!(last_error.starts_with("Block source error"), "{}", last_error);
    assert!(stats
        .iter()
        .find(|s| s.source == "good")
        .unwrap()
        .last_error
        .is_none());
}
