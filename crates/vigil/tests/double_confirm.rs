//! Confirmation policies driven through full watcher cycles.

mod common;

use common::{at, init_tracing, test_config, CommitAnswer, FixtureOracle, RecordingNotifier, SetAnswer};
use vigil::{Watcher, WatcherState};

fn state_at(last_checked: u64) -> WatcherState {
    WatcherState {
        last_checked,
        ..Default::default()
    }
}

#[tokio::test]
async fn miss_then_signed_on_recheck_never_alerts() {
    init_tracing();
    let oracle = FixtureOracle::with_tip(102);
    oracle.miss(100);
    let watcher = Watcher::new(test_config(true), oracle, RecordingNotifier::default());

    let (st, report) = watcher.run_cycle(state_at(99), at(1_000)).await;
    assert_eq!(report.held, 1);
    assert!(st.is_pending(100));
    assert_eq!(st.last_checked, 100);

    watcher.oracle().sign(100);
    let (st, report) = watcher.run_cycle(st, at(1_005)).await;
    assert_eq!(report.discarded, 1);
    assert!(st.pending.is_empty());
    assert!(st.alerted.is_empty());
    assert!(watcher.notifier().messages().is_empty());
}

#[tokio::test]
async fn miss_confirmed_on_recheck_alerts_once() {
    let oracle = FixtureOracle::with_tip(102);
    oracle.miss(100);
    let watcher = Watcher::new(test_config(true), oracle, RecordingNotifier::default());

    let (st, report) = watcher.run_cycle(state_at(99), at(1_000)).await;
    assert!(report.alerted.is_empty());
    let (st, report) = watcher.run_cycle(st, at(1_004)).await;
    assert_eq!(report.alerted, vec![100]);
    assert!(st.is_alerted(100));
    assert!(!st.is_pending(100));

    watcher.oracle().set_tip(Some(110));
    let (st, report) = watcher.run_cycle(st, at(1_008)).await;
    assert!(report.alerted.is_empty());
    assert_eq!(st.last_checked, 108);
    assert_eq!(watcher.notifier().alerted_heights(), vec![100]);
    let messages = watcher.notifier().messages();
    let msg = &messages[0];
    assert!(msg.contains("Network: `test-net`"));
    assert!(msg.contains("Watcher: `test-host`"));
}

#[tokio::test]
async fn unverified_past_ttl_is_dropped_silently() {
    let oracle = FixtureOracle::with_tip(2002);
    oracle.miss(2000);
    let watcher = Watcher::new(test_config(true), oracle, RecordingNotifier::default());

    // t=0: first seen MISSED.
    let (st, _) = watcher.run_cycle(state_at(1999), at(0)).await;
    assert_eq!(st.pending.get(&2000), Some(&0));

    // t=10: oracle can no longer verify.
    watcher.oracle().set_commit(2000, CommitAnswer::Unavailable);
    watcher.oracle().set_in_set(2000, SetAnswer::Fails);
    let (st, report) = watcher.run_cycle(st, at(10)).await;
    assert_eq!(report.held, 1);
    assert!(st.is_pending(2000));

    // t=35: still unverified, past the 30s TTL.
    let (st, report) = watcher.run_cycle(st, at(35)).await;
    assert_eq!(report.expired, 1);
    assert!(st.pending.is_empty());
    assert!(st.alerted.is_empty());

    // Even if the miss becomes verifiable later, nothing is re-opened.
    watcher.oracle().miss(2000);
    let (st, _) = watcher.run_cycle(st, at(60)).await;
    assert!(st.alerted.is_empty());
    assert!(watcher.notifier().messages().is_empty());
}

#[tokio::test]
async fn direct_mode_alerts_immediately_and_once() {
    let oracle = FixtureOracle::with_tip(12);
    oracle.miss(5);
    oracle.miss(8);
    let watcher = Watcher::new(test_config(false), oracle, RecordingNotifier::default());

    let (st, report) = watcher.run_cycle(state_at(0), at(100)).await;
    assert_eq!(report.alerted, vec![5, 8]);
    assert!(st.pending.is_empty());
    assert_eq!(st.last_checked, 10);

    let (_, report) = watcher.run_cycle(st, at(102)).await;
    assert!(report.alerted.is_empty());
    assert_eq!(watcher.notifier().alerted_heights(), vec![5, 8]);
}

#[tokio::test]
async fn not_in_set_creates_no_pending_entry() {
    let oracle = FixtureOracle::with_tip(1002);
    oracle.set_commit(1000, CommitAnswer::NoEntry);
    oracle.set_in_set(1000, SetAnswer::NotMember);
    let watcher = Watcher::new(test_config(true), oracle, RecordingNotifier::default());
    let (st, _) = watcher.run_cycle(state_at(999), at(0)).await;
    assert!(st.pending.is_empty());
    assert_eq!(st.last_checked, 1000);
}

#[tokio::test]
async fn pending_rechecked_in_ascending_order_before_new_heights() {
    let oracle = FixtureOracle::with_tip(32);
    let watcher = Watcher::new(test_config(true), oracle, RecordingNotifier::default());
    let mut st = state_at(28);
    st.pending.insert(27, 0);
    st.pending.insert(3, 0);
    st.pending.insert(15, 0);

    let (_, report) = watcher.run_cycle(st, at(5)).await;
    assert_eq!(report.pending_checked, 3);
    assert_eq!(watcher.oracle().take_commit_queries(), vec![3, 15, 27, 29, 30]);
}

#[tokio::test]
async fn failed_delivery_still_counts_as_alerted() {
    let oracle = FixtureOracle::with_tip(12);
    oracle.miss(10);
    let notifier = RecordingNotifier::default();
    notifier.set_failing(true);
    let watcher = Watcher::new(test_config(false), oracle, notifier);

    let (st, report) = watcher.run_cycle(state_at(9), at(0)).await;
    assert_eq!(report.alerted, vec![10]);
    assert_eq!(report.alerts_failed, 1);
    assert!(st.is_alerted(10));
}
