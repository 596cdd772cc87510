//! Contract tests for the scheduling loop
//!
//! Constraints verified:
//! - The first cycle runs immediately
//! - An effective cycle arms the timer, an ineffective one idles the loop
//! - A failed cycle keeps the current state
//! - Cancellation stops the loop from either state with the timer disarmed
//! - Cancellation takes priority over a timer that is already due

mod common;

use common::*;
use proxy_sync::{ProxyRecord, ProxySyncService, Result, SchedulerState};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

fn spawn(
    mut service: ProxySyncService,
    cancel: CancellationToken,
) -> JoinHandle<(ProxySyncService, Result<()>)> {
    tokio::spawn(async move {
        let result = service.run(cancel).await;
        (service, result)
    })
}

async fn stop(
    cancel: CancellationToken,
    handle: JoinHandle<(ProxySyncService, Result<()>)>,
) -> ProxySyncService {
    cancel.cancel();
    let (service, result) = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("scheduler stops after cancellation")
        .expect("scheduler task does not panic");
    assert!(result.unwrap_err().is_cancelled());
    service
}

/// Records whose tracked fields move forward on every call
fn bumped(records: &[ProxyRecord], seconds: i64) -> Vec<ProxyRecord> {
    records
        .iter()
        .cloned()
        .map(|mut r| {
            r.last_checked = r.last_checked + chrono::Duration::seconds(seconds);
            r
        })
        .collect()
}

#[tokio::test(start_paused = true)]
async fn effective_cycle_arms_timer_and_idle_cycle_disarms_it() {
    let base = records("10.0.0.1", 1, 4);
    // first cycle inserts, second sees the same data
    let feed = Arc::new(ScriptedFeed::fixed(base));
    let store = Arc::new(RecordingStore::new());
    let cancel = CancellationToken::new();

    let handle = spawn(
        service(feed.clone(), store.clone(), Arc::new(FakeValidator::default())),
        cancel.clone(),
    );

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(feed.calls(), 1);
    assert_eq!(store.upserts().len(), 1);

    tokio::time::sleep(INTERVAL).await;
    assert_eq!(feed.calls(), 2);
    assert_eq!(store.upserts().len(), 1);

    // idle: no more polling
    tokio::time::sleep(INTERVAL * 10).await;
    assert_eq!(feed.calls(), 2);

    let service = stop(cancel, handle).await;
    assert!(service.state().is_idle());
}

#[tokio::test(start_paused = true)]
async fn keeps_polling_while_cycles_have_effect() {
    let base = records("10.0.0.1", 1, 2);
    let feed = Arc::new(ScriptedFeed::new(
        vec![
            Step::Records(base.clone()),
            Step::Records(bumped(&base, 10)),
            Step::Records(bumped(&base, 20)),
        ],
        bumped(&base, 20),
    ));
    let store = Arc::new(RecordingStore::new());
    let cancel = CancellationToken::new();

    let handle = spawn(
        service(feed.clone(), store.clone(), Arc::new(FakeValidator::default())),
        cancel.clone(),
    );

    tokio::time::sleep(INTERVAL * 2 + Duration::from_secs(1)).await;
    assert_eq!(feed.calls(), 3);
    assert_eq!(store.upserts().len(), 3);

    tokio::time::sleep(INTERVAL).await;
    assert_eq!(feed.calls(), 4);
    assert_eq!(store.upserts().len(), 3);

    let service = stop(cancel, handle).await;
    assert_eq!(service.state(), SchedulerState::Idle);
}

#[tokio::test(start_paused = true)]
async fn failed_cycle_keeps_active_scheduler_armed() {
    let base = records("10.0.0.1", 1, 2);
    let feed = Arc::new(ScriptedFeed::new(
        vec![
            Step::Records(base.clone()),
            Step::Fail,
            Step::Fail,
            Step::Fail,
            Step::Records(bumped(&base, 5)),
        ],
        bumped(&base, 5),
    ));
    let store = Arc::new(RecordingStore::new());
    let cancel = CancellationToken::new();

    let handle = spawn(
        service(feed.clone(), store.clone(), Arc::new(FakeValidator::default())),
        cancel.clone(),
    );

    // t=60: three failing attempts, done by t=62, re-armed for t=122
    tokio::time::sleep(Duration::from_secs(100)).await;
    assert_eq!(feed.calls(), 4);
    assert_eq!(store.upserts().len(), 1);

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(feed.calls(), 5);
    assert_eq!(store.upserts().len(), 2);

    stop(cancel, handle).await;
}

#[tokio::test(start_paused = true)]
async fn failed_first_cycle_leaves_scheduler_idle() {
    let feed = Arc::new(ScriptedFeed::new(
        vec![Step::Fail, Step::Fail, Step::Fail],
        records("10.0.0.1", 1, 2),
    ));
    let store = Arc::new(RecordingStore::new());
    let cancel = CancellationToken::new();

    let handle = spawn(
        service(feed.clone(), store.clone(), Arc::new(FakeValidator::default())),
        cancel.clone(),
    );

    tokio::time::sleep(INTERVAL * 5).await;
    assert_eq!(feed.calls(), 3);
    assert!(store.upserts().is_empty());

    let service = stop(cancel, handle).await;
    assert!(service.state().is_idle());
}

#[tokio::test(start_paused = true)]
async fn cancellation_while_active_disarms_timer() {
    let feed = Arc::new(ScriptedFeed::fixed(records("10.0.0.1", 1, 3)));
    let store = Arc::new(RecordingStore::new());
    let cancel = CancellationToken::new();

    let handle = spawn(
        service(feed.clone(), store, Arc::new(FakeValidator::default())),
        cancel.clone(),
    );

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(feed.calls(), 1);

    let service = stop(cancel, handle).await;
    assert!(service.state().is_idle());
    assert_eq!(feed.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn cancellation_wins_over_ready_timer() {
    let base = records("10.0.0.1", 1, 2);
    let feed = Arc::new(ScriptedFeed::new(
        vec![Step::Records(base.clone())],
        bumped(&base, 10),
    ));
    let store = Arc::new(RecordingStore::new());
    let cancel = CancellationToken::new();

    let handle = spawn(
        service(feed.clone(), store.clone(), Arc::new(FakeValidator::default())),
        cancel.clone(),
    );

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(feed.calls(), 1);

    // both branches are ready the next time the loop is polled
    cancel.cancel();
    tokio::time::advance(INTERVAL * 2).await;

    let service = stop(cancel, handle).await;
    assert!(service.state().is_idle());
    assert_eq!(feed.calls(), 1);
    assert_eq!(store.upserts().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn restarts_after_idle_cancellation_terminate_cleanly() {
    let stored = records("10.0.0.1", 1, 3);
    let feed = Arc::new(ScriptedFeed::fixed(stored.clone()));
    let store = Arc::new(RecordingStore::new());
    store.seed(&stored).await;
    let validator = Arc::new(FakeValidator::default());

    let mut service = service(feed.clone(), store.clone(), validator);

    for round in 1..=2 {
        let cancel = CancellationToken::new();
        let handle = spawn(service, cancel.clone());

        tokio::time::sleep(INTERVAL * 3).await;
        assert_eq!(feed.calls(), round);

        service = stop(cancel, handle).await;
        assert!(service.state().is_idle());
    }

    assert!(store.upserts().is_empty());
}

#[tokio::test(start_paused = true)]
async fn cancelled_before_start_still_runs_first_cycle() {
    let feed = Arc::new(ScriptedFeed::fixed(records("10.0.0.1", 1, 1)));
    let store = Arc::new(RecordingStore::new());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let validator = Arc::new(FakeValidator::default());
    let mut service = service(feed.clone(), store.clone(), validator);
    let result = service.run(cancel).await;

    assert!(result.unwrap_err().is_cancelled());
    assert_eq!(feed.calls(), 1);
    assert_eq!(store.upserts().len(), 1);
    assert!(service.state().is_idle());
}
