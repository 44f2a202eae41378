//! Watch sessions: lifecycle, accumulation, fishy triggers, quiet hours.

use std::sync::Arc;
use std::time::Duration;

use linkwatch::core::events::{EventBus, FishyReason, SampleEvent};
use linkwatch::core::quiet::QuietHours;
use linkwatch::core::store::Store;
use linkwatch::core::types::{
    epoch_ms, FailureKind, Sample, WatchDuration, WatchSession,
};
use linkwatch::core::watch::{WatchManager, WatchState};
use linkwatch::MonitorError;

struct Fixture {
    _dir: tempfile::TempDir,
    store: Arc<Store>,
    events: Arc<EventBus>,
    state: Arc<WatchState>,
    manager: WatchManager,
}

async fn fixture(quiet: Option<QuietHours>) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(Store::open(dir.path()).await.unwrap());
    let events = Arc::new(EventBus::new());
    let state = Arc::new(WatchState::new());
    let manager = WatchManager::new(
        Arc::clone(&store),
        Arc::clone(&events),
        Arc::clone(&state),
        quiet,
    );
    Fixture {
        _dir: dir,
        store,
        events,
        state,
        manager,
    }
}

fn failure_event(channel: &str, ts: u64, kind: FailureKind) -> SampleEvent {
    SampleEvent {
        channel_id: channel.to_string(),
        sample: Sample::failure(ts, kind, Some(40), "probe failed"),
    }
}

#[tokio::test]
async fn start_then_stop_archives_exactly_one_session() {
    let fx = fixture(None).await;
    let session = fx.manager.start(WatchDuration::Finite(60_000)).await.unwrap();
    assert!(fx.state.global_watch_active());
    assert_eq!(fx.store.get_current_session().await.unwrap().id, session.id);

    let finalized = fx.manager.stop().await.unwrap().unwrap();
    assert_eq!(finalized.id, session.id);
    assert!(finalized.ended_ts.is_some());
    assert!(fx.manager.current().await.is_none());
    assert!(fx.store.get_current_session().await.is_none());
    assert_eq!(fx.store.session_history().await.len(), 1);
    assert!(!fx.state.global_watch_active());

    // Stopping again is a no-op, not a duplicate history entry.
    assert!(fx.manager.stop().await.unwrap().is_none());
    assert_eq!(fx.store.session_history().await.len(), 1);
}

#[tokio::test]
async fn starting_while_active_is_rejected() {
    let fx = fixture(None).await;
    fx.manager.start(WatchDuration::Forever).await.unwrap();
    assert!(matches!(
        fx.manager.start(WatchDuration::Forever).await,
        Err(MonitorError::WatchActive)
    ));
}

#[tokio::test]
async fn samples_accumulate_in_order_while_active() {
    let fx = fixture(None).await;
    fx.manager.start(WatchDuration::Forever).await.unwrap();

    for ts in [1_000u64, 2_000, 3_000] {
        fx.manager
            .on_sample(&SampleEvent {
                channel_id: "web-a".to_string(),
                sample: Sample::success(ts, 20),
            })
            .await
            .unwrap();
    }

    let finalized = fx.manager.stop().await.unwrap().unwrap();
    let samples = &finalized.samples["web-a"];
    assert_eq!(samples.len(), 3);
    assert!(samples.windows(2).all(|w| w[0].timestamp_ms <= w[1].timestamp_ms));

    // The archived entry carries the buffers too.
    let history = fx.store.session_history().await;
    assert_eq!(history[0].samples["web-a"].len(), 3);
}

#[tokio::test]
async fn paused_session_stops_accumulating() {
    let fx = fixture(None).await;
    fx.manager.start(WatchDuration::Forever).await.unwrap();
    fx.manager.pause().await.unwrap();
    assert!(fx.state.is_paused());

    fx.manager
        .on_sample(&SampleEvent {
            channel_id: "web-a".to_string(),
            sample: Sample::success(1_000, 20),
        })
        .await
        .unwrap();

    fx.manager.resume().await.unwrap();
    assert!(!fx.state.is_paused());

    let finalized = fx.manager.stop().await.unwrap().unwrap();
    assert!(finalized.samples.is_empty());
}

#[tokio::test]
async fn finite_session_expires_via_tick() {
    let fx = fixture(None).await;
    fx.manager.start(WatchDuration::Finite(50)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(80)).await;

    fx.manager.maybe_expire().await.unwrap();
    assert!(fx.manager.current().await.is_none());
    assert_eq!(fx.store.session_history().await.len(), 1);
}

#[tokio::test]
async fn recover_reopens_a_still_active_session() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(Store::open(dir.path()).await.unwrap());
    let session = WatchSession::new(WatchDuration::Forever, epoch_ms());
    store.set_current_session(Some(session.clone())).await.unwrap();

    let events = Arc::new(EventBus::new());
    let state = Arc::new(WatchState::new());
    let manager = WatchManager::new(Arc::clone(&store), events, Arc::clone(&state), None);
    manager.recover().await.unwrap();

    assert_eq!(manager.current().await.unwrap().id, session.id);
    assert!(state.global_watch_active());
}

#[tokio::test]
async fn recover_finalizes_an_expired_session() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(Store::open(dir.path()).await.unwrap());
    // Started long ago with a one-minute budget: long expired.
    let session = WatchSession::new(WatchDuration::Finite(60_000), 1_000);
    store.set_current_session(Some(session.clone())).await.unwrap();

    let events = Arc::new(EventBus::new());
    let state = Arc::new(WatchState::new());
    let manager = WatchManager::new(Arc::clone(&store), events, state, None);
    manager.recover().await.unwrap();

    assert!(manager.current().await.is_none());
    assert!(store.get_current_session().await.is_none());
    let history = store.session_history().await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].id, session.id);
}

#[tokio::test]
async fn three_consecutive_failures_emit_one_fishy_event() {
    let fx = fixture(None).await;
    let mut fishy = fx.events.on_fishy();

    let base = epoch_ms();
    for i in 0..4u64 {
        fx.manager
            .on_sample(&failure_event("api", base + i * 1_000, FailureKind::Http))
            .await
            .unwrap();
    }

    let event = tokio::time::timeout(Duration::from_millis(200), fishy.recv())
        .await
        .expect("fishy event expected")
        .unwrap();
    assert_eq!(event.channel_id, "api");
    assert_eq!(event.reason, FishyReason::ConsecutiveFailures { count: 3 });

    // The fourth failure did not queue a second event.
    assert!(
        tokio::time::timeout(Duration::from_millis(100), fishy.recv())
            .await
            .is_err()
    );
}

#[tokio::test]
async fn fishy_is_suppressed_during_an_active_watch() {
    let fx = fixture(None).await;
    let mut fishy = fx.events.on_fishy();
    fx.manager.start(WatchDuration::Forever).await.unwrap();

    let base = epoch_ms();
    for i in 0..4u64 {
        fx.manager
            .on_sample(&failure_event("api", base + i * 1_000, FailureKind::Http))
            .await
            .unwrap();
    }
    assert!(
        tokio::time::timeout(Duration::from_millis(100), fishy.recv())
            .await
            .is_err()
    );
}

#[tokio::test]
async fn fishy_is_suppressed_during_quiet_hours() {
    // A window wrapping the current local time.
    let now = chrono::Local::now().time();
    let one_hour = chrono::Duration::hours(1);
    let quiet = QuietHours::new(
        now.overflowing_sub_signed(one_hour).0,
        now.overflowing_add_signed(one_hour).0,
    );

    let fx = fixture(Some(quiet)).await;
    let mut fishy = fx.events.on_fishy();

    let base = epoch_ms();
    for i in 0..4u64 {
        fx.manager
            .on_sample(&failure_event("api", base + i * 1_000, FailureKind::Http))
            .await
            .unwrap();
    }
    assert!(
        tokio::time::timeout(Duration::from_millis(100), fishy.recv())
            .await
            .is_err()
    );
}

#[tokio::test]
async fn individual_watch_appears_in_cadence_view_until_it_ends() {
    let fx = fixture(None).await;
    fx.manager.start_individual("web-a", Some(50), Some(5));

    let view = fx.state.cadence_view("web-a");
    assert_eq!(view.individual.as_ref().unwrap().interval_secs, Some(5));
    assert!(fx.state.cadence_view("web-b").individual.is_none());

    tokio::time::sleep(Duration::from_millis(80)).await;
    assert!(fx.state.cadence_view("web-a").individual.is_none());

    fx.manager.start_individual("web-a", None, None);
    assert!(fx.state.cadence_view("web-a").individual.is_some());
    fx.manager.stop_individual("web-a");
    assert!(fx.state.cadence_view("web-a").individual.is_none());
}
