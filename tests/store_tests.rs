//! Store semantics: crash-safe persistence, caps, quarantine, retention.

use linkwatch::core::store::{Store, StorePaths, HISTORY_CAP, OUTAGE_CAP, SAMPLE_CAP};
use linkwatch::core::types::{
    ChannelHealth, ChannelStateRecord, FailureKind, Outage, Sample, WatchDuration, WatchSession,
};

fn outage(id: &str, channel: &str, first_failure_ts: u64) -> Outage {
    Outage {
        id: id.to_string(),
        channel_id: channel.to_string(),
        first_failure_ts,
        confirmed_ts: first_failure_ts + 2_000,
        recovered_ts: None,
        failure_count: 3,
        reason: FailureKind::Timeout,
        final_latency_ms: None,
    }
}

#[tokio::test]
async fn state_round_trips_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let record = ChannelStateRecord {
        health: ChannelHealth::Offline,
        consecutive_failures: 4,
        first_failure_ts: Some(1_000),
        last_transition_ts: Some(3_000),
        open_outage_id: Some("o1".to_string()),
        ..Default::default()
    };

    {
        let store = Store::open(dir.path()).await.unwrap();
        store.set_state("web-a", record.clone()).await.unwrap();
    }

    let store = Store::open(dir.path()).await.unwrap();
    assert_eq!(store.get_state("web-a").await, record);
}

#[tokio::test]
async fn absent_state_defaults_to_unknown() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path()).await.unwrap();
    let record = store.get_state("never-seen").await;
    assert_eq!(record.health, ChannelHealth::Unknown);
    assert_eq!(record.consecutive_failures, 0);
}

#[tokio::test]
async fn sample_ring_drops_oldest_past_cap() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path()).await.unwrap();

    for i in 0..(SAMPLE_CAP as u64 + 1) {
        store
            .append_sample("web-a", Sample::success(1_000_000 + i, 10))
            .await
            .unwrap();
    }

    let record = store.get_state("web-a").await;
    assert_eq!(record.recent_samples.len(), SAMPLE_CAP);
    // The very first sample is gone, the second one survived.
    assert_eq!(record.recent_samples.front().unwrap().timestamp_ms, 1_000_001);
}

#[tokio::test]
async fn samples_in_window_is_half_open_and_ordered() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path()).await.unwrap();
    for ts in [1_000u64, 2_000, 3_000, 4_000] {
        store.append_sample("web-a", Sample::success(ts, 5)).await.unwrap();
    }

    let window = store.samples_in_window("web-a", 2_000, 4_000).await;
    assert_eq!(
        window.iter().map(|s| s.timestamp_ms).collect::<Vec<_>>(),
        vec![2_000, 3_000]
    );
}

#[tokio::test]
async fn outage_cap_drops_oldest() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path()).await.unwrap();

    for i in 0..(OUTAGE_CAP as u64 + 1) {
        let mut o = outage(&format!("o{}", i), "web-a", i * 10);
        o.recovered_ts = Some(o.confirmed_ts + 1);
        store.open_outage(o).await.unwrap();
    }

    let outages = store.list_outages(None, None).await;
    assert_eq!(outages.len(), OUTAGE_CAP);
    assert_eq!(outages.first().unwrap().id, "o1");
}

#[tokio::test]
async fn close_outage_sets_recovery_after_confirmation() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path()).await.unwrap();
    store.open_outage(outage("o1", "web-a", 1_000)).await.unwrap();

    let closed = store
        .close_outage("web-a", 10_000, Some(45))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(closed.recovered_ts, Some(10_000));
    assert!(closed.recovered_ts.unwrap() > closed.confirmed_ts);
    assert_eq!(closed.final_latency_ms, Some(45));

    // No open outage remains.
    assert!(store
        .close_outage("web-a", 11_000, None)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn list_outages_filters_by_channel_and_since() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path()).await.unwrap();
    store.open_outage(outage("o1", "web-a", 1_000)).await.unwrap();
    store.open_outage(outage("o2", "web-b", 5_000)).await.unwrap();

    assert_eq!(store.list_outages(Some("web-a"), None).await.len(), 1);
    assert_eq!(store.list_outages(None, Some(2_000)).await.len(), 1);
    assert_eq!(store.list_outages(None, None).await.len(), 2);
}

#[tokio::test]
async fn corrupt_document_is_quarantined_and_defaulted() {
    let dir = tempfile::tempdir().unwrap();
    let paths = StorePaths::new(dir.path());
    std::fs::write(paths.channel_states(), b"{\"web-a\": {\"health\": \"onl").unwrap();

    let store = Store::open(dir.path()).await.unwrap();
    assert_eq!(store.get_state("web-a").await.health, ChannelHealth::Unknown);

    let quarantined = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .any(|e| e.file_name().to_string_lossy().contains(".corrupt."));
    assert!(quarantined, "expected a .corrupt.<ts> forensics copy");
}

#[tokio::test]
async fn nul_bytes_reject_the_document() {
    let dir = tempfile::tempdir().unwrap();
    let paths = StorePaths::new(dir.path());
    std::fs::write(paths.outages(), b"[]\0\0").unwrap();

    let store = Store::open(dir.path()).await.unwrap();
    assert!(store.list_outages(None, None).await.is_empty());
}

#[tokio::test]
async fn stale_temp_file_is_swept_and_target_preserved() {
    let dir = tempfile::tempdir().unwrap();

    // A good write, then a simulated crash that left a temp file behind.
    {
        let store = Store::open(dir.path()).await.unwrap();
        store
            .set_state("web-a", ChannelStateRecord::default())
            .await
            .unwrap();
    }
    let temp = dir.path().join("channelStates.json.tmp.12345.deadbeef");
    std::fs::write(&temp, b"{\"half\": ").unwrap();

    let store = Store::open(dir.path()).await.unwrap();
    assert!(!temp.exists(), "stale temp file should be deleted");
    assert_eq!(store.get_state("web-a").await, ChannelStateRecord::default());
}

#[tokio::test]
async fn session_history_caps_and_deduplicates() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path()).await.unwrap();

    let mut first = WatchSession::new(WatchDuration::Forever, 0);
    first.ended_ts = Some(1);
    store.append_session_history(first.clone()).await.unwrap();
    // Re-appending the same id replaces rather than duplicates.
    store.append_session_history(first.clone()).await.unwrap();
    assert_eq!(store.session_history().await.len(), 1);

    for i in 0..HISTORY_CAP as u64 {
        let mut session = WatchSession::new(WatchDuration::Forever, 10 + i);
        session.ended_ts = Some(11 + i);
        store.append_session_history(session).await.unwrap();
    }
    let history = store.session_history().await;
    assert_eq!(history.len(), HISTORY_CAP);
    assert!(history.iter().all(|s| s.id != first.id), "oldest entry evicted");
}

#[tokio::test]
async fn current_session_round_trips_including_none() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path()).await.unwrap();
    assert!(store.get_current_session().await.is_none());

    let session = WatchSession::new(WatchDuration::Finite(60_000), 1_000);
    store.set_current_session(Some(session.clone())).await.unwrap();
    assert_eq!(store.get_current_session().await.unwrap().id, session.id);

    store.set_current_session(None).await.unwrap();
    assert!(store.get_current_session().await.is_none());

    // And across reopen.
    let store = Store::open(dir.path()).await.unwrap();
    assert!(store.get_current_session().await.is_none());
}

#[tokio::test]
async fn custom_blobs_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path()).await.unwrap();
    let value = serde_json::json!({"last_report": "2026-02-01", "count": 3});
    store.set_custom("report meta", &value).await.unwrap();
    assert_eq!(store.get_custom("report meta").await.unwrap(), value);
    assert!(store.get_custom("missing").await.is_none());
}

#[tokio::test]
async fn read_only_store_rejects_durable_writes() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path()).await.unwrap();
    store.set_writable(false);

    assert!(store.set_state("web-a", ChannelStateRecord::default()).await.is_err());
    assert!(store.append_sample("web-a", Sample::success(1, 1)).await.is_err());
    assert!(store.open_outage(outage("o1", "web-a", 1_000)).await.is_err());
    assert!(store.set_current_session(None).await.is_err());

    // Reads still work.
    assert_eq!(store.get_state("web-a").await.health, ChannelHealth::Unknown);
}

#[tokio::test]
async fn purge_drops_old_closed_outages_but_keeps_open_ones() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path()).await.unwrap();

    let mut old_closed = outage("o1", "web-a", 1_000);
    old_closed.recovered_ts = Some(4_000);
    store.open_outage(old_closed).await.unwrap();
    store.open_outage(outage("o2", "web-a", 2_000)).await.unwrap(); // still open
    store.open_outage(outage("o3", "web-b", 50_000)).await.unwrap();

    store.purge(10_000).await.unwrap();
    let kept: Vec<String> = store
        .list_outages(None, None)
        .await
        .into_iter()
        .map(|o| o.id)
        .collect();
    assert_eq!(kept, vec!["o2".to_string(), "o3".to_string()]);
}
