//! Durable local store for channel states, outages and watch sessions.
//!
//! One JSON document per concern under a single storage directory. Memory is
//! authoritative between writes; every mutation persists the whole affected
//! document through the atomic protocol in [`super::atomic`]. Writes are
//! leader-gated: a follower process holds a read-only store fed by
//! [`Store::mirror_states`] and never reaches the durable write paths.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Mutex;

use crate::core::coord::shared::{ChannelPeek, SharedSnapshot};
use crate::core::logging::get_debug_logger;
use crate::core::store::atomic::{read_json_file, sweep_stale_temp_files, write_json_file};
use crate::core::types::{
    ChannelHealth, ChannelStateRecord, MonitorError, Outage, Sample, WatchSession,
};

/// Persisted samples per channel
pub const SAMPLE_CAP: usize = 1_000;
/// Samples older than this are evicted at append time
pub const SAMPLE_RETENTION_MS: u64 = 7 * 24 * 60 * 60 * 1_000;
/// Persisted outage records
pub const OUTAGE_CAP: usize = 500;
/// Finalized watch sessions kept in history
pub const HISTORY_CAP: usize = 100;

/// Well-known file locations under the storage directory
#[derive(Debug, Clone)]
pub struct StorePaths {
    dir: PathBuf,
}

impl StorePaths {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn channel_states(&self) -> PathBuf {
        self.dir.join("channelStates.json")
    }

    pub fn current_watch(&self) -> PathBuf {
        self.dir.join("currentWatch.json")
    }

    pub fn watch_history(&self) -> PathBuf {
        self.dir.join("watchHistory.json")
    }

    pub fn outages(&self) -> PathBuf {
        self.dir.join("outages.json")
    }

    pub fn custom(&self, key: &str) -> PathBuf {
        let safe: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("custom_{}.json", safe))
    }

    pub fn leader_lock(&self) -> PathBuf {
        self.dir.join("leader.lock")
    }

    pub fn shared_state(&self) -> PathBuf {
        self.dir.join("shared-state.json")
    }
}

pub struct Store {
    paths: StorePaths,
    /// Cleared while this process is a follower
    writable: AtomicBool,
    states: Mutex<BTreeMap<String, ChannelStateRecord>>,
    outages: Mutex<Vec<Outage>>,
    current: Mutex<Option<WatchSession>>,
    history: Mutex<Vec<WatchSession>>,
}

impl Store {
    /// Open the store, sweeping temp files a crashed writer left behind and
    /// loading every document (corrupt ones fall back to defaults).
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, MonitorError> {
        let paths = StorePaths::new(dir);
        tokio::fs::create_dir_all(paths.dir()).await?;
        sweep_stale_temp_files(paths.dir()).await;

        let states = read_json_file(&paths.channel_states(), BTreeMap::new).await;
        let outages = read_json_file(&paths.outages(), Vec::new).await;
        let current = read_json_file(&paths.current_watch(), || None).await;
        let history = read_json_file(&paths.watch_history(), Vec::new).await;

        Ok(Self {
            paths,
            writable: AtomicBool::new(true),
            states: Mutex::new(states),
            outages: Mutex::new(outages),
            current: Mutex::new(current),
            history: Mutex::new(history),
        })
    }

    pub fn paths(&self) -> &StorePaths {
        &self.paths
    }

    pub fn set_writable(&self, writable: bool) {
        self.writable.store(writable, Ordering::SeqCst);
    }

    pub fn is_writable(&self) -> bool {
        self.writable.load(Ordering::SeqCst)
    }

    fn ensure_writable(&self) -> Result<(), MonitorError> {
        if self.is_writable() {
            Ok(())
        } else {
            Err(MonitorError::Coordination(
                "store is read-only while this process is not the leader".to_string(),
            ))
        }
    }

    /// Returns the stored record, or a default `unknown` state when absent
    pub async fn get_state(&self, channel_id: &str) -> ChannelStateRecord {
        self.states
            .lock()
            .await
            .get(channel_id)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn set_state(
        &self,
        channel_id: &str,
        record: ChannelStateRecord,
    ) -> Result<(), MonitorError> {
        self.ensure_writable()?;
        let mut states = self.states.lock().await;
        states.insert(channel_id.to_string(), record);
        write_json_file(&self.paths.channel_states(), &*states).await
    }

    /// Append to the channel's ring buffer, evicting by retention window and
    /// by the persisted-size cap, then persist.
    pub async fn append_sample(
        &self,
        channel_id: &str,
        sample: Sample,
    ) -> Result<(), MonitorError> {
        self.ensure_writable()?;
        let mut states = self.states.lock().await;
        let record = states.entry(channel_id.to_string()).or_default();

        let horizon = sample.timestamp_ms.saturating_sub(SAMPLE_RETENTION_MS);
        record.recent_samples.push_back(sample);

        let before = record.recent_samples.len();
        while record
            .recent_samples
            .front()
            .is_some_and(|s| s.timestamp_ms < horizon)
        {
            record.recent_samples.pop_front();
        }
        while record.recent_samples.len() > SAMPLE_CAP {
            record.recent_samples.pop_front();
        }
        let trimmed = before - record.recent_samples.len();
        if trimmed > 0 {
            get_debug_logger().debug(
                "store",
                format!("trimmed {} samples for channel {}", trimmed, channel_id),
            );
        }

        write_json_file(&self.paths.channel_states(), &*states).await
    }

    /// Samples with `from <= timestamp < to`, in stored (non-decreasing) order
    pub async fn samples_in_window(&self, channel_id: &str, from: u64, to: u64) -> Vec<Sample> {
        self.states
            .lock()
            .await
            .get(channel_id)
            .map(|record| {
                record
                    .recent_samples
                    .iter()
                    .filter(|s| s.timestamp_ms >= from && s.timestamp_ms < to)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub async fn open_outage(&self, outage: Outage) -> Result<(), MonitorError> {
        self.ensure_writable()?;
        let mut outages = self.outages.lock().await;
        outages.push(outage);
        let overflow = outages.len().saturating_sub(OUTAGE_CAP);
        if overflow > 0 {
            outages.drain(..overflow);
            get_debug_logger().debug("store", format!("dropped {} oldest outages", overflow));
        }
        write_json_file(&self.paths.outages(), &*outages).await
    }

    /// Close the channel's open outage, if any, recording the recovering
    /// sample's latency, and return it
    pub async fn close_outage(
        &self,
        channel_id: &str,
        recovered_ts: u64,
        final_latency_ms: Option<u64>,
    ) -> Result<Option<Outage>, MonitorError> {
        self.ensure_writable()?;
        let mut outages = self.outages.lock().await;
        let closed = outages
            .iter_mut()
            .rev()
            .find(|o| o.channel_id == channel_id && o.is_open())
            .map(|o| {
                o.recovered_ts = Some(recovered_ts.max(o.confirmed_ts + 1));
                o.final_latency_ms = final_latency_ms;
                o.clone()
            });
        if closed.is_some() {
            write_json_file(&self.paths.outages(), &*outages).await?;
        }
        Ok(closed)
    }

    pub async fn list_outages(&self, channel_id: Option<&str>, since: Option<u64>) -> Vec<Outage> {
        self.outages
            .lock()
            .await
            .iter()
            .filter(|o| channel_id.is_none_or(|id| o.channel_id == id))
            .filter(|o| since.is_none_or(|ts| o.first_failure_ts >= ts))
            .cloned()
            .collect()
    }

    pub async fn get_current_session(&self) -> Option<WatchSession> {
        self.current.lock().await.clone()
    }

    pub async fn set_current_session(
        &self,
        session: Option<WatchSession>,
    ) -> Result<(), MonitorError> {
        self.ensure_writable()?;
        let mut current = self.current.lock().await;
        *current = session;
        write_json_file(&self.paths.current_watch(), &*current).await
    }

    /// Append a finalized session; an entry with the same id is replaced so
    /// finalization stays idempotent across a crash.
    pub async fn append_session_history(
        &self,
        session: WatchSession,
    ) -> Result<(), MonitorError> {
        self.ensure_writable()?;
        let mut history = self.history.lock().await;
        history.retain(|s| s.id != session.id);
        history.push(session);
        let overflow = history.len().saturating_sub(HISTORY_CAP);
        if overflow > 0 {
            history.drain(..overflow);
        }
        write_json_file(&self.paths.watch_history(), &*history).await
    }

    pub async fn session_history(&self) -> Vec<WatchSession> {
        self.history.lock().await.clone()
    }

    pub async fn set_custom(
        &self,
        key: &str,
        value: &serde_json::Value,
    ) -> Result<(), MonitorError> {
        self.ensure_writable()?;
        write_json_file(&self.paths.custom(key), value).await
    }

    pub async fn get_custom(&self, key: &str) -> Option<serde_json::Value> {
        let path = self.paths.custom(key);
        if !path.exists() {
            return None;
        }
        read_json_file(&path, || None).await
    }

    /// Per-channel summary used for the leader's shared-state publication
    pub async fn channel_peeks(&self) -> BTreeMap<String, ChannelPeek> {
        self.states
            .lock()
            .await
            .iter()
            .map(|(id, record)| {
                (
                    id.clone(),
                    ChannelPeek {
                        health: record.health,
                        consecutive_failures: record.consecutive_failures,
                        last_sample_ts: record.recent_samples.back().map(|s| s.timestamp_ms),
                    },
                )
            })
            .collect()
    }

    /// Ingest the leader's published snapshot, memory only. Sample rings and
    /// durable files are untouched; followers stay off the write paths.
    /// Returns the health transitions the mirror produced so the caller can
    /// surface them to local listeners.
    pub async fn mirror_states(
        &self,
        snapshot: &SharedSnapshot,
    ) -> Vec<(String, ChannelHealth, ChannelHealth)> {
        let mut changes = Vec::new();
        let mut states = self.states.lock().await;
        for (id, peek) in &snapshot.channels {
            let record = states.entry(id.clone()).or_default();
            if record.health != peek.health {
                changes.push((id.clone(), record.health, peek.health));
            }
            record.health = peek.health;
            record.consecutive_failures = peek.consecutive_failures;
        }
        changes
    }

    /// Drop outages and history entries that started before `cutoff_ms`
    pub async fn purge(&self, cutoff_ms: u64) -> Result<(), MonitorError> {
        self.ensure_writable()?;

        {
            let mut outages = self.outages.lock().await;
            let before = outages.len();
            outages.retain(|o| o.is_open() || o.first_failure_ts >= cutoff_ms);
            if outages.len() != before {
                write_json_file(&self.paths.outages(), &*outages).await?;
            }
        }

        let mut history = self.history.lock().await;
        let before = history.len();
        history.retain(|s| s.started_ts >= cutoff_ms);
        if history.len() != before {
            write_json_file(&self.paths.watch_history(), &*history).await?;
        }
        Ok(())
    }
}
