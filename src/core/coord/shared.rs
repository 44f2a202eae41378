// Leader-published shared state: per-channel snapshot plus revision counter

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::store::atomic::write_json_file;
use crate::core::types::{ChannelHealth, MonitorError};

/// Per-channel summary visible to follower processes
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChannelPeek {
    pub health: ChannelHealth,
    pub consecutive_failures: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sample_ts: Option<u64>,
}

/// One published revision of the leader's view
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SharedSnapshot {
    /// Monotonic; followers mirror only on advance
    pub revision: u64,
    pub published_ms: u64,
    pub leader_pid: u32,
    pub leader_instance: String,
    pub channels: BTreeMap<String, ChannelPeek>,
}

/// Read the snapshot; absent or corrupt both read as `None`
pub async fn read_snapshot(path: &Path) -> Option<SharedSnapshot> {
    let bytes = tokio::fs::read(path).await.ok()?;
    serde_json::from_slice(&bytes).ok()
}

pub async fn write_snapshot(path: &Path, snapshot: &SharedSnapshot) -> Result<(), MonitorError> {
    write_json_file(path, snapshot).await
}
