// Leader lock file: exclusive-create acquisition, lease records

use std::io::ErrorKind;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

use crate::core::store::atomic::write_json_file;
use crate::core::types::MonitorError;

/// The current leader's claim, embedded in `leader.lock`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LeaderLockRecord {
    pub pid: u32,
    /// Opaque per-process identity (survives pid reuse)
    pub instance: String,
    /// Last heartbeat, milliseconds since the Unix epoch
    pub heartbeat_ms: u64,
}

impl LeaderLockRecord {
    pub fn new(instance: &str, now_ms: u64) -> Self {
        Self {
            pid: std::process::id(),
            instance: instance.to_string(),
            heartbeat_ms: now_ms,
        }
    }

    pub fn age_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.heartbeat_ms)
    }

    /// A lease is fresh while its age is below the timeout. Heartbeats from a
    /// peer with modest clock skew can land "in the future"; saturating age
    /// treats those as fresh rather than stale.
    pub fn is_fresh(&self, now_ms: u64, lease_timeout_ms: u64) -> bool {
        self.age_ms(now_ms) < lease_timeout_ms
    }
}

/// Attempt to create the lock with exclusive-create semantics.
/// `Ok(true)` means we now hold it; `Ok(false)` means someone else does.
pub async fn try_create_exclusive(
    path: &Path,
    record: &LeaderLockRecord,
) -> Result<bool, MonitorError> {
    let bytes = serde_json::to_vec_pretty(record)?;
    match tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await
    {
        Ok(mut file) => {
            file.write_all(&bytes).await?;
            file.sync_all().await?;
            Ok(true)
        }
        Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Read the lock record; absent or corrupt both read as `None` (a corrupt
/// lock triggers a fresh election, never a crash).
pub async fn read_record(path: &Path) -> Option<LeaderLockRecord> {
    let bytes = tokio::fs::read(path).await.ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// Replace the lock record via the temp-and-rename discipline
pub async fn replace_record(path: &Path, record: &LeaderLockRecord) -> Result<(), MonitorError> {
    write_json_file(path, record).await
}

/// Delete the lock on clean shutdown, but only while we still own it
pub async fn remove_if_owner(path: &Path, instance: &str) {
    if let Some(record) = read_record(path).await {
        if record.instance == instance {
            let _ = tokio::fs::remove_file(path).await;
        }
    }
}
