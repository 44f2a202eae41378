//! Crash-safe JSON file I/O.
//!
//! Writes go to a uniquely named temporary sibling, are flushed, read back
//! and re-parsed, then renamed over the target. Reads validate the raw bytes
//! before parsing and quarantine anything that fails, so a crashed writer or
//! a corrupted disk never takes the monitor down: callers always get either
//! the last complete document or their default.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::AsyncWriteExt;

use crate::core::logging::get_debug_logger;
use crate::core::types::{epoch_ms, MonitorError};

/// Serialized documents above this are rejected outright
const MAX_DOC_BYTES: usize = 50 * 1024 * 1024;
/// Serialized documents above this persist but emit a warning
const WARN_DOC_BYTES: usize = 10 * 1024 * 1024;
/// Exponential backoff between write/read retries
const RETRY_BACKOFF_MS: [u64; 3] = [100, 200, 400];
/// Pause before the copy fallback when rename hits a transient denial
const RENAME_FALLBACK_PAUSE_MS: u64 = 50;

/// Serialize `value` and atomically replace `path` with it.
///
/// Retries up to three times; on final failure the target file is untouched.
pub async fn write_json_file<T: Serialize>(path: &Path, value: &T) -> Result<(), MonitorError> {
    let bytes = serde_json::to_vec_pretty(value)?;
    if bytes.is_empty() {
        return Err(MonitorError::Store(format!(
            "refusing empty serialization for {}",
            path.display()
        )));
    }
    if bytes.len() > MAX_DOC_BYTES {
        return Err(MonitorError::Store(format!(
            "document for {} is {} bytes, over the 50 MiB limit",
            path.display(),
            bytes.len()
        )));
    }
    if bytes.len() >= WARN_DOC_BYTES {
        get_debug_logger().warn(
            "store",
            format!("document {} is {} bytes", path.display(), bytes.len()),
        );
    }

    let mut last_err = None;
    for (attempt, backoff_ms) in RETRY_BACKOFF_MS.iter().enumerate() {
        match write_once(path, &bytes).await {
            Ok(()) => return Ok(()),
            Err(e) => {
                get_debug_logger().debug(
                    "store",
                    format!(
                        "write attempt {} for {} failed: {}",
                        attempt + 1,
                        path.display(),
                        e
                    ),
                );
                last_err = Some(e);
                tokio::time::sleep(Duration::from_millis(*backoff_ms)).await;
            }
        }
    }
    Err(last_err
        .unwrap_or_else(|| MonitorError::Store(format!("write failed for {}", path.display()))))
}

async fn write_once(path: &Path, bytes: &[u8]) -> Result<(), MonitorError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let temp = temp_path(path);
    let result = write_temp_and_swap(path, &temp, bytes).await;
    if result.is_err() {
        let _ = tokio::fs::remove_file(&temp).await;
    }
    result
}

async fn write_temp_and_swap(path: &Path, temp: &Path, bytes: &[u8]) -> Result<(), MonitorError> {
    let mut file = tokio::fs::File::create(temp).await?;
    file.write_all(bytes).await?;
    file.sync_all().await?;
    drop(file);

    // Read back end-to-end: a short or mangled temp file must never be
    // renamed over the last good document.
    let written = tokio::fs::read(temp).await?;
    if written.len() != bytes.len() {
        return Err(MonitorError::Store(format!(
            "temp file for {} is {} bytes, expected {}",
            path.display(),
            written.len(),
            bytes.len()
        )));
    }
    serde_json::from_slice::<serde_json::Value>(&written)?;

    match tokio::fs::rename(temp, path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::PermissionDenied => {
            // Rename-over-existing can fail transiently on some platforms
            // (antivirus scans, Windows sharing violations). Pause, then
            // fall back to copy-then-delete.
            tokio::time::sleep(Duration::from_millis(RENAME_FALLBACK_PAUSE_MS)).await;
            tokio::fs::copy(temp, path).await?;
            let _ = tokio::fs::remove_file(temp).await;
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// Read and parse `path`, falling back to `default` on absence, corruption,
/// or persistent I/O failure. Corrupt files are quarantined for forensics.
pub async fn read_json_file<T, F>(path: &Path, default: F) -> T
where
    T: DeserializeOwned,
    F: FnOnce() -> T,
{
    let mut attempt = 0;
    let bytes = loop {
        match tokio::fs::read(path).await {
            Ok(bytes) => break bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return default(),
            Err(e) => {
                if attempt >= RETRY_BACKOFF_MS.len() {
                    get_debug_logger().warn(
                        "store",
                        format!("giving up reading {}: {}", path.display(), e),
                    );
                    return default();
                }
                tokio::time::sleep(Duration::from_millis(RETRY_BACKOFF_MS[attempt])).await;
                attempt += 1;
            }
        }
    };

    if let Err(reason) = validate_document_bytes(&bytes) {
        quarantine(path, &reason).await;
        return default();
    }

    match serde_json::from_slice(&bytes) {
        Ok(value) => value,
        Err(e) => {
            quarantine(path, &format!("parse error: {}", e)).await;
            default()
        }
    }
}

/// Byte-level sanity checks that catch truncation and binary damage before
/// the parser sees the document.
pub fn validate_document_bytes(bytes: &[u8]) -> Result<(), String> {
    if bytes.is_empty() {
        return Err("empty file".to_string());
    }
    if bytes.contains(&0) {
        return Err("NUL byte in document".to_string());
    }
    // U+FFFD as UTF-8: a prior lossy rewrite destroyed content.
    if bytes.windows(3).any(|w| w == [0xEF, 0xBF, 0xBD]) {
        return Err("Unicode replacement character in document".to_string());
    }
    let last = bytes
        .iter()
        .rev()
        .find(|b| !b" \t\r\n".contains(b))
        .copied()
        .unwrap_or(0);
    let legal_terminator =
        matches!(last, b'}' | b']' | b'"') || last.is_ascii_digit() || matches!(last, b'e' | b'l');
    if !legal_terminator {
        return Err(format!("document ends in illegal byte 0x{:02x}", last));
    }
    Ok(())
}

async fn quarantine(path: &Path, reason: &str) {
    let corrupt = sibling_with_suffix(path, &format!("corrupt.{}", epoch_ms()));
    match tokio::fs::copy(path, &corrupt).await {
        Ok(_) => get_debug_logger().warn(
            "store",
            format!(
                "quarantined {} to {} ({})",
                path.display(),
                corrupt.display(),
                reason
            ),
        ),
        Err(e) => get_debug_logger().warn(
            "store",
            format!("could not quarantine {}: {} ({})", path.display(), e, reason),
        ),
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    sibling_with_suffix(path, &format!("tmp.{}.{}", epoch_ms(), &suffix[..8]))
}

fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    path.with_file_name(format!("{}.{}", name, suffix))
}

/// Remove temp files left behind by a crashed writer.
pub async fn sweep_stale_temp_files(dir: &Path) {
    let Ok(mut entries) = tokio::fs::read_dir(dir).await else {
        return;
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        let name = entry.file_name().to_string_lossy().to_string();
        if name.contains(".tmp.") {
            let _ = tokio::fs::remove_file(entry.path()).await;
            get_debug_logger().debug("store", format!("removed stale temp file {}", name));
        }
    }
}
