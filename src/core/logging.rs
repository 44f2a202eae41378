// Env-gated diagnostic logging

use std::collections::{HashMap, HashSet};
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, Write};
use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};

use flate2::{write::GzEncoder, Compression};
use fs2::FileExt;
use serde::Serialize;

use crate::core::types::epoch_ms;

/// The active log file is archived once it grows past this
const ACTIVE_LOG_CAP_BYTES: u64 = 4 * 1024 * 1024;
/// Compressed archives are pruned, newest first, to fit this budget
const ARCHIVE_BUDGET_BYTES: u64 = 32 * 1024 * 1024;
const ARCHIVE_PREFIX: &str = "linkwatch-debug-";

#[derive(Serialize)]
struct LogEntry<'a> {
    timestamp: String,
    level: &'a str,
    component: &'a str,
    message: String,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    fields: HashMap<&'a str, serde_json::Value>,
}

struct ActiveLog {
    file: File,
    written: u64,
}

/// Appends JSONL lines to one file, counting bytes as it goes. Crossing the
/// size cap moves the file into an `archive/` sibling directory as a
/// timestamped gzip and trims the archive set to a byte budget. A held
/// advisory lock on a guard file keeps concurrent processes from archiving
/// the same file; the loser simply reopens and keeps appending.
struct LogSink {
    path: PathBuf,
    archive_dir: PathBuf,
    active: Mutex<Option<ActiveLog>>,
}

impl LogSink {
    fn new(path: PathBuf) -> Self {
        let archive_dir = path
            .parent()
            .map(|p| p.join("archive"))
            .unwrap_or_else(|| PathBuf::from("archive"));
        Self {
            path,
            archive_dir,
            active: Mutex::new(None),
        }
    }

    fn append(&self, line: &str) -> io::Result<()> {
        let Ok(mut slot) = self.active.lock() else {
            return Ok(());
        };

        if slot.is_none() {
            if let Some(parent) = self.path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
            let written = file.metadata().map(|m| m.len()).unwrap_or(0);
            *slot = Some(ActiveLog { file, written });
        }

        if let Some(active) = slot.as_mut() {
            active.file.write_all(line.as_bytes())?;
            active.file.write_all(b"\n")?;
            active.written += line.len() as u64 + 1;
            if active.written >= ACTIVE_LOG_CAP_BYTES {
                // Close our handle before the rename; the next append reopens.
                *slot = None;
                self.archive_active()?;
            }
        }
        Ok(())
    }

    fn archive_active(&self) -> io::Result<()> {
        std::fs::create_dir_all(&self.archive_dir)?;

        // One archiver at a time across processes. The guard file persists;
        // the lock is held for the whole move-compress-prune sequence and
        // released with the handle.
        let guard = OpenOptions::new()
            .create(true)
            .write(true)
            .open(self.archive_dir.join(".guard"))?;
        if guard.try_lock_exclusive().is_err() {
            return Ok(());
        }

        let stamp = epoch_ms();
        let staged = self.archive_dir.join(format!("{}{}.jsonl", ARCHIVE_PREFIX, stamp));
        match std::fs::rename(&self.path, &staged) {
            Ok(()) => {}
            // Another process already moved it between our size check and now.
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e),
        }

        let archive = self.archive_dir.join(format!("{}{}.jsonl.gz", ARCHIVE_PREFIX, stamp));
        let mut encoder = GzEncoder::new(File::create(&archive)?, Compression::fast());
        io::copy(&mut BufReader::new(File::open(&staged)?), &mut encoder)?;
        encoder.finish()?;
        std::fs::remove_file(&staged)?;

        self.prune_archives()
    }

    /// Keep the newest archives whose combined size fits the budget; the
    /// timestamp embedded in the file name is the age, so no mtime reads.
    fn prune_archives(&self) -> io::Result<()> {
        let mut archives = Vec::new();
        for entry in std::fs::read_dir(&self.archive_dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            let Some(stamp) = name
                .strip_prefix(ARCHIVE_PREFIX)
                .and_then(|rest| rest.strip_suffix(".jsonl.gz"))
                .and_then(|ts| ts.parse::<u64>().ok())
            else {
                continue;
            };
            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
            archives.push((stamp, entry.path(), size));
        }

        archives.sort_by(|a, b| b.0.cmp(&a.0));
        let mut remaining = ARCHIVE_BUDGET_BYTES;
        for (_, path, size) in archives {
            if remaining >= size {
                remaining -= size;
            } else {
                let _ = std::fs::remove_file(path);
            }
        }
        Ok(())
    }
}

/// Diagnostic logger writing JSONL lines to a per-user log file.
///
/// Disabled unless `LINKWATCH_DEBUG=true`; warn-level lines are written
/// regardless so actionable problems (permissions, corrupt files,
/// coordination fallback) leave a trace. `warn_once` deduplicates
/// repeated surfacing of the same condition per process.
pub struct DebugLogger {
    sink: LogSink,
    debug_enabled: bool,
    warned: Mutex<HashSet<String>>,
}

impl DebugLogger {
    fn new() -> Self {
        let path = std::env::var("LINKWATCH_DEBUG_LOG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_log_path());
        Self {
            sink: LogSink::new(path),
            debug_enabled: parse_debug_enabled(),
            warned: Mutex::new(HashSet::new()),
        }
    }

    pub fn debug(&self, component: &str, message: impl Into<String>) {
        if self.debug_enabled {
            self.write("DEBUG", component, message.into(), HashMap::new());
        }
    }

    pub fn debug_with(
        &self,
        component: &str,
        message: impl Into<String>,
        fields: HashMap<&str, serde_json::Value>,
    ) {
        if self.debug_enabled {
            self.write("DEBUG", component, message.into(), fields);
        }
    }

    pub fn warn(&self, component: &str, message: impl Into<String>) {
        self.write("WARN", component, message.into(), HashMap::new());
    }

    /// Warn at most once per `key` for the lifetime of the process
    pub fn warn_once(&self, key: &str, component: &str, message: impl Into<String>) {
        let first = match self.warned.lock() {
            Ok(mut seen) => seen.insert(key.to_string()),
            Err(_) => true,
        };
        if first {
            self.warn(component, message);
        }
    }

    pub fn error(&self, component: &str, message: impl Into<String>) {
        self.write("ERROR", component, message.into(), HashMap::new());
    }

    fn write(
        &self,
        level: &str,
        component: &str,
        message: String,
        fields: HashMap<&str, serde_json::Value>,
    ) {
        let entry = LogEntry {
            timestamp: crate::core::types::local_timestamp(),
            level,
            component,
            message,
            fields,
        };
        if let Ok(line) = serde_json::to_string(&entry) {
            let _ = self.sink.append(&line); // logging failures never propagate
        }
    }
}

fn default_log_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".linkwatch")
        .join("linkwatch-debug.jsonl")
}

fn parse_debug_enabled() -> bool {
    std::env::var("LINKWATCH_DEBUG")
        .map(|v| v.trim().eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// Process-wide logger accessor
pub fn get_debug_logger() -> &'static DebugLogger {
    static LOGGER: OnceLock<DebugLogger> = OnceLock::new();
    LOGGER.get_or_init(DebugLogger::new)
}
