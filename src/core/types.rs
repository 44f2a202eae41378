// Core domain types shared across the monitor

use std::collections::VecDeque;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Health classification of a monitored channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChannelHealth {
    /// Last probe succeeded
    Online,
    /// Consecutive failures reached the channel threshold
    Offline,
    /// Never probed, guard-blocked, or otherwise undetermined
    #[default]
    Unknown,
}

impl std::fmt::Display for ChannelHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelHealth::Online => write!(f, "online"),
            ChannelHealth::Offline => write!(f, "offline"),
            ChannelHealth::Unknown => write!(f, "unknown"),
        }
    }
}

/// Scheduling priority of a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Critical,
    High,
    #[default]
    Medium,
    Low,
}

impl Priority {
    /// Crisis-mode multiplier applied on top of the failure-count factor
    pub fn crisis_factor(&self) -> f64 {
        match self {
            Priority::Critical => 0.5,
            Priority::High => 0.75,
            Priority::Medium => 1.0,
            Priority::Low => 1.5,
        }
    }

    /// Fixed cadence used by individual watches that carry no explicit interval
    pub fn watch_interval_secs(&self) -> u64 {
        match self {
            Priority::Critical => 10,
            Priority::High => 15,
            Priority::Medium => 30,
            Priority::Low => 60,
        }
    }
}

/// Classification attached to failed samples
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureKind {
    Timeout,
    NameResolution,
    Socket,
    Tls,
    Http,
    Task,
    Guard,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FailureKind::Timeout => "timeout",
            FailureKind::NameResolution => "name-resolution",
            FailureKind::Socket => "socket",
            FailureKind::Tls => "tls",
            FailureKind::Http => "http",
            FailureKind::Task => "task",
            FailureKind::Guard => "guard",
        };
        write!(f, "{}", s)
    }
}

/// One probe outcome, append-only
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Sample {
    /// Milliseconds since the Unix epoch
    pub timestamp_ms: u64,
    pub ok: bool,
    /// Present on success and on measured failures
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<FailureKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Map<String, serde_json::Value>>,
}

impl Sample {
    pub fn success(timestamp_ms: u64, latency_ms: u64) -> Self {
        Self {
            timestamp_ms,
            ok: true,
            latency_ms: Some(latency_ms),
            kind: None,
            error: None,
            details: None,
        }
    }

    pub fn failure(
        timestamp_ms: u64,
        kind: FailureKind,
        latency_ms: Option<u64>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            timestamp_ms,
            ok: false,
            latency_ms,
            kind: Some(kind),
            error: Some(error.into()),
            details: None,
        }
    }

    pub fn with_detail(mut self, key: &str, value: serde_json::Value) -> Self {
        self.details
            .get_or_insert_with(serde_json::Map::new)
            .insert(key.to_string(), value);
        self
    }
}

/// A period during which a channel was offline
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Outage {
    pub id: String,
    pub channel_id: String,
    /// Start of the failure streak that led to confirmation
    pub first_failure_ts: u64,
    /// When the failure threshold was crossed
    pub confirmed_ts: u64,
    /// Set on recovery, absent while the outage is open
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recovered_ts: Option<u64>,
    /// Consecutive failures at confirmation time
    pub failure_count: u32,
    pub reason: FailureKind,
    /// Latency of the recovering sample, when it was measured
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_latency_ms: Option<u64>,
}

impl Outage {
    pub fn is_open(&self) -> bool {
        self.recovered_ts.is_none()
    }

    /// Duration from confirmation to recovery, or to `now_ms` while open
    pub fn duration_ms(&self, now_ms: u64) -> u64 {
        self.recovered_ts
            .unwrap_or(now_ms)
            .saturating_sub(self.confirmed_ts)
    }
}

/// Requested length of a watch session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "ms", rename_all = "lowercase")]
pub enum WatchDuration {
    Finite(u64),
    Forever,
}

/// A time-boxed intensified monitoring window
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WatchSession {
    pub id: String,
    pub started_ts: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_ts: Option<u64>,
    pub duration: WatchDuration,
    #[serde(default)]
    pub paused: bool,
    /// Per-channel samples accumulated while the session was active
    #[serde(default)]
    pub samples: std::collections::BTreeMap<String, Vec<Sample>>,
}

impl WatchSession {
    pub fn new(duration: WatchDuration, now_ms: u64) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            started_ts: now_ms,
            ended_ts: None,
            duration,
            paused: false,
            samples: std::collections::BTreeMap::new(),
        }
    }

    /// Planned end of the session, `None` when unbounded
    pub fn target_end_ts(&self) -> Option<u64> {
        match self.duration {
            WatchDuration::Finite(ms) => Some(self.started_ts.saturating_add(ms)),
            WatchDuration::Forever => None,
        }
    }

    pub fn is_expired(&self, now_ms: u64) -> bool {
        self.target_end_ts().is_some_and(|end| now_ms >= end)
    }
}

/// Mutable per-channel record persisted in channelStates.json
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ChannelStateRecord {
    #[serde(default)]
    pub health: ChannelHealth,
    #[serde(default)]
    pub consecutive_failures: u32,
    /// First failure of the current streak, cleared on success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_failure_ts: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_ts: Option<u64>,
    /// Id of the currently open outage, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub open_outage_id: Option<String>,
    /// Recent samples, newest last; trimmed on append
    #[serde(default)]
    pub recent_samples: VecDeque<Sample>,
}

/// Monitor-wide error type
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("store error: {0}")]
    Store(String),
    #[error("coordination error: {0}")]
    Coordination(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("unknown channel: {0}")]
    UnknownChannel(String),
    #[error("probe already in flight for channel: {0}")]
    ProbeInFlight(String),
    #[error("a watch session is already active")]
    WatchActive,
    #[error("HTTP client error: {0}")]
    Http(String),
}

/// Milliseconds since the Unix epoch
pub fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}

/// Local-timezone ISO-8601 timestamp used for log lines and forensics suffixes
pub fn local_timestamp() -> String {
    chrono::Local::now().to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&ChannelHealth::Offline).unwrap(),
            "\"offline\""
        );
        let back: ChannelHealth = serde_json::from_str("\"unknown\"").unwrap();
        assert_eq!(back, ChannelHealth::Unknown);
    }

    #[test]
    fn failure_kind_uses_kebab_case() {
        assert_eq!(
            serde_json::to_string(&FailureKind::NameResolution).unwrap(),
            "\"name-resolution\""
        );
    }

    #[test]
    fn outage_duration_open_and_closed() {
        let mut outage = Outage {
            id: "o1".into(),
            channel_id: "web-a".into(),
            first_failure_ts: 1_000,
            confirmed_ts: 3_000,
            recovered_ts: None,
            failure_count: 3,
            reason: FailureKind::Timeout,
            final_latency_ms: None,
        };
        assert!(outage.is_open());
        assert_eq!(outage.duration_ms(10_000), 7_000);
        outage.recovered_ts = Some(5_000);
        assert_eq!(outage.duration_ms(10_000), 2_000);
    }

    #[test]
    fn watch_session_expiry() {
        let session = WatchSession::new(WatchDuration::Finite(60_000), 1_000);
        assert_eq!(session.target_end_ts(), Some(61_000));
        assert!(!session.is_expired(60_999));
        assert!(session.is_expired(61_000));

        let forever = WatchSession::new(WatchDuration::Forever, 1_000);
        assert_eq!(forever.target_end_ts(), None);
        assert!(!forever.is_expired(u64::MAX));
    }
}
