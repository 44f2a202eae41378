//! Parsed configuration value types.
//!
//! Configuration is merged from two sources by the embedding host: host
//! settings (editor/user scope) and a workspace document (guards plus the
//! channel list). Both arrive here already parsed; this module only defines
//! the value types, default resolution, and channel validation. The CLI
//! binary additionally deserializes the workspace document from TOML using
//! the same serde derives.

pub mod defaults;

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::core::guard::GuardSpec;
use crate::core::logging::get_debug_logger;
use crate::core::probes::ProbeSpec;
use crate::core::quiet::QuietHours;
use crate::core::types::{MonitorError, Priority, WatchDuration};

/// Host-scope settings delivered by the embedding application
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostSettings {
    pub enabled: bool,
    pub default_interval_secs: u64,
    pub default_timeout_ms: u64,
    pub default_threshold: u32,
    pub default_jitter_pct: f64,
    /// "1h", "12h", "forever", or a millisecond count
    pub watch_default: String,
    /// Uniform cadence applied to every channel during a global watch
    pub high_cadence_interval_secs: u64,
    pub coordination_enabled: bool,
    /// Defaults to the storage directory when unset
    pub coordination_dir: Option<PathBuf>,
    pub quiet_hours: Option<QuietHours>,
    pub report_auto_open: bool,
    /// Hard off-switch for shell task probes
    pub script_probes_enabled: bool,
    /// Honor proxy environment variables for web probes
    pub allow_proxy: bool,
    pub user_agent: String,
    pub storage_dir: Option<PathBuf>,
}

/// Optional per-workspace overrides of the host defaults
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceDefaults {
    pub interval_secs: Option<u64>,
    pub timeout_ms: Option<u64>,
    pub threshold: Option<u32>,
    pub jitter_pct: Option<f64>,
}

/// Effective channel-level defaults after merging host and workspace values
#[derive(Debug, Clone, Copy)]
pub struct ChannelDefaults {
    pub interval_secs: u64,
    pub timeout_ms: u64,
    pub threshold: u32,
    pub jitter_pct: f64,
}

/// One monitored endpoint, immutable per config load
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelDef {
    pub id: String,
    #[serde(default)]
    pub label: Option<String>,
    pub probe: ProbeSpec,
    #[serde(default)]
    pub interval_secs: Option<u64>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub threshold: Option<u32>,
    #[serde(default)]
    pub jitter_pct: Option<f64>,
    #[serde(default)]
    pub guards: Vec<String>,
    #[serde(default)]
    pub priority: Priority,
}

impl ChannelDef {
    pub fn label(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.id)
    }
}

/// The workspace monitoring document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceDoc {
    pub defaults: WorkspaceDefaults,
    pub guards: BTreeMap<String, GuardSpec>,
    pub channels: Vec<ChannelDef>,
}

impl HostSettings {
    /// Merge workspace overrides over host defaults
    pub fn channel_defaults(&self, workspace: &WorkspaceDefaults) -> ChannelDefaults {
        ChannelDefaults {
            interval_secs: workspace.interval_secs.unwrap_or(self.default_interval_secs),
            timeout_ms: workspace.timeout_ms.unwrap_or(self.default_timeout_ms),
            threshold: workspace.threshold.unwrap_or(self.default_threshold).max(1),
            jitter_pct: workspace.jitter_pct.unwrap_or(self.default_jitter_pct),
        }
    }

    pub fn watch_default_duration(&self) -> Result<WatchDuration, MonitorError> {
        parse_watch_duration(&self.watch_default)
    }
}

/// Parse "1h" / "12h" / "forever" / millisecond-count watch durations
pub fn parse_watch_duration(value: &str) -> Result<WatchDuration, MonitorError> {
    match value.trim() {
        "1h" => Ok(WatchDuration::Finite(3_600_000)),
        "12h" => Ok(WatchDuration::Finite(43_200_000)),
        "forever" => Ok(WatchDuration::Forever),
        other => other
            .parse::<u64>()
            .map(WatchDuration::Finite)
            .map_err(|_| {
                MonitorError::Config(format!(
                    "watch duration must be 1h, 12h, forever, or milliseconds; got {:?}",
                    other
                ))
            }),
    }
}

/// Validate the channel list: bad channels are excluded with a logged
/// warning, the rest continue.
pub fn validate_channels(channels: Vec<ChannelDef>) -> (Vec<ChannelDef>, Vec<String>) {
    let mut seen = std::collections::HashSet::new();
    let mut valid = Vec::new();
    let mut errors = Vec::new();

    for channel in channels {
        if channel.id.trim().is_empty() {
            errors.push("channel with empty id excluded".to_string());
            continue;
        }
        if !seen.insert(channel.id.clone()) {
            errors.push(format!("duplicate channel id {:?} excluded", channel.id));
            continue;
        }
        if let Some(0) = channel.interval_secs {
            errors.push(format!("channel {:?} has zero interval, excluded", channel.id));
            continue;
        }
        if let ProbeSpec::Web(web) = &channel.probe {
            if let Err(e) = url::Url::parse(&web.url) {
                errors.push(format!(
                    "channel {:?} has invalid url {:?}: {}, excluded",
                    channel.id, web.url, e
                ));
                continue;
            }
        }
        if let Some(0) = channel.threshold {
            errors.push(format!("channel {:?} has zero threshold, excluded", channel.id));
            continue;
        }
        valid.push(channel);
    }

    for error in &errors {
        get_debug_logger().warn("config", error.clone());
    }
    (valid, errors)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel(id: &str) -> ChannelDef {
        ChannelDef {
            id: id.to_string(),
            label: None,
            probe: ProbeSpec::Socket(crate::core::probes::SocketProbe {
                host: "localhost".into(),
                port: 80,
            }),
            interval_secs: None,
            timeout_ms: None,
            threshold: None,
            jitter_pct: None,
            guards: Vec::new(),
            priority: Priority::Medium,
        }
    }

    #[test]
    fn watch_duration_forms() {
        assert_eq!(
            parse_watch_duration("1h").unwrap(),
            WatchDuration::Finite(3_600_000)
        );
        assert_eq!(
            parse_watch_duration("12h").unwrap(),
            WatchDuration::Finite(43_200_000)
        );
        assert_eq!(parse_watch_duration("forever").unwrap(), WatchDuration::Forever);
        assert_eq!(
            parse_watch_duration("90000").unwrap(),
            WatchDuration::Finite(90_000)
        );
        assert!(parse_watch_duration("2 weeks").is_err());
    }

    #[test]
    fn bad_channels_excluded_rest_continue() {
        let mut dup = channel("a");
        dup.interval_secs = Some(30);
        let mut zero = channel("z");
        zero.threshold = Some(0);
        let (valid, errors) =
            validate_channels(vec![channel("a"), dup, channel(""), zero, channel("b")]);
        assert_eq!(
            valid.iter().map(|c| c.id.as_str()).collect::<Vec<_>>(),
            vec!["a", "b"]
        );
        assert_eq!(errors.len(), 3);
    }

    #[test]
    fn defaults_merge_prefers_workspace() {
        let host = HostSettings::default();
        let workspace = WorkspaceDefaults {
            interval_secs: Some(15),
            timeout_ms: None,
            threshold: Some(5),
            jitter_pct: None,
        };
        let merged = host.channel_defaults(&workspace);
        assert_eq!(merged.interval_secs, 15);
        assert_eq!(merged.threshold, 5);
        assert_eq!(merged.timeout_ms, host.default_timeout_ms);
    }
}
