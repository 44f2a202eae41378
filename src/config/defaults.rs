// Built-in host settings

use super::HostSettings;

pub const DEFAULT_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_TIMEOUT_MS: u64 = 3_000;
pub const DEFAULT_THRESHOLD: u32 = 3;
pub const DEFAULT_JITTER_PCT: f64 = 10.0;
pub const DEFAULT_HIGH_CADENCE_SECS: u64 = 15;
pub const DEFAULT_USER_AGENT: &str = concat!("linkwatch/", env!("CARGO_PKG_VERSION"));

impl Default for HostSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            default_interval_secs: DEFAULT_INTERVAL_SECS,
            default_timeout_ms: DEFAULT_TIMEOUT_MS,
            default_threshold: DEFAULT_THRESHOLD,
            default_jitter_pct: DEFAULT_JITTER_PCT,
            watch_default: "1h".to_string(),
            high_cadence_interval_secs: DEFAULT_HIGH_CADENCE_SECS,
            coordination_enabled: true,
            coordination_dir: None,
            quiet_hours: None,
            report_auto_open: false,
            script_probes_enabled: false,
            allow_proxy: true,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            storage_dir: None,
        }
    }
}
