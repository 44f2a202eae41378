//! Interval precedence and adaptive cadence strategies.
//!
//! Precedence is a strict four-level hierarchy: per-channel watch override,
//! channel configuration, global-watch high cadence, system default. On top
//! of the chosen base, one of four strategies adjusts the interval. Offline
//! channels are probed *faster*, not slower: the crisis multiplier shrinks
//! the interval so recovery is noticed sooner.

use serde::Serialize;

use crate::config::{ChannelDef, ChannelDefaults};
use crate::core::types::{ChannelHealth, ChannelStateRecord};
use crate::core::watch::CadenceView;

/// Hard floor for crisis-mode probing
pub const CRISIS_FLOOR_SECS: f64 = 10.0;
/// Crisis failure-count multiplier never drops below this
pub const CRISIS_MIN_MULTIPLIER: f64 = 0.25;
/// Hard floor for recovery-mode probing
pub const RECOVERY_FLOOR_SECS: f64 = 15.0;
/// Recovery multiplier never drops below this
pub const RECOVERY_MIN_MULTIPLIER: f64 = 0.7;
/// Healthy channels are never probed less often than this
pub const STABLE_CAP_SECS: u64 = 600;

/// Which precedence level supplied the base interval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum IntervalSource {
    IndividualWatch,
    Channel,
    GlobalWatch,
    Default,
}

impl IntervalSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntervalSource::IndividualWatch => "individual-watch",
            IntervalSource::Channel => "channel",
            IntervalSource::GlobalWatch => "global-watch",
            IntervalSource::Default => "default",
        }
    }
}

/// Which adaptive strategy shaped the final interval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    Watch,
    Crisis,
    Recovery,
    Stable,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Watch => "watch",
            Strategy::Crisis => "crisis",
            Strategy::Recovery => "recovery",
            Strategy::Stable => "stable",
        }
    }
}

/// Human-readable record of one interval resolution
#[derive(Debug, Clone, Serialize)]
pub struct IntervalDecision {
    pub channel_id: String,
    pub source: IntervalSource,
    pub base_secs: u64,
    pub strategy: Strategy,
    pub multiplier: f64,
    pub reason: String,
    pub final_secs: f64,
    pub jitter_pct: f64,
}

pub fn resolve(
    channel: &ChannelDef,
    state: &ChannelStateRecord,
    cadence: &CadenceView,
    defaults: &ChannelDefaults,
    high_cadence_secs: u64,
) -> IntervalDecision {
    let (source, base_secs) = if let Some(individual) = &cadence.individual {
        (
            IntervalSource::IndividualWatch,
            individual
                .interval_secs
                .unwrap_or_else(|| channel.priority.watch_interval_secs()),
        )
    } else if let Some(interval) = channel.interval_secs {
        (IntervalSource::Channel, interval)
    } else if cadence.global_watch_active {
        (IntervalSource::GlobalWatch, high_cadence_secs)
    } else {
        (IntervalSource::Default, defaults.interval_secs)
    };

    let in_watch = cadence.individual.is_some() || cadence.global_watch_active;
    let failures = state.consecutive_failures;

    let (strategy, multiplier, final_secs, reason) = if in_watch {
        (
            Strategy::Watch,
            1.0,
            base_secs as f64,
            "active watch cadence, no adjustment".to_string(),
        )
    } else if state.health == ChannelHealth::Offline {
        let failure_factor =
            (1.0 / ((failures / 3) as f64 + 2.0)).max(CRISIS_MIN_MULTIPLIER);
        let multiplier = failure_factor * channel.priority.crisis_factor();
        let final_secs = (base_secs as f64 * multiplier).max(CRISIS_FLOOR_SECS);
        (
            Strategy::Crisis,
            multiplier,
            final_secs,
            format!("offline with {} consecutive failures, accelerating", failures),
        )
    } else if failures > 0 {
        let multiplier = (1.0 - 0.1 * failures as f64).max(RECOVERY_MIN_MULTIPLIER);
        let final_secs = (base_secs as f64 * multiplier).max(RECOVERY_FLOOR_SECS);
        (
            Strategy::Recovery,
            multiplier,
            final_secs,
            format!("{} recent failures, probing slightly faster", failures),
        )
    } else {
        (
            Strategy::Stable,
            1.0,
            base_secs.min(STABLE_CAP_SECS) as f64,
            "healthy, base cadence".to_string(),
        )
    };

    IntervalDecision {
        channel_id: channel.id.clone(),
        source,
        base_secs,
        strategy,
        multiplier,
        reason,
        final_secs,
        jitter_pct: channel.jitter_pct.unwrap_or(defaults.jitter_pct),
    }
}

/// Multiply the resolved interval by `1 + U(-jitter%, +jitter%)`
pub fn apply_jitter(decision: &IntervalDecision, rng: &mut impl rand::Rng) -> std::time::Duration {
    let jitter = decision.jitter_pct.clamp(0.0, 100.0);
    let factor = if jitter > 0.0 {
        1.0 + rng.gen_range(-jitter..=jitter) / 100.0
    } else {
        1.0
    };
    std::time::Duration::from_secs_f64((decision.final_secs * factor).max(1.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChannelDefaults;
    use crate::core::probes::{ProbeSpec, SocketProbe};
    use crate::core::types::Priority;
    use crate::core::watch::IndividualWatch;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    fn defaults() -> ChannelDefaults {
        ChannelDefaults {
            interval_secs: 60,
            timeout_ms: 3_000,
            threshold: 3,
            jitter_pct: 0.0,
        }
    }

    fn channel(id: &str) -> ChannelDef {
        ChannelDef {
            id: id.to_string(),
            label: None,
            probe: ProbeSpec::Socket(SocketProbe {
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

    fn state(health: ChannelHealth, failures: u32) -> ChannelStateRecord {
        ChannelStateRecord {
            health,
            consecutive_failures: failures,
            ..Default::default()
        }
    }

    #[test]
    fn precedence_individual_beats_channel_beats_global_beats_default() {
        let mut ch = channel("a");
        ch.interval_secs = Some(45);

        let individual = CadenceView {
            global_watch_active: true,
            individual: Some(IndividualWatch {
                channel_id: "a".into(),
                started_ts: 0,
                ends_ts: None,
                interval_secs: Some(5),
            }),
        };
        let d = resolve(&ch, &state(ChannelHealth::Online, 0), &individual, &defaults(), 10);
        assert_eq!(d.source, IntervalSource::IndividualWatch);
        assert_eq!(d.base_secs, 5);

        let global = CadenceView {
            global_watch_active: true,
            individual: None,
        };
        let d = resolve(&ch, &state(ChannelHealth::Online, 0), &global, &defaults(), 10);
        assert_eq!(d.source, IntervalSource::Channel);
        assert_eq!(d.base_secs, 45);

        ch.interval_secs = None;
        let d = resolve(&ch, &state(ChannelHealth::Online, 0), &global, &defaults(), 10);
        assert_eq!(d.source, IntervalSource::GlobalWatch);
        assert_eq!(d.base_secs, 10);

        let d = resolve(
            &ch,
            &state(ChannelHealth::Online, 0),
            &CadenceView::default(),
            &defaults(),
            10,
        );
        assert_eq!(d.source, IntervalSource::Default);
        assert_eq!(d.base_secs, 60);
    }

    #[test]
    fn individual_watch_without_interval_uses_priority_table() {
        let mut ch = channel("a");
        ch.priority = Priority::Critical;
        let cadence = CadenceView {
            global_watch_active: false,
            individual: Some(IndividualWatch {
                channel_id: "a".into(),
                started_ts: 0,
                ends_ts: None,
                interval_secs: None,
            }),
        };
        let d = resolve(&ch, &state(ChannelHealth::Online, 0), &cadence, &defaults(), 10);
        assert_eq!(d.base_secs, 10);
        assert_eq!(d.strategy, Strategy::Watch);
        assert_eq!(d.multiplier, 1.0);
    }

    #[test]
    fn crisis_accelerates_and_floors_at_ten_seconds() {
        let ch = channel("a");
        // 3 failures: factor = 1/(1+2) = 1/3, medium priority factor 1.0
        let d = resolve(
            &ch,
            &state(ChannelHealth::Offline, 3),
            &CadenceView::default(),
            &defaults(),
            10,
        );
        assert_eq!(d.strategy, Strategy::Crisis);
        assert!((d.multiplier - 1.0 / 3.0).abs() < 1e-9);
        assert!((d.final_secs - 20.0).abs() < 1e-9);

        // Many failures: factor floors at 0.25; 60 * 0.25 = 15 > floor
        let d = resolve(
            &ch,
            &state(ChannelHealth::Offline, 30),
            &CadenceView::default(),
            &defaults(),
            10,
        );
        assert!((d.multiplier - 0.25).abs() < 1e-9);
        assert!((d.final_secs - 15.0).abs() < 1e-9);

        // Critical priority halves again and hits the floor
        let mut critical = channel("a");
        critical.priority = Priority::Critical;
        let d = resolve(
            &critical,
            &state(ChannelHealth::Offline, 30),
            &CadenceView::default(),
            &defaults(),
            10,
        );
        assert!((d.multiplier - 0.125).abs() < 1e-9);
        assert!((d.final_secs - CRISIS_FLOOR_SECS).abs() < 1e-9);
    }

    #[test]
    fn recovery_shortens_gently_with_floor() {
        let ch = channel("a");
        let d = resolve(
            &ch,
            &state(ChannelHealth::Online, 2),
            &CadenceView::default(),
            &defaults(),
            10,
        );
        assert_eq!(d.strategy, Strategy::Recovery);
        assert!((d.multiplier - 0.8).abs() < 1e-9);
        assert!((d.final_secs - 48.0).abs() < 1e-9);

        // Multiplier floors at 0.7 no matter how many failures
        let d = resolve(
            &ch,
            &state(ChannelHealth::Online, 9),
            &CadenceView::default(),
            &defaults(),
            10,
        );
        assert!((d.multiplier - 0.7).abs() < 1e-9);
    }

    #[test]
    fn stable_caps_at_ten_minutes() {
        let mut ch = channel("a");
        ch.interval_secs = Some(3_600);
        let d = resolve(
            &ch,
            &state(ChannelHealth::Online, 0),
            &CadenceView::default(),
            &defaults(),
            10,
        );
        assert_eq!(d.strategy, Strategy::Stable);
        assert!((d.final_secs - 600.0).abs() < 1e-9);
    }

    #[test]
    fn unknown_health_with_failures_uses_recovery() {
        let ch = channel("a");
        let d = resolve(
            &ch,
            &state(ChannelHealth::Unknown, 1),
            &CadenceView::default(),
            &defaults(),
            10,
        );
        assert_eq!(d.strategy, Strategy::Recovery);
    }

    #[test]
    fn jitter_stays_within_band() {
        let ch = channel("a");
        let mut d = resolve(
            &ch,
            &state(ChannelHealth::Online, 0),
            &CadenceView::default(),
            &defaults(),
            10,
        );
        d.jitter_pct = 10.0;
        let mut rng = SmallRng::seed_from_u64(7);
        for _ in 0..200 {
            let secs = apply_jitter(&d, &mut rng).as_secs_f64();
            assert!(secs >= 54.0 - 1e-9 && secs <= 66.0 + 1e-9, "got {}", secs);
        }
    }

    #[test]
    fn zero_jitter_is_exact() {
        let ch = channel("a");
        let d = resolve(
            &ch,
            &state(ChannelHealth::Online, 0),
            &CadenceView::default(),
            &defaults(),
            10,
        );
        let mut rng = SmallRng::seed_from_u64(7);
        assert_eq!(apply_jitter(&d, &mut rng).as_secs_f64(), 60.0);
    }
}
