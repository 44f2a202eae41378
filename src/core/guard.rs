//! Precondition guards evaluated before a probe is dispatched.
//!
//! A failed guard means the channel's environment is not in a state where a
//! probe result would mean anything (VPN down, resolver unreachable), so the
//! runner reports `unknown` instead of counting a failure.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Guard variants, keyed by identifier in the workspace document
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum GuardSpec {
    /// Passes iff a network interface with this name exists and is active
    InterfaceUp { interface: String },
    /// Passes iff the hostname resolves within the timeout
    NameResolvable {
        hostname: String,
        #[serde(default = "default_resolve_timeout_ms")]
        timeout_ms: u64,
    },
}

fn default_resolve_timeout_ms() -> u64 {
    2_000
}

/// Result of a single guard check
#[derive(Debug, Clone)]
pub struct GuardOutcome {
    pub passed: bool,
    pub error: Option<String>,
    pub details: serde_json::Map<String, serde_json::Value>,
}

impl GuardOutcome {
    fn pass(details: serde_json::Map<String, serde_json::Value>) -> Self {
        Self {
            passed: true,
            error: None,
            details,
        }
    }

    fn fail(error: impl Into<String>) -> Self {
        Self {
            passed: false,
            error: Some(error.into()),
            details: serde_json::Map::new(),
        }
    }
}

/// Aggregate verdict over a channel's guard list
#[derive(Debug, Clone)]
pub struct GuardVerdict {
    pub all_passed: bool,
    pub results: BTreeMap<String, GuardOutcome>,
}

impl GuardVerdict {
    /// Identifiers of the guards that failed, for sample details
    pub fn failed_ids(&self) -> Vec<&str> {
        self.results
            .iter()
            .filter(|(_, outcome)| !outcome.passed)
            .map(|(id, _)| id.as_str())
            .collect()
    }
}

/// Stateless evaluator over the configured guard map. Results are never
/// cached; each probe cycle sees the live environment.
pub struct GuardEvaluator {
    guards: HashMap<String, GuardSpec>,
}

impl GuardEvaluator {
    pub fn new(guards: impl IntoIterator<Item = (String, GuardSpec)>) -> Self {
        Self {
            guards: guards.into_iter().collect(),
        }
    }

    pub async fn evaluate(&self, guard_ids: &[String]) -> GuardVerdict {
        let mut results = BTreeMap::new();
        for id in guard_ids {
            let outcome = match self.guards.get(id) {
                Some(spec) => evaluate_one(spec).await,
                None => GuardOutcome::fail(format!("guard {:?} is not defined", id)),
            };
            results.insert(id.clone(), outcome);
        }
        GuardVerdict {
            all_passed: results.values().all(|o| o.passed),
            results,
        }
    }
}

async fn evaluate_one(spec: &GuardSpec) -> GuardOutcome {
    match spec {
        GuardSpec::InterfaceUp { interface } => check_interface_up(interface).await,
        GuardSpec::NameResolvable {
            hostname,
            timeout_ms,
        } => check_resolvable(hostname, *timeout_ms).await,
    }
}

async fn check_interface_up(interface: &str) -> GuardOutcome {
    #[cfg(target_os = "linux")]
    {
        // operstate is authoritative when available; "unknown" covers
        // interfaces (loopback, some tunnels) that never report "up".
        let operstate_path = format!("/sys/class/net/{}/operstate", interface);
        if let Ok(state) = tokio::fs::read_to_string(&operstate_path).await {
            let state = state.trim().to_string();
            let up = state == "up" || state == "unknown";
            let mut details = serde_json::Map::new();
            details.insert("operstate".into(), state.into());
            return if up {
                GuardOutcome::pass(details)
            } else {
                GuardOutcome::fail(format!("interface {} is not up", interface))
            };
        }
    }

    let name = interface.to_string();
    let found = tokio::task::spawn_blocking(move || {
        sysinfo::Networks::new_with_refreshed_list()
            .iter()
            .any(|(ifname, _)| ifname == &name)
    })
    .await
    .unwrap_or(false);

    if found {
        GuardOutcome::pass(serde_json::Map::new())
    } else {
        GuardOutcome::fail(format!("interface {} not present", interface))
    }
}

async fn check_resolvable(hostname: &str, timeout_ms: u64) -> GuardOutcome {
    let lookup = tokio::net::lookup_host((hostname, 0u16));
    match tokio::time::timeout(Duration::from_millis(timeout_ms), lookup).await {
        Ok(Ok(mut addrs)) => {
            if addrs.next().is_some() {
                GuardOutcome::pass(serde_json::Map::new())
            } else {
                GuardOutcome::fail(format!("{} resolved to no addresses", hostname))
            }
        }
        Ok(Err(e)) => GuardOutcome::fail(format!("{} did not resolve: {}", hostname, e)),
        Err(_) => GuardOutcome::fail(format!(
            "resolving {} timed out after {}ms",
            hostname, timeout_ms
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_guard_id_fails_closed() {
        let evaluator = GuardEvaluator::new(Vec::new());
        let verdict = evaluator.evaluate(&["vpn".to_string()]).await;
        assert!(!verdict.all_passed);
        assert_eq!(verdict.failed_ids(), vec!["vpn"]);
    }

    #[tokio::test]
    async fn empty_guard_list_passes() {
        let evaluator = GuardEvaluator::new(Vec::new());
        let verdict = evaluator.evaluate(&[]).await;
        assert!(verdict.all_passed);
    }

    #[tokio::test]
    async fn missing_interface_fails() {
        let evaluator = GuardEvaluator::new(vec![(
            "vpn".to_string(),
            GuardSpec::InterfaceUp {
                interface: "wg0-definitely-absent".to_string(),
            },
        )]);
        let verdict = evaluator.evaluate(&["vpn".to_string()]).await;
        assert!(!verdict.all_passed);
    }

    #[test]
    fn guard_spec_deserializes_kebab_case() {
        let spec: GuardSpec =
            serde_json::from_str(r#"{"type":"interface-up","interface":"wg0"}"#).unwrap();
        assert_eq!(
            spec,
            GuardSpec::InterfaceUp {
                interface: "wg0".to_string()
            }
        );
        let spec: GuardSpec =
            serde_json::from_str(r#"{"type":"name-resolvable","hostname":"example.com"}"#)
                .unwrap();
        assert!(matches!(spec, GuardSpec::NameResolvable { timeout_ms: 2_000, .. }));
    }
}
