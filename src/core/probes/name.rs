// Name-resolution probe

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::core::probes::ProbeOutcome;
use crate::core::types::FailureKind;

/// Record families the resolver result is filtered by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    A,
    Aaaa,
    #[default]
    Any,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NameProbe {
    pub hostname: String,
    #[serde(default)]
    pub record: RecordKind,
}

pub async fn run(probe: &NameProbe, timeout_ms: u64) -> ProbeOutcome {
    let start = Instant::now();
    let lookup = tokio::net::lookup_host((probe.hostname.as_str(), 0u16));

    match tokio::time::timeout(Duration::from_millis(timeout_ms), lookup).await {
        Ok(Ok(addrs)) => {
            let latency_ms = start.elapsed().as_millis() as u64;
            let matching = addrs
                .filter(|addr| match probe.record {
                    RecordKind::A => addr.is_ipv4(),
                    RecordKind::Aaaa => addr.is_ipv6(),
                    RecordKind::Any => true,
                })
                .count();
            if matching > 0 {
                ProbeOutcome::success(latency_ms).with_detail("records", matching.into())
            } else {
                ProbeOutcome::failure(
                    FailureKind::NameResolution,
                    Some(latency_ms),
                    format!("{} returned no {:?} records", probe.hostname, probe.record),
                )
            }
        }
        Ok(Err(e)) => ProbeOutcome::failure(
            FailureKind::NameResolution,
            Some(start.elapsed().as_millis() as u64),
            format!("{} did not resolve: {}", probe.hostname, e),
        ),
        Err(_) => ProbeOutcome::failure(
            FailureKind::Timeout,
            Some(timeout_ms),
            format!("resolving {} timed out", probe.hostname),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn localhost_resolves() {
        let probe = NameProbe {
            hostname: "localhost".to_string(),
            record: RecordKind::Any,
        };
        let outcome = run(&probe, 2_000).await;
        assert!(outcome.ok);
    }

    #[tokio::test]
    async fn unresolvable_name_is_classified() {
        let probe = NameProbe {
            hostname: "does-not-exist.invalid".to_string(),
            record: RecordKind::Any,
        };
        let outcome = run(&probe, 5_000).await;
        assert!(!outcome.ok);
        assert!(matches!(
            outcome.kind,
            Some(FailureKind::NameResolution) | Some(FailureKind::Timeout)
        ));
    }
}
