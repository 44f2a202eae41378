/*!
Probe variants and their uniform dispatcher.

A probe is a tagged variant with its own payload; the dispatcher accepts
`(spec, timeout, cancellation token)` and returns one `ProbeOutcome` shape
regardless of variant. Latency is measured for successes and for failures
that got far enough to be measured. Cancellation (pause, stop, follower
demotion, shutdown) races every probe's I/O and yields a non-counting
outcome.
*/

pub mod host_task;
pub mod name;
pub mod socket;
pub mod task;
pub mod web;

use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::core::types::FailureKind;

pub use host_task::{HostTaskProbe, HostTaskRunner, HostTaskStarted};
pub use name::{NameProbe, RecordKind};
pub use socket::SocketProbe;
pub use task::{TaskConsent, TaskProbe};
pub use web::{IsahcWebClient, WebClient, WebExpect, WebProbe};

/// Tagged probe definition, as it appears in channel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ProbeSpec {
    Web(WebProbe),
    Socket(SocketProbe),
    Name(NameProbe),
    Task(TaskProbe),
    HostTask(HostTaskProbe),
}

/// Uniform result contract shared by all probe variants
#[derive(Debug, Clone)]
pub struct ProbeOutcome {
    pub ok: bool,
    /// Present on success and on measured failures
    pub latency_ms: Option<u64>,
    pub kind: Option<FailureKind>,
    pub error: Option<String>,
    pub details: Option<serde_json::Map<String, serde_json::Value>>,
    /// Set when the probe was aborted by cancellation rather than finishing
    pub cancelled: bool,
}

impl ProbeOutcome {
    pub fn success(latency_ms: u64) -> Self {
        Self {
            ok: true,
            latency_ms: Some(latency_ms),
            kind: None,
            error: None,
            details: None,
            cancelled: false,
        }
    }

    pub fn failure(kind: FailureKind, latency_ms: Option<u64>, error: impl Into<String>) -> Self {
        Self {
            ok: false,
            latency_ms,
            kind: Some(kind),
            error: Some(error.into()),
            details: None,
            cancelled: false,
        }
    }

    pub fn aborted() -> Self {
        Self {
            ok: false,
            latency_ms: None,
            kind: None,
            error: Some("probe cancelled".to_string()),
            details: None,
            cancelled: true,
        }
    }

    pub fn with_detail(mut self, key: &str, value: serde_json::Value) -> Self {
        self.details
            .get_or_insert_with(serde_json::Map::new)
            .insert(key.to_string(), value);
        self
    }
}

/// Polymorphic probe invocation with timeout and cancellation
pub struct Dispatcher {
    web: Arc<dyn WebClient>,
    user_agent: String,
    consent: Arc<TaskConsent>,
    host_tasks: RwLock<Option<Arc<dyn HostTaskRunner>>>,
}

impl Dispatcher {
    pub fn new(web: Arc<dyn WebClient>, user_agent: String, consent: Arc<TaskConsent>) -> Self {
        Self {
            web,
            user_agent,
            consent,
            host_tasks: RwLock::new(None),
        }
    }

    pub fn consent(&self) -> &Arc<TaskConsent> {
        &self.consent
    }

    /// Install the host-side task executor used by host-task probes
    pub fn register_host_task_runner(&self, runner: Arc<dyn HostTaskRunner>) {
        if let Ok(mut slot) = self.host_tasks.write() {
            *slot = Some(runner);
        }
    }

    pub async fn dispatch(
        &self,
        spec: &ProbeSpec,
        timeout_ms: u64,
        cancel: &CancellationToken,
    ) -> ProbeOutcome {
        let probe = async {
            match spec {
                ProbeSpec::Web(probe) => {
                    web::run(probe, &self.user_agent, timeout_ms, self.web.as_ref()).await
                }
                ProbeSpec::Socket(probe) => socket::run(probe, timeout_ms).await,
                ProbeSpec::Name(probe) => name::run(probe, timeout_ms).await,
                ProbeSpec::Task(probe) => task::run(probe, timeout_ms, &self.consent).await,
                ProbeSpec::HostTask(probe) => {
                    let runner = self.host_tasks.read().ok().and_then(|r| r.clone());
                    host_task::run(probe, runner, timeout_ms, cancel.clone()).await
                }
            }
        };

        // Dropping the in-flight future is the cancellation mechanism: task
        // children are killed on drop, network futures simply stop, and a
        // host task keeps running by contract.
        tokio::select! {
            _ = cancel.cancelled() => ProbeOutcome::aborted(),
            outcome = probe => outcome,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_spec_round_trips_through_tagged_json() {
        let json = r#"{"type":"socket","host":"db.internal","port":5432}"#;
        let spec: ProbeSpec = serde_json::from_str(json).unwrap();
        assert!(matches!(
            &spec,
            ProbeSpec::Socket(SocketProbe { host, port: 5432 }) if host == "db.internal"
        ));

        let json = r#"{"type":"host-task","task_label":"build"}"#;
        let spec: ProbeSpec = serde_json::from_str(json).unwrap();
        assert!(matches!(spec, ProbeSpec::HostTask(_)));
    }
}
