//! Shared test fixtures: scripted HTTP client, channel builders, settings.

use std::collections::VecDeque;
use std::sync::Mutex;

use linkwatch::config::{ChannelDef, ChannelDefaults, HostSettings};
use linkwatch::core::probes::web::{WebClient, WebFailure, WebRequest, WebResponse};
use linkwatch::core::probes::{ProbeSpec, WebExpect, WebProbe};
use linkwatch::core::types::{FailureKind, Priority};

/// Scripted HTTP client: pops planned steps, then repeats the fallback
pub struct ScriptedWeb {
    steps: Mutex<VecDeque<ScriptedStep>>,
    fallback: ScriptedStep,
    /// Milliseconds to stall before answering (for in-flight tests)
    pub delay_ms: u64,
}

#[derive(Clone)]
pub enum ScriptedStep {
    Status(u16),
    Fail(FailureKind),
}

impl ScriptedWeb {
    pub fn new(steps: impl IntoIterator<Item = ScriptedStep>, fallback: ScriptedStep) -> Self {
        Self {
            steps: Mutex::new(steps.into_iter().collect()),
            fallback,
            delay_ms: 0,
        }
    }

    pub fn always_ok() -> Self {
        Self::new(Vec::new(), ScriptedStep::Status(200))
    }
}

#[async_trait::async_trait]
impl WebClient for ScriptedWeb {
    async fn request(&self, _request: WebRequest) -> Result<WebResponse, WebFailure> {
        if self.delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.delay_ms)).await;
        }
        let step = self
            .steps
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        match step {
            ScriptedStep::Status(status) => Ok(WebResponse {
                status,
                latency_ms: 12,
                headers: std::collections::HashMap::new(),
                body: None,
            }),
            ScriptedStep::Fail(kind) => Err(WebFailure {
                kind,
                latency_ms: Some(34),
                message: "scripted failure".to_string(),
            }),
        }
    }
}

pub fn web_channel(id: &str) -> ChannelDef {
    ChannelDef {
        id: id.to_string(),
        label: None,
        probe: ProbeSpec::Web(WebProbe {
            url: format!("https://{}.example/health", id),
            expect: WebExpect::default(),
            auth_reachable: false,
        }),
        interval_secs: Some(30),
        timeout_ms: Some(1_000),
        threshold: Some(3),
        jitter_pct: Some(0.0),
        guards: Vec::new(),
        priority: Priority::Medium,
    }
}

pub fn defaults() -> ChannelDefaults {
    ChannelDefaults {
        interval_secs: 60,
        timeout_ms: 3_000,
        threshold: 3,
        jitter_pct: 0.0,
    }
}

pub fn host_settings(storage: &std::path::Path) -> HostSettings {
    HostSettings {
        storage_dir: Some(storage.to_path_buf()),
        ..HostSettings::default()
    }
}
