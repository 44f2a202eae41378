//! Shell task probe, gated behind explicit user consent.
//!
//! Arbitrary command execution is the one probe variant that can touch more
//! than the network, so it stays inert until the host surfaces a consent
//! prompt and calls [`TaskConsent::grant`]. The `script_probes_enabled` host
//! setting is the hard off-switch; consent granted at runtime lasts for the
//! process lifetime.

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::core::probes::ProbeOutcome;
use crate::core::types::FailureKind;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskProbe {
    pub command: String,
    /// Interpreter override; platform default when absent
    #[serde(default)]
    pub shell: Option<String>,
}

pub struct TaskConsent {
    enabled: bool,
    granted: AtomicBool,
}

impl TaskConsent {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            granted: AtomicBool::new(false),
        }
    }

    pub fn grant(&self) {
        self.granted.store(true, Ordering::SeqCst);
    }

    pub fn is_granted(&self) -> bool {
        self.enabled && self.granted.load(Ordering::SeqCst)
    }
}

fn shell_invocation(shell: Option<&str>) -> (String, &'static str) {
    match shell {
        Some(name) if name.ends_with("powershell") || name.ends_with("pwsh") => {
            (name.to_string(), "-Command")
        }
        Some(name) => (name.to_string(), "-c"),
        None if cfg!(windows) => ("cmd".to_string(), "/C"),
        None => ("sh".to_string(), "-c"),
    }
}

pub async fn run(probe: &TaskProbe, timeout_ms: u64, consent: &TaskConsent) -> ProbeOutcome {
    if !consent.is_granted() {
        return ProbeOutcome::failure(
            FailureKind::Task,
            None,
            "task probes are disabled or not yet consented to",
        );
    }

    let (shell, flag) = shell_invocation(probe.shell.as_deref());
    let start = Instant::now();

    let child = tokio::process::Command::new(&shell)
        .arg(flag)
        .arg(&probe.command)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn();

    let mut child = match child {
        Ok(child) => child,
        Err(e) => {
            return ProbeOutcome::failure(
                FailureKind::Task,
                None,
                format!("failed to spawn {}: {}", shell, e),
            )
        }
    };

    match tokio::time::timeout(Duration::from_millis(timeout_ms), child.wait()).await {
        Ok(Ok(status)) => {
            let latency_ms = start.elapsed().as_millis() as u64;
            if status.success() {
                ProbeOutcome::success(latency_ms)
            } else {
                ProbeOutcome::failure(
                    FailureKind::Task,
                    Some(latency_ms),
                    match status.code() {
                        Some(code) => format!("command exited with code {}", code),
                        None => "command terminated by signal".to_string(),
                    },
                )
            }
        }
        Ok(Err(e)) => ProbeOutcome::failure(
            FailureKind::Task,
            Some(start.elapsed().as_millis() as u64),
            format!("wait failed: {}", e),
        ),
        Err(_) => {
            let _ = child.start_kill();
            ProbeOutcome::failure(
                FailureKind::Timeout,
                Some(timeout_ms),
                format!("command timed out after {}ms", timeout_ms),
            )
        }
    }
}
