//! Host-task probe: delegates execution to a runner the embedding host
//! registers, mapping exit code 0 to success.
//!
//! The probe observes three lifecycle points: dispatch (start), the moment
//! the host reports the underlying process running (process-start, signalled
//! through [`HostTaskStarted`]), and completion or abandonment
//! (process-end). There is no portable way to terminate a task the host has
//! already accepted; on timeout the probe stops waiting and reports
//! `timeout` while the task keeps running. The runner receives the
//! cancellation token and may honor it if the host supports cancellation.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::core::logging::get_debug_logger;
use crate::core::probes::ProbeOutcome;
use crate::core::types::FailureKind;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostTaskProbe {
    pub task_label: String,
}

/// One-shot handle the runner fires once the underlying process is running.
/// Dropping it unfired is allowed; the probe then records no process-start.
pub struct HostTaskStarted(oneshot::Sender<()>);

impl HostTaskStarted {
    pub fn notify(self) {
        let _ = self.0.send(());
    }
}

/// Executor contract implemented by the embedding host
#[async_trait::async_trait]
pub trait HostTaskRunner: Send + Sync {
    /// Run the named task to completion and return its exit code, firing
    /// `started` when the task's process actually begins
    async fn run(
        &self,
        task_label: &str,
        started: HostTaskStarted,
        cancel: CancellationToken,
    ) -> Result<i32, String>;
}

pub async fn run(
    probe: &HostTaskProbe,
    runner: Option<Arc<dyn HostTaskRunner>>,
    timeout_ms: u64,
    cancel: CancellationToken,
) -> ProbeOutcome {
    let Some(runner) = runner else {
        return ProbeOutcome::failure(
            FailureKind::Task,
            None,
            "no host task runner registered",
        );
    };

    let logger = get_debug_logger();
    logger.debug("host-task", format!("start: dispatching task {:?}", probe.task_label));

    let (started_tx, started_rx) = oneshot::channel();
    {
        let label = probe.task_label.clone();
        tokio::spawn(async move {
            if started_rx.await.is_ok() {
                get_debug_logger()
                    .debug("host-task", format!("process-start: task {:?} running", label));
            }
        });
    }

    let start = Instant::now();
    let execution = runner.run(&probe.task_label, HostTaskStarted(started_tx), cancel);

    match tokio::time::timeout(Duration::from_millis(timeout_ms), execution).await {
        Ok(Ok(0)) => {
            let latency_ms = start.elapsed().as_millis() as u64;
            logger.debug(
                "host-task",
                format!(
                    "process-end: task {:?} exited 0 after {}ms",
                    probe.task_label, latency_ms
                ),
            );
            ProbeOutcome::success(latency_ms)
        }
        Ok(Ok(code)) => {
            logger.debug(
                "host-task",
                format!("process-end: task {:?} exited {}", probe.task_label, code),
            );
            ProbeOutcome::failure(
                FailureKind::Task,
                Some(start.elapsed().as_millis() as u64),
                format!("task {:?} exited with code {}", probe.task_label, code),
            )
        }
        Ok(Err(message)) => {
            logger.debug(
                "host-task",
                format!("process-end: task {:?} failed: {}", probe.task_label, message),
            );
            ProbeOutcome::failure(
                FailureKind::Task,
                Some(start.elapsed().as_millis() as u64),
                format!("task {:?} failed: {}", probe.task_label, message),
            )
        }
        Err(_) => {
            // The task may still be running; the host owns its lifecycle.
            logger.debug(
                "host-task",
                format!(
                    "process-end: stopped waiting for task {:?} after {}ms",
                    probe.task_label, timeout_ms
                ),
            );
            ProbeOutcome::failure(
                FailureKind::Timeout,
                Some(timeout_ms),
                format!("task {:?} timed out", probe.task_label),
            )
        }
    }
}
