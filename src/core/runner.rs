/*!
Channel runner: owns the per-channel state machine.

One `run` resolves a channel's guards, dispatches its probe, applies the
health transition rules, persists through the store, and fans events out.
At most one probe per channel is in flight per process; each run carries a
cancellation handle so pause, stop, and follower demotion can abort it.
Transitions only ever happen on the leader; paused or follower runs
short-circuit to a synthetic, non-persisted sample.
*/

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::config::{ChannelDef, ChannelDefaults};
use crate::core::coord::Role;
use crate::core::events::{EventBus, OutageEvent, SampleEvent, StateChangeEvent};
use crate::core::guard::GuardEvaluator;
use crate::core::logging::get_debug_logger;
use crate::core::probes::{Dispatcher, ProbeOutcome};
use crate::core::store::Store;
use crate::core::types::{
    epoch_ms, ChannelHealth, FailureKind, MonitorError, Outage, Sample,
};

pub struct ChannelRunner {
    store: Arc<Store>,
    guards: Arc<GuardEvaluator>,
    dispatcher: Arc<Dispatcher>,
    events: Arc<EventBus>,
    defaults: ChannelDefaults,
    role_rx: watch::Receiver<Role>,
    paused: Arc<std::sync::atomic::AtomicBool>,
    shutdown: CancellationToken,
    in_flight: Arc<Mutex<HashMap<String, CancellationToken>>>,
}

/// Removes the in-flight entry when a run finishes on any path
struct InFlightGuard {
    map: Arc<Mutex<HashMap<String, CancellationToken>>>,
    channel_id: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if let Ok(mut map) = self.map.lock() {
            map.remove(&self.channel_id);
        }
    }
}

impl ChannelRunner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<Store>,
        guards: Arc<GuardEvaluator>,
        dispatcher: Arc<Dispatcher>,
        events: Arc<EventBus>,
        defaults: ChannelDefaults,
        role_rx: watch::Receiver<Role>,
        paused: Arc<std::sync::atomic::AtomicBool>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            store,
            guards,
            dispatcher,
            events,
            defaults,
            role_rx,
            paused,
            shutdown,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn is_leader(&self) -> bool {
        *self.role_rx.borrow() == Role::Leader
    }

    fn is_paused(&self) -> bool {
        self.paused.load(std::sync::atomic::Ordering::SeqCst)
    }

    /// Abort every in-flight probe (pause, demotion, shutdown)
    pub fn cancel_all(&self) {
        if let Ok(map) = self.in_flight.lock() {
            for token in map.values() {
                token.cancel();
            }
        }
    }

    /// Execute one probe cycle for the channel and return its sample.
    ///
    /// Rejects with [`MonitorError::ProbeInFlight`] when a run for the same
    /// channel has not finished yet.
    pub async fn run(&self, channel: &ChannelDef) -> Result<Sample, MonitorError> {
        if self.is_paused() {
            return Ok(self.short_circuit(channel, "paused"));
        }
        if !self.is_leader() {
            return Ok(self.short_circuit(channel, "follower"));
        }

        let token = self.shutdown.child_token();
        {
            let mut map = self
                .in_flight
                .lock()
                .map_err(|_| MonitorError::Store("in-flight map poisoned".to_string()))?;
            if map.contains_key(&channel.id) {
                return Err(MonitorError::ProbeInFlight(channel.id.clone()));
            }
            map.insert(channel.id.clone(), token.clone());
        }
        let _guard = InFlightGuard {
            map: Arc::clone(&self.in_flight),
            channel_id: channel.id.clone(),
        };

        if !channel.guards.is_empty() {
            let verdict = self.guards.evaluate(&channel.guards).await;
            if !verdict.all_passed {
                return self.record_guard_failure(channel, verdict.failed_ids()).await;
            }
        }

        let timeout_ms = channel.timeout_ms.unwrap_or(self.defaults.timeout_ms);
        let outcome = self
            .dispatcher
            .dispatch(&channel.probe, timeout_ms, &token)
            .await;

        if outcome.cancelled {
            // Aborted probes are not persisted and never count as failures.
            let sample = Sample {
                timestamp_ms: epoch_ms(),
                ok: false,
                latency_ms: None,
                kind: None,
                error: Some("probe cancelled".to_string()),
                details: None,
            }
            .with_detail("cancelled", true.into());
            self.events.emit_sample(SampleEvent {
                channel_id: channel.id.clone(),
                sample: sample.clone(),
            });
            return Ok(sample);
        }

        let sample = outcome_to_sample(outcome);
        self.apply_transitions(channel, &sample).await?;
        self.store.append_sample(&channel.id, sample.clone()).await?;
        self.events.emit_sample(SampleEvent {
            channel_id: channel.id.clone(),
            sample: sample.clone(),
        });
        Ok(sample)
    }

    /// Paused/follower runs produce a tagged synthetic sample without
    /// touching the dispatcher, the state machine, or the durable store.
    fn short_circuit(&self, channel: &ChannelDef, reason: &str) -> Sample {
        let mut sample = Sample {
            timestamp_ms: epoch_ms(),
            ok: false,
            latency_ms: None,
            kind: None,
            error: Some(format!("skipped: {}", reason)),
            details: None,
        };
        sample = sample.with_detail("short_circuit", reason.into());
        self.events.emit_sample(SampleEvent {
            channel_id: channel.id.clone(),
            sample: sample.clone(),
        });
        sample
    }

    /// Guard failures report `unknown` and never touch the failure counter
    async fn record_guard_failure(
        &self,
        channel: &ChannelDef,
        failed: Vec<&str>,
    ) -> Result<Sample, MonitorError> {
        let now = epoch_ms();
        let sample = Sample::failure(
            now,
            FailureKind::Guard,
            None,
            format!("guards failed: {}", failed.join(", ")),
        )
        .with_detail(
            "guards",
            failed
                .iter()
                .map(|id| serde_json::Value::from(*id))
                .collect::<Vec<_>>()
                .into(),
        );

        let mut record = self.store.get_state(&channel.id).await;
        let previous = record.health;
        if previous != ChannelHealth::Unknown {
            record.health = ChannelHealth::Unknown;
            record.last_transition_ts = Some(now);
        }
        self.store.set_state(&channel.id, record).await?;
        if previous != ChannelHealth::Unknown {
            self.events.emit_state_change(StateChangeEvent {
                channel_id: channel.id.clone(),
                from: previous,
                to: ChannelHealth::Unknown,
                at_ms: now,
            });
        }

        self.store.append_sample(&channel.id, sample.clone()).await?;
        self.events.emit_sample(SampleEvent {
            channel_id: channel.id.clone(),
            sample: sample.clone(),
        });
        Ok(sample)
    }

    async fn apply_transitions(
        &self,
        channel: &ChannelDef,
        sample: &Sample,
    ) -> Result<(), MonitorError> {
        let threshold = channel.threshold.unwrap_or(self.defaults.threshold).max(1);
        let mut record = self.store.get_state(&channel.id).await;
        let previous = record.health;

        if sample.ok {
            // A guard interlude can leave an open outage behind a non-offline
            // health; close by outage presence, not by current health.
            if previous == ChannelHealth::Offline || record.open_outage_id.is_some() {
                if let Some(outage) = self
                    .store
                    .close_outage(&channel.id, sample.timestamp_ms, sample.latency_ms)
                    .await?
                {
                    self.events.emit_outage_end(OutageEvent { outage });
                }
            }
            record.open_outage_id = None;
            record.consecutive_failures = 0;
            record.first_failure_ts = None;
            if previous != ChannelHealth::Online {
                record.health = ChannelHealth::Online;
                record.last_transition_ts = Some(sample.timestamp_ms);
            }
        } else {
            record.consecutive_failures += 1;
            if record.first_failure_ts.is_none() {
                record.first_failure_ts = Some(sample.timestamp_ms);
            }
            if previous != ChannelHealth::Offline && record.consecutive_failures >= threshold {
                record.health = ChannelHealth::Offline;
                record.last_transition_ts = Some(sample.timestamp_ms);
                // At most one open outage per channel: re-entering offline
                // after a guard interlude continues the existing outage.
                if record.open_outage_id.is_none() {
                    let outage = Outage {
                        id: uuid::Uuid::new_v4().to_string(),
                        channel_id: channel.id.clone(),
                        first_failure_ts: record.first_failure_ts.unwrap_or(sample.timestamp_ms),
                        confirmed_ts: sample.timestamp_ms,
                        recovered_ts: None,
                        failure_count: record.consecutive_failures,
                        reason: sample.kind.unwrap_or(FailureKind::Http),
                        final_latency_ms: None,
                    };
                    record.open_outage_id = Some(outage.id.clone());
                    self.store.open_outage(outage.clone()).await?;
                    self.events.emit_outage_start(OutageEvent { outage });
                }
            }
        }

        let current = record.health;
        self.store.set_state(&channel.id, record).await?;
        if previous != current {
            get_debug_logger().debug(
                "runner",
                format!("channel {} {} -> {}", channel.id, previous, current),
            );
            self.events.emit_state_change(StateChangeEvent {
                channel_id: channel.id.clone(),
                from: previous,
                to: current,
                at_ms: sample.timestamp_ms,
            });
        }
        Ok(())
    }
}

fn outcome_to_sample(outcome: ProbeOutcome) -> Sample {
    Sample {
        timestamp_ms: epoch_ms(),
        ok: outcome.ok,
        latency_ms: outcome.latency_ms,
        kind: outcome.kind,
        error: outcome.error,
        details: outcome.details,
    }
}
