/*!
Watch sessions: user-initiated, time-boxed intensified monitoring.

The manager owns the active session lifecycle (start, pause/resume, stop or
expiry, idempotent finalization into history), tracks per-channel individual
watches, accumulates samples into the active session, and evaluates the
fishy heuristics that suggest starting a watch when none is active.

The scheduler never holds a reference to the manager; it pulls cadence
inputs from the shared [`WatchState`] and wakes on the cadence epoch
channel whenever precedence-relevant state changes.
*/

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::{watch as tokio_watch, Mutex};

use crate::core::events::{EventBus, FishyEvent, FishyReason, SampleEvent};
use crate::core::logging::get_debug_logger;
use crate::core::quiet::QuietHours;
use crate::core::store::Store;
use crate::core::types::{
    epoch_ms, FailureKind, MonitorError, Sample, WatchDuration, WatchSession,
};

/// Consecutive failures that trigger a fishy suggestion
const FISHY_FAILURE_STREAK: u32 = 3;
/// Rolling p95 latency threshold
const FISHY_P95_MS: u64 = 1_200;
const FISHY_LATENCY_WINDOW_MS: u64 = 3 * 60 * 1_000;
const FISHY_LATENCY_MIN_SAMPLES: usize = 5;
/// Name-resolution failures in the window that trigger a suggestion
const FISHY_DNS_COUNT: usize = 2;
const FISHY_DNS_WINDOW_MS: u64 = 2 * 60 * 1_000;

/// A per-channel intensified watch descriptor
#[derive(Debug, Clone)]
pub struct IndividualWatch {
    pub channel_id: String,
    pub started_ts: u64,
    /// Absent for unbounded individual watches
    pub ends_ts: Option<u64>,
    /// Explicit cadence; the priority table applies when absent
    pub interval_secs: Option<u64>,
}

/// Cadence-relevant view of watch state for one channel
#[derive(Debug, Clone, Default)]
pub struct CadenceView {
    pub global_watch_active: bool,
    pub individual: Option<IndividualWatch>,
}

/// Shared, pull-only watch state consulted by the scheduler and runner
pub struct WatchState {
    paused: Arc<AtomicBool>,
    global_active: AtomicBool,
    individual: StdMutex<HashMap<String, IndividualWatch>>,
    cadence_tx: tokio_watch::Sender<u64>,
}

impl WatchState {
    pub fn new() -> Self {
        Self {
            paused: Arc::new(AtomicBool::new(false)),
            global_active: AtomicBool::new(false),
            individual: StdMutex::new(HashMap::new()),
            cadence_tx: tokio_watch::channel(0).0,
        }
    }

    /// The pause flag is shared with the runner's short-circuit check
    pub fn paused_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.paused)
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::SeqCst);
    }

    pub fn global_watch_active(&self) -> bool {
        self.global_active.load(Ordering::SeqCst)
    }

    pub fn cadence_view(&self, channel_id: &str) -> CadenceView {
        let now = epoch_ms();
        let individual = self
            .individual
            .lock()
            .ok()
            .and_then(|map| map.get(channel_id).cloned())
            .filter(|w| w.ends_ts.is_none_or(|end| now < end));
        CadenceView {
            global_watch_active: self.global_watch_active(),
            individual,
        }
    }

    /// Wakes every scheduler loop so precedence is re-resolved immediately
    pub fn subscribe_cadence(&self) -> tokio_watch::Receiver<u64> {
        self.cadence_tx.subscribe()
    }

    fn bump_cadence(&self) {
        self.cadence_tx.send_modify(|epoch| *epoch += 1);
    }
}

impl Default for WatchState {
    fn default() -> Self {
        Self::new()
    }
}

pub struct WatchManager {
    store: Arc<Store>,
    events: Arc<EventBus>,
    state: Arc<WatchState>,
    quiet_hours: Option<QuietHours>,
    current: Mutex<Option<WatchSession>>,
    fishy: Mutex<FishyTracker>,
}

impl WatchManager {
    pub fn new(
        store: Arc<Store>,
        events: Arc<EventBus>,
        state: Arc<WatchState>,
        quiet_hours: Option<QuietHours>,
    ) -> Self {
        Self {
            store,
            events,
            state,
            quiet_hours,
            current: Mutex::new(None),
            fishy: Mutex::new(FishyTracker::default()),
        }
    }

    /// Recover the persisted session on startup: a still-active session is
    /// reopened, a finished or expired one is finalized idempotently.
    pub async fn recover(&self) -> Result<(), MonitorError> {
        let Some(session) = self.store.get_current_session().await else {
            return Ok(());
        };
        let mut current = self.current.lock().await;
        if session.ended_ts.is_some() || session.is_expired(epoch_ms()) {
            *current = Some(session);
            self.finalize(&mut current).await?;
        } else {
            self.state.set_paused(session.paused);
            self.state.global_active.store(true, Ordering::SeqCst);
            self.state.bump_cadence();
            *current = Some(session);
        }
        Ok(())
    }

    pub async fn start(&self, duration: WatchDuration) -> Result<WatchSession, MonitorError> {
        let mut current = self.current.lock().await;
        if current.is_some() {
            return Err(MonitorError::WatchActive);
        }
        let session = WatchSession::new(duration, epoch_ms());
        self.store.set_current_session(Some(session.clone())).await?;
        *current = Some(session.clone());
        self.state.global_active.store(true, Ordering::SeqCst);
        self.state.set_paused(false);
        self.state.bump_cadence();
        get_debug_logger().debug("watch", format!("watch {} started", session.id));
        Ok(session)
    }

    /// Stop the active session, if any, and return the finalized record
    pub async fn stop(&self) -> Result<Option<WatchSession>, MonitorError> {
        let mut current = self.current.lock().await;
        self.finalize(&mut current).await
    }

    /// History append happens before the current pointer clears, so a crash
    /// between the two writes leaves either a reopenable current session or
    /// an already-archived one; the id-deduplicated history absorbs replays.
    async fn finalize(
        &self,
        current: &mut Option<WatchSession>,
    ) -> Result<Option<WatchSession>, MonitorError> {
        let Some(mut session) = current.clone() else {
            return Ok(None);
        };
        if session.ended_ts.is_none() {
            session.ended_ts = Some(epoch_ms());
        }
        self.store.append_session_history(session.clone()).await?;
        self.store.set_current_session(None).await?;
        *current = None;
        self.state.global_active.store(false, Ordering::SeqCst);
        self.state.set_paused(false);
        self.state.bump_cadence();
        get_debug_logger().debug("watch", format!("watch {} finalized", session.id));
        Ok(Some(session))
    }

    pub async fn pause(&self) -> Result<(), MonitorError> {
        let mut current = self.current.lock().await;
        if let Some(session) = current.as_mut() {
            session.paused = true;
            self.store.set_current_session(Some(session.clone())).await?;
            self.state.set_paused(true);
            self.state.bump_cadence();
        }
        Ok(())
    }

    pub async fn resume(&self) -> Result<(), MonitorError> {
        let mut current = self.current.lock().await;
        if let Some(session) = current.as_mut() {
            session.paused = false;
            self.store.set_current_session(Some(session.clone())).await?;
            self.state.set_paused(false);
            self.state.bump_cadence();
        }
        Ok(())
    }

    pub async fn current(&self) -> Option<WatchSession> {
        self.current.lock().await.clone()
    }

    pub fn start_individual(
        &self,
        channel_id: &str,
        duration_ms: Option<u64>,
        interval_secs: Option<u64>,
    ) {
        let now = epoch_ms();
        if let Ok(mut map) = self.state.individual.lock() {
            map.insert(
                channel_id.to_string(),
                IndividualWatch {
                    channel_id: channel_id.to_string(),
                    started_ts: now,
                    ends_ts: duration_ms.map(|d| now.saturating_add(d)),
                    interval_secs,
                },
            );
        }
        self.state.bump_cadence();
    }

    pub fn stop_individual(&self, channel_id: &str) {
        if let Ok(mut map) = self.state.individual.lock() {
            map.remove(channel_id);
        }
        self.state.bump_cadence();
    }

    pub fn individual_watches(&self) -> Vec<IndividualWatch> {
        self.state
            .individual
            .lock()
            .map(|map| map.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Observe one emitted sample: accumulate it into the active session, or
    /// evaluate fishy triggers when no watch is running.
    pub async fn on_sample(&self, event: &SampleEvent) -> Result<(), MonitorError> {
        // Synthetic short-circuit and cancelled samples carry no signal.
        if let Some(details) = &event.sample.details {
            if details.contains_key("short_circuit") || details.contains_key("cancelled") {
                return Ok(());
            }
        }

        let now = epoch_ms();
        let mut current = self.current.lock().await;
        if let Some(session) = current.as_mut() {
            if !session.paused {
                session
                    .samples
                    .entry(event.channel_id.clone())
                    .or_default()
                    .push(event.sample.clone());
                self.store.set_current_session(Some(session.clone())).await?;
            }
            if session.is_expired(now) {
                self.finalize(&mut current).await?;
            }
            return Ok(());
        }
        drop(current);

        if self
            .quiet_hours
            .as_ref()
            .is_some_and(|quiet| quiet.contains_now())
        {
            return Ok(());
        }

        let reasons = self
            .fishy
            .lock()
            .await
            .observe(&event.channel_id, &event.sample, now);
        for reason in reasons {
            self.events.emit_fishy(FishyEvent {
                channel_id: event.channel_id.clone(),
                reason,
                at_ms: now,
            });
        }
        Ok(())
    }

    /// Expire a finite session even when no samples arrive
    pub async fn maybe_expire(&self) -> Result<(), MonitorError> {
        let mut current = self.current.lock().await;
        let expired = current
            .as_ref()
            .is_some_and(|session| session.is_expired(epoch_ms()));
        if expired {
            self.finalize(&mut current).await?;
        }
        Ok(())
    }
}

#[derive(Default)]
struct ChannelFishy {
    consecutive_failures: u32,
    streak_latched: bool,
    latencies: VecDeque<(u64, u64)>,
    latency_latched: bool,
    dns_failures: VecDeque<u64>,
    dns_latched: bool,
}

/// Per-channel rolling windows behind the fishy triggers. Each condition
/// latches after emitting so a persisting condition fires exactly once.
#[derive(Default)]
pub struct FishyTracker {
    channels: HashMap<String, ChannelFishy>,
}

impl FishyTracker {
    pub fn observe(&mut self, channel_id: &str, sample: &Sample, now_ms: u64) -> Vec<FishyReason> {
        let entry = self.channels.entry(channel_id.to_string()).or_default();
        let mut reasons = Vec::new();

        // Guard failures report unknown; they are not connectivity signal.
        let counted_failure = !sample.ok && sample.kind != Some(FailureKind::Guard);

        if sample.ok {
            entry.consecutive_failures = 0;
            entry.streak_latched = false;
        } else if counted_failure {
            entry.consecutive_failures += 1;
            if entry.consecutive_failures >= FISHY_FAILURE_STREAK && !entry.streak_latched {
                entry.streak_latched = true;
                reasons.push(FishyReason::ConsecutiveFailures {
                    count: entry.consecutive_failures,
                });
            }
        }

        if let Some(latency) = sample.latency_ms {
            entry.latencies.push_back((sample.timestamp_ms, latency));
        }
        let latency_horizon = now_ms.saturating_sub(FISHY_LATENCY_WINDOW_MS);
        while entry
            .latencies
            .front()
            .is_some_and(|(ts, _)| *ts < latency_horizon)
        {
            entry.latencies.pop_front();
        }
        if entry.latencies.len() >= FISHY_LATENCY_MIN_SAMPLES {
            let p95 = percentile_95(entry.latencies.iter().map(|(_, l)| *l));
            if p95 > FISHY_P95_MS {
                if !entry.latency_latched {
                    entry.latency_latched = true;
                    reasons.push(FishyReason::HighLatency {
                        p95_ms: p95,
                        samples: entry.latencies.len(),
                    });
                }
            } else {
                entry.latency_latched = false;
            }
        } else {
            entry.latency_latched = false;
        }

        if counted_failure && sample.kind == Some(FailureKind::NameResolution) {
            entry.dns_failures.push_back(sample.timestamp_ms);
        }
        let dns_horizon = now_ms.saturating_sub(FISHY_DNS_WINDOW_MS);
        while entry
            .dns_failures
            .front()
            .is_some_and(|ts| *ts < dns_horizon)
        {
            entry.dns_failures.pop_front();
        }
        if entry.dns_failures.len() >= FISHY_DNS_COUNT {
            if !entry.dns_latched {
                entry.dns_latched = true;
                reasons.push(FishyReason::NameResolutionFailures {
                    count: entry.dns_failures.len() as u32,
                });
            }
        } else {
            entry.dns_latched = false;
        }

        reasons
    }
}

/// Nearest-rank p95: rank = max(1, ceil(0.95 * n)), 1-based
fn percentile_95(values: impl Iterator<Item = u64>) -> u64 {
    let mut sorted: Vec<u64> = values.collect();
    if sorted.is_empty() {
        return 0;
    }
    sorted.sort_unstable();
    let n = sorted.len();
    let rank = ((0.95 * n as f64).ceil() as usize).max(1);
    sorted[rank - 1]
}
