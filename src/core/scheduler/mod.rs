/*!
Per-channel timers: resolve the next interval, sleep, dispatch to the
runner, repeat.

Each channel gets its own loop task. The sleep races against the channel's
reschedule notifier (fired on state changes so a fresh transition gets the
new cadence immediately), the shared cadence epoch (fired by the session
manager when watch precedence changes), and shutdown. Runner errors are
logged and never tear the loop down; the timer is always re-armed.
*/

pub mod intervals;

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use rand::rngs::SmallRng;
use rand::SeedableRng;
use tokio::sync::{watch, Notify};
use tokio_util::sync::CancellationToken;

use crate::config::{ChannelDef, ChannelDefaults};
use crate::core::coord::Role;
use crate::core::events::EventBus;
use crate::core::logging::get_debug_logger;
use crate::core::runner::ChannelRunner;
use crate::core::store::Store;
use crate::core::types::MonitorError;
use crate::core::watch::WatchState;

pub use intervals::{IntervalDecision, IntervalSource, Strategy};

struct ChannelEntry {
    def: ChannelDef,
    resched: Arc<Notify>,
    cancel: CancellationToken,
}

pub struct Scheduler {
    runner: Arc<ChannelRunner>,
    store: Arc<Store>,
    defaults: ChannelDefaults,
    high_cadence_secs: u64,
    watch_state: Arc<WatchState>,
    role_rx: watch::Receiver<Role>,
    channels: StdMutex<HashMap<String, ChannelEntry>>,
    cancel: CancellationToken,
}

impl Scheduler {
    pub fn new(
        runner: Arc<ChannelRunner>,
        store: Arc<Store>,
        defaults: ChannelDefaults,
        high_cadence_secs: u64,
        watch_state: Arc<WatchState>,
        role_rx: watch::Receiver<Role>,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self {
            runner,
            store,
            defaults,
            high_cadence_secs,
            watch_state,
            role_rx,
            channels: StdMutex::new(HashMap::new()),
            cancel,
        })
    }

    /// Register a channel and arm its timer loop
    pub fn add_channel(self: &Arc<Self>, def: ChannelDef) {
        let resched = Arc::new(Notify::new());
        let cancel = self.cancel.child_token();
        let entry = ChannelEntry {
            def: def.clone(),
            resched: Arc::clone(&resched),
            cancel: cancel.clone(),
        };
        {
            let Ok(mut channels) = self.channels.lock() else {
                return;
            };
            if let Some(previous) = channels.insert(def.id.clone(), entry) {
                previous.cancel.cancel();
            }
        }

        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.channel_loop(def, resched, cancel).await;
        });
    }

    /// Deregister a channel; its historical state stays in the store
    pub fn remove_channel(&self, channel_id: &str) {
        if let Ok(mut channels) = self.channels.lock() {
            if let Some(entry) = channels.remove(channel_id) {
                entry.cancel.cancel();
            }
        }
    }

    pub fn channels(&self) -> Vec<ChannelDef> {
        self.channels
            .lock()
            .map(|map| map.values().map(|e| e.def.clone()).collect())
            .unwrap_or_default()
    }

    pub fn channel(&self, channel_id: &str) -> Option<ChannelDef> {
        self.channels
            .lock()
            .ok()
            .and_then(|map| map.get(channel_id).map(|e| e.def.clone()))
    }

    /// Recompute the channel's timer immediately
    pub fn reschedule(&self, channel_id: &str) {
        if let Ok(channels) = self.channels.lock() {
            if let Some(entry) = channels.get(channel_id) {
                entry.resched.notify_one();
            }
        }
    }

    pub fn reschedule_all(&self) {
        if let Ok(channels) = self.channels.lock() {
            for entry in channels.values() {
                entry.resched.notify_one();
            }
        }
    }

    /// Diagnostic record of how the channel's current interval was derived
    pub async fn explain(&self, channel_id: &str) -> Result<IntervalDecision, MonitorError> {
        let def = self
            .channel(channel_id)
            .ok_or_else(|| MonitorError::UnknownChannel(channel_id.to_string()))?;
        let state = self.store.get_state(channel_id).await;
        let cadence = self.watch_state.cadence_view(channel_id);
        Ok(intervals::resolve(
            &def,
            &state,
            &cadence,
            &self.defaults,
            self.high_cadence_secs,
        ))
    }

    /// State changes re-resolve the affected channel's cadence immediately
    pub fn spawn_state_change_listener(
        self: &Arc<Self>,
        events: &EventBus,
    ) -> tokio::task::JoinHandle<()> {
        let mut rx = events.on_state_change();
        let this = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = this.cancel.cancelled() => break,
                    event = rx.recv() => match event {
                        Ok(event) => this.reschedule(&event.channel_id),
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {
                            this.reschedule_all();
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
        })
    }

    async fn channel_loop(
        self: Arc<Self>,
        def: ChannelDef,
        resched: Arc<Notify>,
        cancel: CancellationToken,
    ) {
        let mut rng = SmallRng::from_entropy();
        let mut cadence_rx = self.watch_state.subscribe_cadence();

        loop {
            let state = self.store.get_state(&def.id).await;
            let cadence = self.watch_state.cadence_view(&def.id);
            let decision =
                intervals::resolve(&def, &state, &cadence, &self.defaults, self.high_cadence_secs);
            let delay = intervals::apply_jitter(&decision, &mut rng);

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = resched.notified() => continue,
                _ = cadence_rx.changed() => continue,
                _ = tokio::time::sleep(delay) => {}
            }

            // Paused or not leading: skip this fire and re-arm. On-demand
            // runs in those states still short-circuit inside the runner.
            if self.watch_state.is_paused() || *self.role_rx.borrow() != Role::Leader {
                continue;
            }

            match self.runner.run(&def).await {
                Ok(_) => {}
                Err(MonitorError::ProbeInFlight(_)) => {}
                Err(e) => {
                    get_debug_logger()
                        .warn("scheduler", format!("run of {} failed: {}", def.id, e));
                }
            }
        }
    }
}
