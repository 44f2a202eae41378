/*!
Monitor facade: owns the wiring between store, coordinator, guards, probe
dispatcher, channel runner, scheduler and watch manager, and exposes the
in-process API consumed by UI surfaces and the report generator.

The components form no reference cycles: the scheduler pulls cadence state
from the shared watch view, the watch manager observes runner output through
the event bus, and this facade runs the small pump tasks connecting them.
*/

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::sync::watch as tokio_watch;
use tokio_util::sync::CancellationToken;

use crate::config::{validate_channels, ChannelDef, ChannelDefaults, HostSettings, WorkspaceDoc};
use crate::core::coord::{Coordinator, CoordinatorSettings, Role};
use crate::core::events::{EventBus, FishyEvent, OutageEvent, SampleEvent, StateChangeEvent};
use crate::core::guard::GuardEvaluator;
use crate::core::logging::get_debug_logger;
use crate::core::probes::{Dispatcher, HostTaskRunner, IsahcWebClient, TaskConsent, WebClient};
use crate::core::runner::ChannelRunner;
use crate::core::scheduler::{IntervalDecision, Scheduler};
use crate::core::store::retention::{spawn_retention_sweep, DEFAULT_RETENTION_DAYS};
use crate::core::store::Store;
use crate::core::types::{MonitorError, Sample, WatchDuration, WatchSession};
use crate::core::watch::{IndividualWatch, WatchManager, WatchState};

const EXPIRY_TICK: std::time::Duration = std::time::Duration::from_secs(1);

pub struct Monitor {
    host: HostSettings,
    defaults: ChannelDefaults,
    store: Arc<Store>,
    events: Arc<EventBus>,
    coordinator: Arc<Coordinator>,
    runner: Arc<ChannelRunner>,
    scheduler: Arc<Scheduler>,
    watch: Arc<WatchManager>,
    dispatcher: Arc<Dispatcher>,
    cancel: CancellationToken,
}

impl Monitor {
    /// Build and start the monitor from parsed configuration.
    pub async fn start(host: HostSettings, workspace: WorkspaceDoc) -> Result<Self, MonitorError> {
        let web: Arc<dyn WebClient> = Arc::new(IsahcWebClient::new(host.allow_proxy)?);
        Self::start_with_web_client(host, workspace, web).await
    }

    /// As [`Monitor::start`], with an injected HTTP client (tests)
    pub async fn start_with_web_client(
        host: HostSettings,
        workspace: WorkspaceDoc,
        web: Arc<dyn WebClient>,
    ) -> Result<Self, MonitorError> {
        if !host.enabled {
            return Err(MonitorError::Config(
                "monitoring is disabled in host settings".to_string(),
            ));
        }

        let storage_dir = host.storage_dir.clone().unwrap_or_else(default_storage_dir);
        let store = Arc::new(Store::open(&storage_dir).await?);
        let events = Arc::new(EventBus::new());
        let cancel = CancellationToken::new();

        let coordinator = Coordinator::new(
            CoordinatorSettings {
                enabled: host.coordination_enabled,
                ..CoordinatorSettings::default()
            },
            host.coordination_dir.clone(),
            Arc::clone(&store),
            Arc::clone(&events),
            cancel.clone(),
        );
        coordinator.start().await;

        let consent = Arc::new(TaskConsent::new(host.script_probes_enabled));
        let dispatcher = Arc::new(Dispatcher::new(web, host.user_agent.clone(), consent));
        let guards = Arc::new(GuardEvaluator::new(workspace.guards.clone()));

        let defaults = host.channel_defaults(&workspace.defaults);
        let watch_state = Arc::new(WatchState::new());
        let runner = Arc::new(ChannelRunner::new(
            Arc::clone(&store),
            guards,
            Arc::clone(&dispatcher),
            Arc::clone(&events),
            defaults,
            coordinator.subscribe_role(),
            watch_state.paused_flag(),
            cancel.clone(),
        ));
        let scheduler = Scheduler::new(
            Arc::clone(&runner),
            Arc::clone(&store),
            defaults,
            host.high_cadence_interval_secs,
            Arc::clone(&watch_state),
            coordinator.subscribe_role(),
            cancel.clone(),
        );
        let watch = Arc::new(WatchManager::new(
            Arc::clone(&store),
            Arc::clone(&events),
            Arc::clone(&watch_state),
            host.quiet_hours,
        ));

        // A follower must not finalize or reopen the leader's session.
        if store.is_writable() {
            watch.recover().await?;
        }

        let (channels, _errors) = validate_channels(workspace.channels);
        for channel in channels {
            scheduler.add_channel(channel);
        }

        let monitor = Self {
            host,
            defaults,
            store,
            events,
            coordinator,
            runner,
            scheduler,
            watch,
            dispatcher,
            cancel,
        };
        monitor.spawn_pumps();
        Ok(monitor)
    }

    fn spawn_pumps(&self) {
        self.scheduler.spawn_state_change_listener(&self.events);

        // Samples feed the watch manager and dirty the shared-state revision.
        {
            let mut rx = self.events.on_sample();
            let watch = Arc::clone(&self.watch);
            let coordinator = Arc::clone(&self.coordinator);
            let store = Arc::clone(&self.store);
            let cancel = self.cancel.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        event = rx.recv() => match event {
                            Ok(event) => {
                                if store.is_writable() {
                                    if let Err(e) = watch.on_sample(&event).await {
                                        get_debug_logger()
                                            .warn("watch", format!("sample handling failed: {}", e));
                                    }
                                }
                                coordinator.mark_dirty();
                            }
                            Err(broadcast::error::RecvError::Lagged(_)) => continue,
                            Err(broadcast::error::RecvError::Closed) => break,
                        },
                    }
                }
            });
        }

        // Demotion aborts in-flight probes; any role change re-arms timers.
        {
            let mut role_rx = self.coordinator.subscribe_role();
            let runner = Arc::clone(&self.runner);
            let scheduler = Arc::clone(&self.scheduler);
            let cancel = self.cancel.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        changed = role_rx.changed() => {
                            if changed.is_err() {
                                break;
                            }
                            let role = *role_rx.borrow();
                            if role == Role::Follower {
                                runner.cancel_all();
                            }
                            scheduler.reschedule_all();
                        }
                    }
                }
            });
        }

        // Finite watches expire even when no sample arrives.
        {
            let watch = Arc::clone(&self.watch);
            let store = Arc::clone(&self.store);
            let cancel = self.cancel.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(EXPIRY_TICK) => {
                            if store.is_writable() {
                                if let Err(e) = watch.maybe_expire().await {
                                    get_debug_logger()
                                        .warn("watch", format!("expiry check failed: {}", e));
                                }
                            }
                        }
                    }
                }
            });
        }

        spawn_retention_sweep(
            Arc::clone(&self.store),
            DEFAULT_RETENTION_DAYS,
            self.cancel.clone(),
        );
    }

    // Channel management

    pub fn channels(&self) -> Vec<ChannelDef> {
        self.scheduler.channels()
    }

    pub fn register_channel(&self, channel: ChannelDef) -> Result<(), MonitorError> {
        let (valid, mut errors) = validate_channels(vec![channel]);
        match valid.into_iter().next() {
            Some(channel) => {
                self.scheduler.add_channel(channel);
                Ok(())
            }
            None => Err(MonitorError::Config(
                errors.pop().unwrap_or_else(|| "invalid channel".to_string()),
            )),
        }
    }

    /// Remove a channel from scheduling. Its historical state is retained.
    pub fn deregister_channel(&self, channel_id: &str) {
        self.scheduler.remove_channel(channel_id);
    }

    // On-demand probing

    pub async fn run_channel_now(&self, channel_id: &str) -> Result<Sample, MonitorError> {
        let def = self
            .scheduler
            .channel(channel_id)
            .ok_or_else(|| MonitorError::UnknownChannel(channel_id.to_string()))?;
        let sample = self.runner.run(&def).await?;
        self.scheduler.reschedule(channel_id);
        Ok(sample)
    }

    pub async fn run_all_now(&self) -> Vec<(String, Result<Sample, MonitorError>)> {
        let defs = self.scheduler.channels();
        let runs = defs.iter().map(|def| self.runner.run(def));
        let outcomes = futures::future::join_all(runs).await;
        self.scheduler.reschedule_all();
        defs.into_iter()
            .map(|def| def.id)
            .zip(outcomes)
            .collect()
    }

    // Watch sessions

    /// Start a watch; `None` uses the host's default duration.
    pub async fn start_watch(
        &self,
        duration: Option<WatchDuration>,
    ) -> Result<WatchSession, MonitorError> {
        let duration = match duration {
            Some(duration) => duration,
            None => self.host.watch_default_duration()?,
        };
        self.watch.start(duration).await
    }

    /// Stop the active watch and hand back the finalized session for
    /// external report generation.
    pub async fn stop_watch(&self) -> Result<Option<WatchSession>, MonitorError> {
        self.watch.stop().await
    }

    pub async fn pause_watch(&self) -> Result<(), MonitorError> {
        self.watch.pause().await?;
        self.runner.cancel_all();
        Ok(())
    }

    pub async fn resume_watch(&self) -> Result<(), MonitorError> {
        self.watch.resume().await
    }

    pub async fn current_watch(&self) -> Option<WatchSession> {
        self.watch.current().await
    }

    pub fn start_channel_watch(
        &self,
        channel_id: &str,
        duration_ms: Option<u64>,
        interval_secs: Option<u64>,
    ) {
        self.watch
            .start_individual(channel_id, duration_ms, interval_secs);
    }

    pub fn stop_channel_watch(&self, channel_id: &str) {
        self.watch.stop_individual(channel_id);
    }

    pub fn channel_watches(&self) -> Vec<IndividualWatch> {
        self.watch.individual_watches()
    }

    // Event subscriptions

    pub fn on_sample(&self) -> broadcast::Receiver<SampleEvent> {
        self.events.on_sample()
    }

    pub fn on_state_change(&self) -> broadcast::Receiver<StateChangeEvent> {
        self.events.on_state_change()
    }

    pub fn on_outage_start(&self) -> broadcast::Receiver<OutageEvent> {
        self.events.on_outage_start()
    }

    pub fn on_outage_end(&self) -> broadcast::Receiver<OutageEvent> {
        self.events.on_outage_end()
    }

    pub fn on_fishy(&self) -> broadcast::Receiver<FishyEvent> {
        self.events.on_fishy()
    }

    pub fn on_role_change(&self) -> tokio_watch::Receiver<Role> {
        self.coordinator.subscribe_role()
    }

    // Diagnostics and integration points

    pub async fn explain_interval(
        &self,
        channel_id: &str,
    ) -> Result<IntervalDecision, MonitorError> {
        self.scheduler.explain(channel_id).await
    }

    pub fn role(&self) -> Role {
        self.coordinator.role()
    }

    pub fn defaults(&self) -> ChannelDefaults {
        self.defaults
    }

    /// Read API for the external report generator and UI surfaces
    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// One-time consent for shell task probes (host shows the prompt)
    pub fn grant_task_consent(&self) {
        self.dispatcher.consent().grant();
    }

    pub fn register_host_task_runner(&self, runner: Arc<dyn HostTaskRunner>) {
        self.dispatcher.register_host_task_runner(runner);
    }

    /// Clean shutdown: abort in-flight probes, leave the current session
    /// persisted as still-active, release leadership.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.runner.cancel_all();
        self.coordinator.shutdown().await;
    }
}

fn default_storage_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".linkwatch")
}
