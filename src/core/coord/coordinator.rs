//! Multi-process coordination: leader election, heartbeats, shared-state
//! publication and follower mirroring.
//!
//! One process per storage directory holds the `leader.lock` lease and runs
//! probes; everyone else polls the lock and the leader's `shared-state.json`.
//! A lease older than the timeout (three missed heartbeats) authorizes
//! takeover, which reuses the store's temp-and-rename discipline so two
//! stealing followers cannot interleave a partial record.
//!
//! If coordination is disabled by configuration, or the coordination files
//! are unwritable, the process runs as an unconditional leader.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::core::coord::lock::{
    read_record, remove_if_owner, replace_record, try_create_exclusive, LeaderLockRecord,
};
use crate::core::coord::shared::{read_snapshot, write_snapshot, SharedSnapshot};
use crate::core::events::{EventBus, StateChangeEvent};
use crate::core::logging::get_debug_logger;
use crate::core::store::Store;
use crate::core::types::{epoch_ms, MonitorError};

/// Coordination role of this process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Initializing,
    Leader,
    Follower,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Initializing => write!(f, "initializing"),
            Role::Leader => write!(f, "leader"),
            Role::Follower => write!(f, "follower"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    pub enabled: bool,
    pub heartbeat: Duration,
    pub lease_timeout: Duration,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            heartbeat: Duration::from_millis(100),
            lease_timeout: Duration::from_millis(300),
        }
    }
}

pub struct Coordinator {
    settings: CoordinatorSettings,
    instance: String,
    lock_path: PathBuf,
    shared_path: PathBuf,
    store: Arc<Store>,
    events: Arc<EventBus>,
    role_tx: watch::Sender<Role>,
    /// Last revision this leader published
    revision: AtomicU64,
    /// Last revision this follower mirrored
    seen_revision: AtomicU64,
    /// Leader has unpublished state changes
    dirty: AtomicBool,
    /// Coordination degraded to single-leader fallback
    disabled: AtomicBool,
    cancel: CancellationToken,
    run_handle: std::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl Coordinator {
    pub fn new(
        settings: CoordinatorSettings,
        coordination_dir: Option<PathBuf>,
        store: Arc<Store>,
        events: Arc<EventBus>,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        let dir = coordination_dir.unwrap_or_else(|| store.paths().dir().to_path_buf());
        let (role_tx, _) = watch::channel(Role::Initializing);
        Arc::new(Self {
            settings,
            instance: uuid::Uuid::new_v4().to_string(),
            lock_path: dir.join("leader.lock"),
            shared_path: dir.join("shared-state.json"),
            store,
            events,
            role_tx,
            revision: AtomicU64::new(0),
            seen_revision: AtomicU64::new(0),
            dirty: AtomicBool::new(false),
            disabled: AtomicBool::new(false),
            cancel,
            run_handle: std::sync::Mutex::new(None),
        })
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }

    pub fn role(&self) -> Role {
        *self.role_tx.borrow()
    }

    pub fn is_leader(&self) -> bool {
        self.role() == Role::Leader
    }

    pub fn subscribe_role(&self) -> watch::Receiver<Role> {
        self.role_tx.subscribe()
    }

    /// Called when local state changed and a new revision should go out
    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::SeqCst);
    }

    /// Run the initial election, then spawn the heartbeat/poll loop.
    pub async fn start(self: &Arc<Self>) {
        let role = self.elect().await;
        self.set_role(role);
        if role == Role::Leader {
            // First publication seeds followers even before any probe runs.
            if let Err(e) = self.publish_now().await {
                self.degrade(&format!("initial publish failed: {}", e));
            }
        }

        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(this.settings.heartbeat);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = this.cancel.cancelled() => break,
                    _ = ticker.tick() => match this.role() {
                        Role::Leader => this.tick_leader().await,
                        Role::Follower => this.tick_follower().await,
                        Role::Initializing => {}
                    },
                }
            }
        });
        if let Ok(mut slot) = self.run_handle.lock() {
            *slot = Some(handle);
        }
    }

    async fn elect(&self) -> Role {
        if !self.settings.enabled {
            self.disabled.store(true, Ordering::SeqCst);
            return Role::Leader;
        }

        if let Some(parent) = self.lock_path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                self.degrade(&format!("coordination directory unusable: {}", e));
                return Role::Leader;
            }
        }

        let record = LeaderLockRecord::new(&self.instance, epoch_ms());
        match try_create_exclusive(&self.lock_path, &record).await {
            Ok(true) => Role::Leader,
            Ok(false) => match read_record(&self.lock_path).await {
                Some(existing)
                    if existing.is_fresh(epoch_ms(), self.lease_timeout_ms()) =>
                {
                    Role::Follower
                }
                // Stale, absent under race, or corrupt: contend for it.
                _ => self.attempt_takeover().await,
            },
            Err(e) => {
                self.degrade(&format!("cannot write coordination files: {}", e));
                Role::Leader
            }
        }
    }

    /// Replace the lock with our record, then verify ownership. Two
    /// contenders can both attempt this; the rename that lands last wins and
    /// the read-back tells each contender which one it was.
    async fn attempt_takeover(&self) -> Role {
        let record = LeaderLockRecord::new(&self.instance, epoch_ms());
        if let Err(e) = replace_record(&self.lock_path, &record).await {
            self.degrade(&format!("lock takeover failed: {}", e));
            return Role::Leader;
        }
        match read_record(&self.lock_path).await {
            Some(current) if current.instance == self.instance => Role::Leader,
            _ => Role::Follower,
        }
    }

    async fn tick_leader(&self) {
        if self.disabled.load(Ordering::SeqCst) {
            return;
        }

        // Detect lock theft before renewing: a usurper's record means this
        // process was demoted (e.g. it slept past its own lease).
        match read_record(&self.lock_path).await {
            Some(current) if current.instance != self.instance => {
                get_debug_logger().warn(
                    "coord",
                    format!("lock taken by pid {}, demoting to follower", current.pid),
                );
                self.set_role(Role::Follower);
                return;
            }
            _ => {}
        }

        let record = LeaderLockRecord::new(&self.instance, epoch_ms());
        if let Err(e) = replace_record(&self.lock_path, &record).await {
            get_debug_logger().warn("coord", format!("heartbeat write failed: {}", e));
        }

        if self.dirty.swap(false, Ordering::SeqCst) {
            if let Err(e) = self.publish_now().await {
                self.dirty.store(true, Ordering::SeqCst);
                get_debug_logger().warn("coord", format!("shared-state publish failed: {}", e));
            }
        }
    }

    async fn tick_follower(&self) {
        match read_record(&self.lock_path).await {
            Some(existing) if existing.is_fresh(epoch_ms(), self.lease_timeout_ms()) => {
                self.poll_shared_state().await;
            }
            _ => {
                // Lease expired, lock deleted, or record corrupt: take over.
                let role = self.attempt_takeover().await;
                if role == Role::Leader {
                    self.promote().await;
                }
            }
        }
    }

    /// Follower→leader promotion: one synchronous seed read of shared state
    /// before scheduling may begin.
    async fn promote(&self) {
        if let Some(snapshot) = read_snapshot(&self.shared_path).await {
            self.revision.store(snapshot.revision, Ordering::SeqCst);
            self.store.mirror_states(&snapshot).await;
        }
        self.set_role(Role::Leader);
        self.mark_dirty();
    }

    async fn poll_shared_state(&self) {
        let Some(snapshot) = read_snapshot(&self.shared_path).await else {
            return;
        };
        if snapshot.revision <= self.seen_revision.load(Ordering::SeqCst) {
            return;
        }
        self.seen_revision.store(snapshot.revision, Ordering::SeqCst);
        let changes = self.store.mirror_states(&snapshot).await;
        // Followers surface the same observable transitions as the leader.
        for (channel_id, from, to) in changes {
            self.events.emit_state_change(StateChangeEvent {
                channel_id,
                from,
                to,
                at_ms: snapshot.published_ms,
            });
        }
    }

    /// Write the next shared-state revision from the store's current view
    pub async fn publish_now(&self) -> Result<(), MonitorError> {
        if self.disabled.load(Ordering::SeqCst) {
            return Ok(());
        }
        let revision = self.revision.fetch_add(1, Ordering::SeqCst) + 1;
        let snapshot = SharedSnapshot {
            revision,
            published_ms: epoch_ms(),
            leader_pid: std::process::id(),
            leader_instance: self.instance.clone(),
            channels: self.store.channel_peeks().await,
        };
        write_snapshot(&self.shared_path, &snapshot).await
    }

    fn set_role(&self, role: Role) {
        let previous = self.role();
        if previous == role {
            return;
        }
        self.store.set_writable(role == Role::Leader);
        get_debug_logger().debug("coord", format!("role {} -> {}", previous, role));
        let _ = self.role_tx.send(role);
    }

    fn degrade(&self, reason: &str) {
        self.disabled.store(true, Ordering::SeqCst);
        get_debug_logger().warn_once(
            "coord-degraded",
            "coord",
            format!("coordination disabled, continuing as sole leader: {}", reason),
        );
    }

    fn lease_timeout_ms(&self) -> u64 {
        self.settings.lease_timeout.as_millis() as u64
    }

    /// Release leadership on clean shutdown. The caller cancels the
    /// coordination token first; this waits out any in-flight heartbeat so a
    /// late lease refresh cannot resurrect the deleted lock.
    pub async fn shutdown(&self) {
        let handle = self.run_handle.lock().ok().and_then(|mut slot| slot.take());
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        if self.is_leader() && !self.disabled.load(Ordering::SeqCst) {
            remove_if_owner(&self.lock_path, &self.instance).await;
        }
    }
}
