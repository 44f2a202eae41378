//! Typed event fan-out for monitor observers.
//!
//! Each event kind has its own broadcast channel so a slow or dropped
//! subscriber never blocks the producer; lagging receivers simply miss
//! entries. Subscribers are handed their own receiver per call.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::core::types::{ChannelHealth, Outage, Sample};

const EVENT_CAPACITY: usize = 256;

/// A probe outcome attributed to its channel
#[derive(Debug, Clone)]
pub struct SampleEvent {
    pub channel_id: String,
    pub sample: Sample,
}

/// A channel health transition
#[derive(Debug, Clone)]
pub struct StateChangeEvent {
    pub channel_id: String,
    pub from: ChannelHealth,
    pub to: ChannelHealth,
    pub at_ms: u64,
}

/// Outage opened or closed
#[derive(Debug, Clone)]
pub struct OutageEvent {
    pub outage: Outage,
}

/// Why a fishy suggestion fired
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum FishyReason {
    ConsecutiveFailures { count: u32 },
    HighLatency { p95_ms: u64, samples: usize },
    NameResolutionFailures { count: u32 },
}

impl std::fmt::Display for FishyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FishyReason::ConsecutiveFailures { count } => {
                write!(f, ">={} consecutive failures", count)
            }
            FishyReason::HighLatency { p95_ms, samples } => {
                write!(f, "p95 latency {}ms over {} samples", p95_ms, samples)
            }
            FishyReason::NameResolutionFailures { count } => {
                write!(f, "{} name-resolution failures in window", count)
            }
        }
    }
}

/// Heuristic suggestion that a watch session may be warranted
#[derive(Debug, Clone)]
pub struct FishyEvent {
    pub channel_id: String,
    pub reason: FishyReason,
    pub at_ms: u64,
}

/// One broadcast channel per event kind
pub struct EventBus {
    sample: broadcast::Sender<SampleEvent>,
    state_change: broadcast::Sender<StateChangeEvent>,
    outage_start: broadcast::Sender<OutageEvent>,
    outage_end: broadcast::Sender<OutageEvent>,
    fishy: broadcast::Sender<FishyEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            sample: broadcast::channel(EVENT_CAPACITY).0,
            state_change: broadcast::channel(EVENT_CAPACITY).0,
            outage_start: broadcast::channel(EVENT_CAPACITY).0,
            outage_end: broadcast::channel(EVENT_CAPACITY).0,
            fishy: broadcast::channel(EVENT_CAPACITY).0,
        }
    }

    // Emission ignores the no-receivers error: events are advisory.

    pub fn emit_sample(&self, event: SampleEvent) {
        let _ = self.sample.send(event);
    }

    pub fn emit_state_change(&self, event: StateChangeEvent) {
        let _ = self.state_change.send(event);
    }

    pub fn emit_outage_start(&self, event: OutageEvent) {
        let _ = self.outage_start.send(event);
    }

    pub fn emit_outage_end(&self, event: OutageEvent) {
        let _ = self.outage_end.send(event);
    }

    pub fn emit_fishy(&self, event: FishyEvent) {
        let _ = self.fishy.send(event);
    }

    pub fn on_sample(&self) -> broadcast::Receiver<SampleEvent> {
        self.sample.subscribe()
    }

    pub fn on_state_change(&self) -> broadcast::Receiver<StateChangeEvent> {
        self.state_change.subscribe()
    }

    pub fn on_outage_start(&self) -> broadcast::Receiver<OutageEvent> {
        self.outage_start.subscribe()
    }

    pub fn on_outage_end(&self) -> broadcast::Receiver<OutageEvent> {
        self.outage_end.subscribe()
    }

    pub fn on_fishy(&self) -> broadcast::Receiver<FishyEvent> {
        self.fishy.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
