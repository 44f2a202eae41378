/*!
linkwatch - local-first multi-channel connectivity monitor.

The crate probes a configurable set of endpoints (web, socket, name
resolution, shell task, host task), classifies each channel as online,
offline or unknown, and records samples, outages and watch sessions in
crash-safe JSON files under one per-user storage directory. Multiple
processes sharing that directory elect a single leader which performs all
network I/O; followers mirror its published state.

Entry point for embedders is [`core::monitor::Monitor`]. The bundled CLI
binary is a thin wrapper that loads a TOML workspace document and streams
events to stdout.
*/

pub mod cli;
pub mod config;
pub mod core;

pub use crate::core::monitor::Monitor;
pub use crate::core::types::MonitorError;
