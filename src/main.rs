use std::path::{Path, PathBuf};

use clap::Parser;

use linkwatch::cli::{Cli, Command};
use linkwatch::config::{parse_watch_duration, validate_channels, HostSettings, WorkspaceDoc};
use linkwatch::Monitor;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let result = match cli.command {
        Command::Run {
            config,
            storage,
            watch,
            allow_task_probes,
        } => cmd_run(&config, storage, watch, allow_task_probes).await,
        Command::Check { config } => cmd_check(&config),
        Command::Explain {
            channel,
            config,
            storage,
        } => cmd_explain(&channel, &config, storage).await,
    };

    if let Err(message) = result {
        eprintln!("linkwatch: {}", message);
        std::process::exit(1);
    }
}

fn load_workspace(path: &Path) -> Result<WorkspaceDoc, String> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
    toml::from_str(&text).map_err(|e| format!("cannot parse {}: {}", path.display(), e))
}

async fn cmd_run(
    config: &Path,
    storage: Option<PathBuf>,
    watch: Option<String>,
    allow_task_probes: bool,
) -> Result<(), String> {
    let workspace = load_workspace(config)?;
    let host = HostSettings {
        storage_dir: storage,
        script_probes_enabled: allow_task_probes,
        ..HostSettings::default()
    };

    let monitor = Monitor::start(host, workspace)
        .await
        .map_err(|e| e.to_string())?;
    if allow_task_probes {
        monitor.grant_task_consent();
    }

    if let Some(duration) = watch {
        let duration = parse_watch_duration(&duration).map_err(|e| e.to_string())?;
        monitor
            .start_watch(Some(duration))
            .await
            .map_err(|e| e.to_string())?;
    }

    println!(
        "monitoring {} channels as {} (ctrl-c to stop)",
        monitor.channels().len(),
        monitor.role()
    );

    let mut samples = monitor.on_sample();
    let mut state_changes = monitor.on_state_change();
    let mut outage_starts = monitor.on_outage_start();
    let mut outage_ends = monitor.on_outage_end();
    let mut fishy = monitor.on_fishy();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = samples.recv() => {
                if let Ok(event) = event {
                    let latency = event
                        .sample
                        .latency_ms
                        .map(|ms| format!("{}ms", ms))
                        .unwrap_or_else(|| "-".to_string());
                    let status = if event.sample.ok {
                        "ok".to_string()
                    } else {
                        event
                            .sample
                            .kind
                            .map(|k| k.to_string())
                            .unwrap_or_else(|| "skipped".to_string())
                    };
                    println!("sample       {:<20} {:<16} {}", event.channel_id, status, latency);
                }
            }
            event = state_changes.recv() => {
                if let Ok(event) = event {
                    println!(
                        "state-change {:<20} {} -> {}",
                        event.channel_id, event.from, event.to
                    );
                }
            }
            event = outage_starts.recv() => {
                if let Ok(event) = event {
                    println!(
                        "outage-start {:<20} reason={}",
                        event.outage.channel_id, event.outage.reason
                    );
                }
            }
            event = outage_ends.recv() => {
                if let Ok(event) = event {
                    println!(
                        "outage-end   {:<20} duration={}ms",
                        event.outage.channel_id,
                        event.outage.duration_ms(linkwatch::core::types::epoch_ms())
                    );
                }
            }
            event = fishy.recv() => {
                if let Ok(event) = event {
                    println!("fishy        {:<20} {}", event.channel_id, event.reason);
                }
            }
        }
    }

    println!("shutting down");
    monitor.shutdown().await;
    Ok(())
}

fn cmd_check(config: &Path) -> Result<(), String> {
    let workspace = load_workspace(config)?;
    let guard_count = workspace.guards.len();
    let (channels, errors) = validate_channels(workspace.channels);

    for channel in &channels {
        println!("channel {:<20} priority={:?}", channel.id, channel.priority);
    }
    println!("{} channels valid, {} guards defined", channels.len(), guard_count);

    if errors.is_empty() {
        Ok(())
    } else {
        for error in &errors {
            eprintln!("invalid: {}", error);
        }
        Err(format!("{} channel(s) rejected", errors.len()))
    }
}

async fn cmd_explain(
    channel: &str,
    config: &Path,
    storage: Option<PathBuf>,
) -> Result<(), String> {
    let workspace = load_workspace(config)?;
    // With coordination on, a concurrently running monitor keeps leadership
    // and this diagnostic process reads as a follower.
    let host = HostSettings {
        storage_dir: storage,
        ..HostSettings::default()
    };

    let monitor = Monitor::start(host, workspace)
        .await
        .map_err(|e| e.to_string())?;
    let decision = monitor
        .explain_interval(channel)
        .await
        .map_err(|e| e.to_string())?;
    monitor.shutdown().await;

    println!("channel:    {}", decision.channel_id);
    println!("source:     {}", decision.source.as_str());
    println!("base:       {}s", decision.base_secs);
    println!("strategy:   {}", decision.strategy.as_str());
    println!("multiplier: {:.3}", decision.multiplier);
    println!("reason:     {}", decision.reason);
    println!("final:      {:.1}s (±{}% jitter)", decision.final_secs, decision.jitter_pct);
    Ok(())
}
