// Command-line interface definitions

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "linkwatch",
    version,
    about = "Local-first multi-channel connectivity monitor"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the monitor and stream events to stdout
    Run {
        /// Workspace document (TOML)
        #[arg(long, short)]
        config: PathBuf,
        /// Storage directory override
        #[arg(long)]
        storage: Option<PathBuf>,
        /// Start a watch immediately: "1h", "12h", "forever", or milliseconds
        #[arg(long)]
        watch: Option<String>,
        /// Enable shell task probes (stands in for the host consent prompt)
        #[arg(long)]
        allow_task_probes: bool,
    },
    /// Validate a workspace document and list its channels
    Check {
        #[arg(long, short)]
        config: PathBuf,
    },
    /// Explain how a channel's probe interval is derived
    Explain {
        channel: String,
        #[arg(long, short)]
        config: PathBuf,
        #[arg(long)]
        storage: Option<PathBuf>,
    },
}
