use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use flowguard::capture::CaptureMethod;
use flowguard::config::Config;
use flowguard::Sensor;

#[derive(Parser)]
#[command(name = "flowguard")]
#[command(author, version, about = "real-time network intrusion detection sensor")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Capture live traffic and classify it
    Run {
        /// Interface to capture on (default: first usable device)
        #[arg(short, long)]
        interface: Option<String>,

        /// Mirror the snapshot to this JSON file
        #[arg(short, long)]
        snapshot: Option<PathBuf>,
    },

    /// Replay a pcap file through the full pipeline
    Replay {
        /// Pcap file to replay
        file: PathBuf,

        /// Mirror the snapshot to this JSON file
        #[arg(short, long)]
        snapshot: Option<PathBuf>,
    },

    /// Print the effective configuration as TOML
    PrintConfig,
}

pub async fn run_command(cli: Cli) -> Result<()> {
    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load_or_default()?,
    };

    match cli.command {
        Commands::Run {
            interface,
            snapshot,
        } => {
            config.capture.method = CaptureMethod::Live;
            if interface.is_some() {
                config.capture.interface = interface;
            }
            if snapshot.is_some() {
                config.general.snapshot_file = snapshot;
            }
            Sensor::new(config).run().await
        }

        Commands::Replay { file, snapshot } => {
            config.capture.method = CaptureMethod::File;
            config.capture.pcap_file = Some(file.display().to_string());
            if snapshot.is_some() {
                config.general.snapshot_file = snapshot;
            }
            Sensor::new(config).run().await
        }

        Commands::PrintConfig => {
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}
