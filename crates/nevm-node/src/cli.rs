use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// NEVM bridge - consensus/execution notification bridge
#[derive(Parser)]
#[command(name = "nevm-bridge")]
#[command(about = "NEVM notification bridge and utilities")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Answer notifications as the execution node until interrupted
    Run {
        /// Path to configuration file
        #[arg(short, long, default_value = "bridge.json")]
        config: PathBuf,

        /// Notifier keys overriding the file, e.g. zmqpubnevmblock=tcp://127.0.0.1:29433
        #[arg(long = "notify", value_name = "KEY=ADDRESS")]
        notify: Vec<String>,
    },

    /// Write a sample configuration
    Init {
        /// Output path for configuration file
        #[arg(short, long, default_value = "bridge.json")]
        output: PathBuf,
    },

    /// Act as the consensus node against a running bridge
    Simulate {
        /// Path to configuration file
        #[arg(short, long, default_value = "bridge.json")]
        config: PathBuf,

        /// Number of blocks to announce and connect
        #[arg(short, long, default_value = "10")]
        blocks: u32,

        /// Seconds to wait for each acknowledgement
        #[arg(long, default_value = "60")]
        ack_timeout: u64,
    },
}
