use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod cli;
mod config;
mod node;
mod simulate;

use cli::{Cli, Commands};
use config::{generate_sample_config, BridgeConfig};
use node::BridgeNode;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config, notify } => {
            run_bridge(config, notify).await?;
        }
        Commands::Init { output } => {
            init_config(output)?;
        }
        Commands::Simulate {
            config,
            blocks,
            ack_timeout,
        } => {
            let config = load_config(&config)?;
            simulate::run_simulation(&config, blocks, Duration::from_secs(ack_timeout)).await?;
        }
    }

    Ok(())
}

fn load_config(config_path: &PathBuf) -> Result<BridgeConfig> {
    info!("Loading configuration from {:?}", config_path);

    if !config_path.exists() {
        error!(
            "Configuration file not found: {:?}. Run 'nevm-bridge init' to create one.",
            config_path
        );
        return Err(anyhow::anyhow!("Configuration file not found"));
    }
    BridgeConfig::load(config_path)
}

/// Run the bridge
async fn run_bridge(config_path: PathBuf, notify: Vec<String>) -> Result<()> {
    let config = if notify.is_empty() {
        load_config(&config_path)?
    } else if config_path.exists() {
        let mut config = BridgeConfig::load(&config_path)?;
        config.apply_args(&notify)?;
        config
    } else {
        BridgeConfig::from_args(&notify)?
    };

    let node = BridgeNode::new(config)?;
    node.run().await
}

/// Initialize a new configuration file
fn init_config(output: PathBuf) -> Result<()> {
    info!("Generating sample configuration");

    let config = generate_sample_config();
    config.save(&output)?;

    info!("Configuration saved to {:?}", output);

    println!("\nConfiguration file created: {}", output.display());
    println!("Edit the file to customize the bridged topics and addresses.");
    println!("\nTo start the bridge, run:");
    println!("  nevm-bridge run --config {}", output.display());

    Ok(())
}
