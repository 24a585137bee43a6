use anyhow::Result;
use nevm_bridge::BridgeSession;
use tracing::{error, info};

use crate::config::BridgeConfig;

/// Execution-side bridge process
pub struct BridgeNode {
    config: BridgeConfig,
}

impl BridgeNode {
    pub fn new(config: BridgeConfig) -> Result<Self> {
        config.validate()?;
        Ok(BridgeNode { config })
    }

    /// Run until ctrl-c or until a notification loop fails.
    pub async fn run(self) -> Result<()> {
        let session_config = self.config.to_session_config()?;
        for binding in &session_config.bindings {
            info!(
                "Bridging {}: {} -> {}",
                binding.topic, binding.consensus_address, binding.execution_address
            );
        }

        let mut session = BridgeSession::start(session_config).await?;
        info!("Bridge running, press ctrl-c to stop");

        let failure = tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    error!("Failed to listen for ctrl-c: {}", e);
                }
                info!("Shutting down");
                None
            }
            exit = session.next_exit() => exit,
        };

        let stopped = session.stop().await;

        if let Some((topic, outcome)) = failure {
            match outcome {
                Err(e) => {
                    error!("{} loop failed, bridge stopped", topic);
                    return Err(e.into());
                }
                Ok(handled) => info!("{} loop exited after {} notifications", topic, handled),
            }
        }

        stopped?;
        info!("Bridge stopped");
        Ok(())
    }
}
