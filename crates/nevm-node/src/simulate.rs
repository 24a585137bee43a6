//! Consensus-node simulator: announces, connects and disconnects blocks
//! against a running bridge and checks every acknowledgement.

use std::time::Duration;

use anyhow::{bail, Result};
use nevm_bridge::{Ack, AckListener, ConsensusNotifier};
use nevm_bus::Context;
use nevm_core::{hash_sha256d, BlockConnect, Topic};
use tracing::info;

use crate::config::BridgeConfig;

/// How long to wait for the bridge to come up before publishing
const BRIDGE_TIMEOUT: Duration = Duration::from_secs(30);

pub async fn run_simulation(config: &BridgeConfig, blocks: u32, ack_timeout: Duration) -> Result<()> {
    let session_config = config.to_session_config()?;
    let topics: Vec<Topic> = session_config.bindings.iter().map(|b| b.topic).collect();

    let ctx = Context::new("simulator");
    let result = simulate(&ctx, config, &topics, blocks, ack_timeout).await;
    ctx.terminate();
    result
}

async fn simulate(
    ctx: &Context,
    config: &BridgeConfig,
    topics: &[Topic],
    blocks: u32,
    ack_timeout: Duration,
) -> Result<()> {
    let mut notifier = ConsensusNotifier::bind(ctx, &config.consensus_address).await?;
    info!("Waiting for the bridge on {}", config.execution_address);
    let mut acks =
        AckListener::connect(ctx, &config.execution_address, topics, BRIDGE_TIMEOUT).await?;

    info!("Waiting for the bridge to subscribe on {}", notifier.local_addr());
    notifier.wait_for_subscribers(topics, BRIDGE_TIMEOUT).await?;

    for height in 0..blocks {
        let header = hash_sha256d(&height.to_le_bytes());

        if topics.contains(&Topic::Block) {
            notifier.notify_block(header.to_vec())?;
            match acks.next_ack(ack_timeout).await? {
                Ack::Block(announce) => info!(
                    "Block {} announced: block hash {}, state hash {}",
                    height, announce.block_hash, announce.state_hash
                ),
                other => bail!("expected block announce, got {:?}", other),
            }
        }

        if topics.contains(&Topic::BlockConnect) {
            let connect = BlockConnect::new(header, header.to_vec(), true);
            notifier.notify_connect(&connect)?;
            expect_ack(&mut acks, Ack::Connected, ack_timeout).await?;
            info!("Block {} connected", height);
        }
    }

    // Roll the tip back once, as a reorg would.
    if blocks > 0 && topics.contains(&Topic::BlockDisconnect) {
        notifier.notify_disconnect()?;
        expect_ack(&mut acks, Ack::Disconnected, ack_timeout).await?;
        info!("Tip disconnected");
    }

    acks.close();
    notifier.close().await;
    info!("Simulated {} blocks", blocks);
    Ok(())
}

async fn expect_ack(acks: &mut AckListener, expected: Ack, timeout: Duration) -> Result<()> {
    let ack = acks.next_ack(timeout).await?;
    if ack != expected {
        bail!("expected {:?}, got {:?}", expected, ack);
    }
    Ok(())
}
