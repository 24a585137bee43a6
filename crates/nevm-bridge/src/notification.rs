//! Per-topic receive, react, acknowledge loop run on the execution side.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use nevm_bus::{BusError, Publisher, Subscriber};
use nevm_core::{
    decode_block_connect, encode_block_announce, BlockAnnounce, Topic, ACK_CONNECTED,
    ACK_DISCONNECTED,
};
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::error::BridgeError;
use crate::hasher::HashSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Waiting,
    Processing,
    Publishing,
    /// Clean exit after context termination
    Stopped,
    /// Exit on a fatal error
    Failed,
}

impl LoopState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, LoopState::Stopped | LoopState::Failed)
    }
}

/// Owns one subscriber and one publisher handle for a single topic.
pub struct NotificationLoop {
    topic: Topic,
    subscriber: Subscriber,
    publisher: Publisher,
    receive_timeout: Duration,
    hash_source: Arc<dyn HashSource>,
    state: watch::Sender<LoopState>,
    handled: u64,
}

impl NotificationLoop {
    pub fn new(
        topic: Topic,
        subscriber: Subscriber,
        publisher: Publisher,
        receive_timeout: Duration,
        hash_source: Arc<dyn HashSource>,
    ) -> (Self, watch::Receiver<LoopState>) {
        let (state, state_rx) = watch::channel(LoopState::Idle);
        let notification_loop = NotificationLoop {
            topic,
            subscriber,
            publisher,
            receive_timeout,
            hash_source,
            state,
            handled: 0,
        };
        (notification_loop, state_rx)
    }

    pub fn topic(&self) -> Topic {
        self.topic
    }

    /// Run until the context is terminated or a fatal error occurs.
    ///
    /// Returns the number of notifications acknowledged on a clean stop.
    pub async fn run(mut self) -> Result<u64, BridgeError> {
        info!("{} loop started", self.topic);

        loop {
            self.set_state(LoopState::Waiting);
            debug!("{} waiting to receive...", self.topic);

            let body = match self.subscriber.receive(self.receive_timeout).await {
                Ok(body) => body,
                Err(BusError::Timeout) => {
                    debug!("{} receive timed out, retrying", self.topic);
                    continue;
                }
                Err(e) if e.is_shutdown() => return Ok(self.shutdown().await),
                Err(e) => return Err(self.fail(e.into())),
            };
            debug!("{} received {} bytes", self.topic, body.len());

            self.set_state(LoopState::Processing);
            let reply = match self.react(&body) {
                Ok(reply) => reply,
                Err(e) => return Err(self.fail(e)),
            };

            self.set_state(LoopState::Publishing);
            match self.publisher.publish(self.topic, reply) {
                Ok(()) => self.handled += 1,
                Err(e) if e.is_shutdown() => return Ok(self.shutdown().await),
                Err(e) => return Err(self.fail(e.into())),
            }
        }
    }

    /// Build the acknowledgement for one notification body.
    fn react(&self, body: &[u8]) -> Result<Bytes, BridgeError> {
        match self.topic {
            Topic::Block => {
                let hashes = self.hash_source.announce_hashes(self.topic, body);
                let announce = BlockAnnounce::new(
                    hashes.topic_hash,
                    hashes.block_hash,
                    hashes.state_hash,
                    self.topic.as_bytes(),
                );
                debug!("Announcing block with topic hash {}", announce.topic_hash.to_uint256_hex());
                Ok(Bytes::from(encode_block_announce(&announce)))
            }
            Topic::BlockConnect => {
                let connect = decode_block_connect(body)?;
                debug!(
                    "Block {} connected ({} bytes of execution data)",
                    connect.block_hash,
                    connect.block_data.len()
                );
                Ok(Bytes::from_static(ACK_CONNECTED))
            }
            Topic::BlockDisconnect => Ok(Bytes::from_static(ACK_DISCONNECTED)),
        }
    }

    async fn shutdown(mut self) -> u64 {
        self.subscriber.close();
        self.publisher.close().await;
        self.set_state(LoopState::Stopped);
        info!("{} loop stopped after {} notifications", self.topic, self.handled);
        self.handled
    }

    fn fail(mut self, e: BridgeError) -> BridgeError {
        error!("{} loop failed: {}", self.topic, e);
        self.subscriber.close();
        self.set_state(LoopState::Failed);
        e
    }

    fn set_state(&self, state: LoopState) {
        self.state.send_replace(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hasher::{AnnounceHashes, NonceHashSource};
    use nevm_bus::{Context, Sequencing};
    use nevm_core::{decode_block_announce, hash_sha256d, Hash};

    struct FixedHashSource;

    impl HashSource for FixedHashSource {
        fn announce_hashes(&self, _topic: Topic, _notification: &[u8]) -> AnnounceHashes {
            AnnounceHashes {
                topic_hash: hash_sha256d(b"topic"),
                block_hash: hash_sha256d(b"block"),
                state_hash: hash_sha256d(b"state"),
            }
        }
    }

    async fn idle_loop(topic: Topic, hash_source: Arc<dyn HashSource>) -> (Context, NotificationLoop) {
        let ctx = Context::new("test");
        let publisher = Publisher::bind(&ctx, "tcp://127.0.0.1:0", Sequencing::Unnumbered)
            .await
            .unwrap();
        let address = format!("tcp://{}", publisher.local_addr());
        let subscriber = Subscriber::connect(&ctx, &address).await.unwrap();
        let (notification_loop, _) = NotificationLoop::new(
            topic,
            subscriber,
            publisher,
            Duration::from_secs(1),
            hash_source,
        );
        (ctx, notification_loop)
    }

    #[tokio::test]
    async fn test_react_block_uses_hash_source() {
        let (_ctx, notification_loop) = idle_loop(Topic::Block, Arc::new(FixedHashSource)).await;

        let reply = notification_loop.react(b"").unwrap();
        let announce = decode_block_announce(&reply).unwrap();
        assert_eq!(announce.topic_hash, hash_sha256d(b"topic"));
        assert_eq!(announce.block_hash, hash_sha256d(b"block"));
        assert_eq!(announce.state_hash, hash_sha256d(b"state"));
        assert_eq!(announce.topic, b"nevmblock".to_vec());
    }

    #[tokio::test]
    async fn test_react_connect_rejects_truncated() {
        let (_ctx, notification_loop) =
            idle_loop(Topic::BlockConnect, Arc::new(NonceHashSource)).await;

        let result = notification_loop.react(&[0u8; 20]);
        assert!(matches!(result, Err(BridgeError::Core(_))));
    }

    #[tokio::test]
    async fn test_react_connect_acknowledges() {
        let (_ctx, notification_loop) =
            idle_loop(Topic::BlockConnect, Arc::new(NonceHashSource)).await;

        let connect = nevm_core::BlockConnect::new(Hash::ZERO, Vec::new(), false);
        let body = nevm_core::encode_block_connect(&connect).unwrap();
        assert_eq!(&notification_loop.react(&body).unwrap()[..], b"connected");
    }

    #[tokio::test]
    async fn test_react_disconnect_ignores_body() {
        let (_ctx, notification_loop) =
            idle_loop(Topic::BlockDisconnect, Arc::new(NonceHashSource)).await;

        assert_eq!(&notification_loop.react(b"anything").unwrap()[..], b"disconnected");
    }

    #[tokio::test]
    async fn test_terminate_stops_loop() {
        let (ctx, notification_loop) =
            idle_loop(Topic::BlockDisconnect, Arc::new(NonceHashSource)).await;
        let mut state = notification_loop.state.subscribe();

        let handle = tokio::spawn(notification_loop.run());
        state
            .wait_for(|s| *s == LoopState::Waiting)
            .await
            .unwrap();
        ctx.terminate();

        let handled = handle.await.unwrap().unwrap();
        assert_eq!(handled, 0);
        assert_eq!(*state.borrow(), LoopState::Stopped);
    }
}
