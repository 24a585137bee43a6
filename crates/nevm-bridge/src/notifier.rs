//! Consensus-node side of the bridge: sequenced notifications out,
//! acknowledgements back in.

use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use nevm_bus::{Context, Publisher, Sequencing, Subscriber};
use nevm_core::{
    decode_block_announce, encode_block_connect, BlockAnnounce, BlockConnect, Envelope, Topic,
    ACK_CONNECTED, ACK_DISCONNECTED,
};
use tracing::{debug, info};

use crate::error::BridgeError;

/// Publishes block lifecycle notifications with per-topic sequence numbers.
pub struct ConsensusNotifier {
    publisher: Publisher,
}

impl ConsensusNotifier {
    pub async fn bind(ctx: &Context, address: &str) -> Result<Self, BridgeError> {
        let publisher = Publisher::bind(ctx, address, Sequencing::Numbered).await?;
        Ok(ConsensusNotifier { publisher })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.publisher.local_addr()
    }

    /// A new block was produced. `header` is forwarded opaquely.
    pub fn notify_block(&self, header: impl Into<Bytes>) -> Result<(), BridgeError> {
        self.publisher.publish(Topic::Block, header)?;
        Ok(())
    }

    pub fn notify_connect(&self, connect: &BlockConnect) -> Result<(), BridgeError> {
        let body = encode_block_connect(connect)?;
        self.publisher.publish(Topic::BlockConnect, body)?;
        Ok(())
    }

    /// Forward an already encoded payload on `topic`.
    pub fn publish_raw(&self, topic: Topic, body: impl Into<Bytes>) -> Result<(), BridgeError> {
        self.publisher.publish(topic, body)?;
        Ok(())
    }

    pub fn notify_disconnect(&self) -> Result<(), BridgeError> {
        self.publisher.publish(Topic::BlockDisconnect, Bytes::new())?;
        Ok(())
    }

    /// Wait until every topic in `topics` has a subscriber, so that the
    /// first notifications are not dropped.
    pub async fn wait_for_subscribers(
        &self,
        topics: &[Topic],
        timeout: Duration,
    ) -> Result<(), BridgeError> {
        for topic in topics {
            self.publisher
                .wait_for_subscribers(topic.as_bytes(), 1, timeout)
                .await?;
            debug!("{} has a subscriber", topic);
        }
        Ok(())
    }

    pub async fn close(&mut self) {
        self.publisher.close().await;
    }
}

/// A decoded acknowledgement from the execution node
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ack {
    Block(BlockAnnounce),
    Connected,
    Disconnected,
}

impl Ack {
    pub fn topic(&self) -> Topic {
        match self {
            Ack::Block(_) => Topic::Block,
            Ack::Connected => Topic::BlockConnect,
            Ack::Disconnected => Topic::BlockDisconnect,
        }
    }

    pub fn from_envelope(envelope: &Envelope) -> Result<Self, BridgeError> {
        let unexpected = || BridgeError::UnexpectedAck {
            topic: String::from_utf8_lossy(&envelope.topic).into_owned(),
            body: String::from_utf8_lossy(&envelope.body).into_owned(),
        };

        match envelope.known_topic().ok_or_else(unexpected)? {
            Topic::Block => Ok(Ack::Block(decode_block_announce(&envelope.body)?)),
            Topic::BlockConnect if envelope.body.as_ref() == ACK_CONNECTED => Ok(Ack::Connected),
            Topic::BlockDisconnect if envelope.body.as_ref() == ACK_DISCONNECTED => {
                Ok(Ack::Disconnected)
            }
            _ => Err(unexpected()),
        }
    }
}

/// Receives acknowledgements from the execution node.
pub struct AckListener {
    subscriber: Subscriber,
}

impl AckListener {
    /// Subscribe to `topics` and wait up to `timeout` for the execution side
    /// to accept the connection, so no acknowledgement is missed.
    pub async fn connect(
        ctx: &Context,
        address: &str,
        topics: &[Topic],
        timeout: Duration,
    ) -> Result<Self, BridgeError> {
        let mut subscriber = Subscriber::connect(ctx, address).await?;
        for topic in topics {
            subscriber.subscribe(*topic).await?;
        }
        subscriber.wait_connected(timeout).await?;
        info!("Listening for acknowledgements on {}", subscriber.endpoint());
        Ok(AckListener { subscriber })
    }

    pub async fn next_ack(&mut self, timeout: Duration) -> Result<Ack, BridgeError> {
        let envelope = self.subscriber.receive_envelope(timeout).await?;
        Ack::from_envelope(&envelope)
    }

    pub async fn next_envelope(&mut self, timeout: Duration) -> Result<Envelope, BridgeError> {
        Ok(self.subscriber.receive_envelope(timeout).await?)
    }

    pub fn close(&mut self) {
        self.subscriber.close();
    }
}
