//! Subscribing side of the bus.

use std::collections::HashMap;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use nevm_core::Envelope;
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::address::Endpoint;
use crate::context::Context;
use crate::error::BusError;
use crate::frame::{Message, MultipartCodec};

const RECONNECT_INTERVAL: Duration = Duration::from_millis(100);

type Link = Framed<TcpStream, MultipartCodec>;

/// A subscribing socket connected to one publisher.
///
/// The connection is established lazily: if the publisher is not reachable
/// yet, `receive` keeps retrying until the timeout elapses. After every
/// reconnect all topics are subscribed again and sequence tracking starts
/// over, since a restarted publisher numbers from zero.
pub struct Subscriber {
    endpoint: Endpoint,
    topics: Vec<Bytes>,
    link: Option<Link>,
    last_sequence: HashMap<Bytes, u32>,
    context: CancellationToken,
    closed: bool,
}

impl Subscriber {
    pub async fn connect(ctx: &Context, address: &str) -> Result<Self, BusError> {
        if ctx.is_terminated() {
            return Err(BusError::Terminated);
        }

        let endpoint: Endpoint = address.parse()?;
        let mut subscriber = Subscriber {
            endpoint,
            topics: Vec::new(),
            link: None,
            last_sequence: HashMap::new(),
            context: ctx.token(),
            closed: false,
        };

        match TcpStream::connect(subscriber.endpoint.socket_addr()).await {
            Ok(stream) => {
                subscriber.link = Some(Framed::new(stream, MultipartCodec::new()));
                info!("Subscriber connected to {}", subscriber.endpoint);
            }
            Err(e) => {
                debug!(
                    "Publisher {} not reachable yet ({}), will retry on receive",
                    subscriber.endpoint, e
                );
            }
        }

        Ok(subscriber)
    }

    /// Register an exact-match topic filter.
    pub async fn subscribe(&mut self, topic: impl Into<Bytes>) -> Result<(), BusError> {
        if self.closed {
            return Err(BusError::ClosedEndpoint);
        }
        let topic = topic.into();
        if self.topics.contains(&topic) {
            return Ok(());
        }
        self.topics.push(topic.clone());

        if let Some(link) = self.link.as_mut() {
            if let Err(e) = link.send(Message::Subscribe(topic)).await {
                warn!("Subscribe to {} failed, reconnecting: {}", self.endpoint, e);
                self.link = None;
            }
        }
        Ok(())
    }

    pub async fn unsubscribe(&mut self, topic: impl Into<Bytes>) -> Result<(), BusError> {
        if self.closed {
            return Err(BusError::ClosedEndpoint);
        }
        let topic = topic.into();
        let before = self.topics.len();
        self.topics.retain(|t| t != &topic);
        if self.topics.len() == before {
            return Ok(());
        }
        self.last_sequence.remove(&topic);

        if let Some(link) = self.link.as_mut() {
            if let Err(e) = link.send(Message::Unsubscribe(topic)).await {
                warn!("Unsubscribe from {} failed, reconnecting: {}", self.endpoint, e);
                self.link = None;
            }
        }
        Ok(())
    }

    /// Block until a matching envelope arrives and return its body.
    pub async fn receive(&mut self, timeout: Duration) -> Result<Bytes, BusError> {
        Ok(self.receive_envelope(timeout).await?.body)
    }

    /// Block until a matching envelope arrives.
    ///
    /// # Errors
    ///
    /// - `Timeout` - nothing arrived within `timeout`
    /// - `Terminated` - the context was terminated
    /// - `TopicMismatch` - the publisher routed a topic we never subscribed to
    /// - `SequenceViolation` - the sequence number did not increase
    /// - `Transport` - the publisher sent a malformed message
    pub async fn receive_envelope(&mut self, timeout: Duration) -> Result<Envelope, BusError> {
        if self.closed {
            return Err(BusError::ClosedEndpoint);
        }
        if self.context.is_cancelled() {
            return Err(BusError::Terminated);
        }

        let context = self.context.clone();
        tokio::select! {
            biased;
            _ = context.cancelled() => Err(BusError::Terminated),
            received = tokio::time::timeout(timeout, self.next_envelope()) => {
                received.unwrap_or(Err(BusError::Timeout))
            }
        }
    }

    /// Retry until the publisher accepts the connection and every topic has
    /// been subscribed on it.
    pub async fn wait_connected(&mut self, timeout: Duration) -> Result<(), BusError> {
        if self.closed {
            return Err(BusError::ClosedEndpoint);
        }
        if self.link.is_some() {
            return Ok(());
        }

        let context = self.context.clone();
        tokio::select! {
            biased;
            _ = context.cancelled() => Err(BusError::Terminated),
            connected = tokio::time::timeout(timeout, self.reconnect()) => {
                connected.map_err(|_| BusError::Timeout)
            }
        }
    }

    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.link = None;
        debug!("Subscriber to {} closed", self.endpoint);
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn is_connected(&self) -> bool {
        self.link.is_some()
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn topics(&self) -> &[Bytes] {
        &self.topics
    }

    async fn next_envelope(&mut self) -> Result<Envelope, BusError> {
        loop {
            if self.link.is_none() {
                self.reconnect().await;
            }
            let Some(link) = self.link.as_mut() else {
                continue;
            };

            match link.next().await {
                Some(Ok(Message::Parts(parts))) => {
                    let envelope = Envelope::from_parts(parts)
                        .map_err(|e| BusError::Transport(e.to_string()))?;
                    self.check(&envelope)?;
                    return Ok(envelope);
                }
                Some(Ok(_)) => {
                    return Err(BusError::Transport(
                        "publisher sent a command frame".to_string(),
                    ));
                }
                Some(Err(BusError::Io(e))) => {
                    warn!("Connection to {} lost: {}", self.endpoint, e);
                    self.link = None;
                }
                Some(Err(e)) => return Err(e),
                None => {
                    debug!("Publisher {} closed the connection", self.endpoint);
                    self.link = None;
                }
            }
        }
    }

    async fn reconnect(&mut self) {
        loop {
            match TcpStream::connect(self.endpoint.socket_addr()).await {
                Ok(stream) => {
                    let mut link = Framed::new(stream, MultipartCodec::new());
                    let mut subscribed = true;
                    for topic in &self.topics {
                        if let Err(e) = link.send(Message::Subscribe(topic.clone())).await {
                            warn!("Resubscribe to {} failed: {}", self.endpoint, e);
                            subscribed = false;
                            break;
                        }
                    }
                    if subscribed {
                        info!("Subscriber connected to {}", self.endpoint);
                        self.last_sequence.clear();
                        self.link = Some(link);
                        return;
                    }
                }
                Err(e) => {
                    debug!("Publisher {} not reachable: {}", self.endpoint, e);
                }
            }
            tokio::time::sleep(RECONNECT_INTERVAL).await;
        }
    }

    fn check(&mut self, envelope: &Envelope) -> Result<(), BusError> {
        if !self.topics.contains(&envelope.topic) {
            return Err(BusError::TopicMismatch {
                expected: self
                    .topics
                    .iter()
                    .map(|t| String::from_utf8_lossy(t).into_owned())
                    .collect::<Vec<_>>()
                    .join(","),
                got: String::from_utf8_lossy(&envelope.topic).into_owned(),
            });
        }

        if let Some(sequence) = envelope.sequence {
            if let Some(&last) = self.last_sequence.get(&envelope.topic) {
                let wrapped = last == u32::MAX && sequence == 0;
                if sequence <= last && !wrapped {
                    return Err(BusError::SequenceViolation {
                        topic: String::from_utf8_lossy(&envelope.topic).into_owned(),
                        last,
                        got: sequence,
                    });
                }
            }
            self.last_sequence.insert(envelope.topic.clone(), sequence);
        }

        Ok(())
    }
}
