//! Publishing side of the bus.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use nevm_core::Envelope;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::address::Endpoint;
use crate::context::Context;
use crate::error::BusError;
use crate::frame::{Message, MultipartCodec};
use crate::DEFAULT_CHANNEL_CAPACITY;

/// Whether envelopes carry a per-topic sequence number
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sequencing {
    Numbered,
    Unnumbered,
}

/// Active subscription count by topic, shared with connection tasks.
/// Every change is published through the watch channel.
#[derive(Debug, Clone)]
struct SubscriptionRegistry {
    counts: Arc<watch::Sender<HashMap<Bytes, usize>>>,
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        let (counts, _) = watch::channel(HashMap::new());
        SubscriptionRegistry {
            counts: Arc::new(counts),
        }
    }
}

impl SubscriptionRegistry {
    fn add(&self, topic: &Bytes) {
        self.counts.send_modify(|counts| {
            *counts.entry(topic.clone()).or_insert(0) += 1;
        });
    }

    fn remove(&self, topic: &Bytes) {
        self.counts.send_if_modified(|counts| {
            let Some(count) = counts.get_mut(topic) else {
                return false;
            };
            *count = count.saturating_sub(1);
            if *count == 0 {
                counts.remove(topic);
            }
            true
        });
    }

    fn count(&self, topic: &[u8]) -> usize {
        self.counts.borrow().get(topic).copied().unwrap_or(0)
    }

    /// Resolve once the count for `topic` satisfies `ready`.
    async fn wait_until(&self, topic: &[u8], ready: impl Fn(usize) -> bool) {
        let mut changes = self.counts.subscribe();
        // Never closes: `self` owns the sender.
        let _ = changes
            .wait_for(|counts| ready(counts.get(topic).copied().unwrap_or(0)))
            .await;
    }
}

struct Shared {
    endpoint: Endpoint,
    local_addr: SocketAddr,
    sender: broadcast::Sender<Envelope>,
    sequencing: Sequencing,
    sequences: Mutex<HashMap<Bytes, u32>>,
    subscriptions: SubscriptionRegistry,
    published: AtomicU64,
    handles: AtomicUsize,
    context: CancellationToken,
    shutdown: CancellationToken,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

/// A bound publishing socket.
///
/// Cloning yields another handle onto the same socket. Each handle is closed
/// independently; the socket is released when the last handle closes.
pub struct Publisher {
    shared: Arc<Shared>,
    closed: bool,
}

impl Publisher {
    pub async fn bind(ctx: &Context, address: &str, sequencing: Sequencing) -> Result<Self, BusError> {
        Self::bind_with_capacity(ctx, address, sequencing, DEFAULT_CHANNEL_CAPACITY).await
    }

    pub async fn bind_with_capacity(
        ctx: &Context,
        address: &str,
        sequencing: Sequencing,
        capacity: usize,
    ) -> Result<Self, BusError> {
        if ctx.is_terminated() {
            return Err(BusError::Terminated);
        }

        let endpoint: Endpoint = address.parse()?;
        let listener = TcpListener::bind(endpoint.socket_addr()).await?;
        let local_addr = listener.local_addr()?;
        let (sender, _) = broadcast::channel(capacity.max(1));
        let subscriptions = SubscriptionRegistry::default();
        let shutdown = ctx.child_token();

        let accept_task = tokio::spawn(accept_loop(
            listener,
            sender.clone(),
            subscriptions.clone(),
            shutdown.clone(),
        ));

        info!("Publisher bound on {} ({})", endpoint, local_addr);

        Ok(Publisher {
            shared: Arc::new(Shared {
                endpoint,
                local_addr,
                sender,
                sequencing,
                sequences: Mutex::new(HashMap::new()),
                subscriptions,
                published: AtomicU64::new(0),
                handles: AtomicUsize::new(1),
                context: ctx.token(),
                shutdown,
                accept_task: Mutex::new(Some(accept_task)),
            }),
            closed: false,
        })
    }

    /// Enqueue an envelope for every connection subscribed to `topic`.
    ///
    /// Never blocks. Envelopes published while nobody is subscribed are
    /// dropped.
    pub fn publish(&self, topic: impl Into<Bytes>, body: impl Into<Bytes>) -> Result<(), BusError> {
        if self.closed {
            return Err(BusError::ClosedEndpoint);
        }
        if self.shared.context.is_cancelled() {
            return Err(BusError::Terminated);
        }
        if self.shared.shutdown.is_cancelled() {
            return Err(BusError::ClosedEndpoint);
        }

        let mut envelope = Envelope::new(topic, body);

        // Stamp and send under one lock so concurrent handles cannot
        // reorder sequence numbers within a topic.
        let mut sequences = self
            .shared
            .sequences
            .lock()
            .map_err(|_| BusError::Transport("sequence table poisoned".to_string()))?;
        if self.shared.sequencing == Sequencing::Numbered {
            let next = sequences.entry(envelope.topic.clone()).or_insert(0);
            envelope.sequence = Some(*next);
            *next = next.wrapping_add(1);
        }

        self.shared.published.fetch_add(1, Ordering::Relaxed);
        let topic = String::from_utf8_lossy(&envelope.topic).into_owned();
        let sequence = envelope.sequence;
        match self.shared.sender.send(envelope) {
            Ok(connections) => {
                debug!(topic = %topic, sequence = ?sequence, connections, "Envelope published");
            }
            Err(_) => {
                debug!(topic = %topic, sequence = ?sequence, "Envelope dropped (no connections)");
            }
        }
        drop(sequences);
        Ok(())
    }

    /// Release this handle, and the socket if it was the last one.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        if self.shared.handles.fetch_sub(1, Ordering::AcqRel) != 1 {
            return;
        }

        self.shared.shutdown.cancel();
        let task = self
            .shared
            .accept_task
            .lock()
            .ok()
            .and_then(|mut task| task.take());
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!("Publisher accept task for {} failed: {}", self.shared.endpoint, e);
            }
        }
        info!("Publisher on {} closed", self.shared.endpoint);
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.shared.endpoint
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.shared.local_addr
    }

    /// Total envelopes accepted by `publish` across all handles
    pub fn events_published(&self) -> u64 {
        self.shared.published.load(Ordering::Relaxed)
    }

    /// Connections currently subscribed to `topic`
    pub fn subscriber_count(&self, topic: impl AsRef<[u8]>) -> usize {
        self.shared.subscriptions.count(topic.as_ref())
    }

    /// Wait until at least `count` connections subscribe to `topic`.
    pub async fn wait_for_subscribers(
        &self,
        topic: impl AsRef<[u8]>,
        count: usize,
        timeout: Duration,
    ) -> Result<(), BusError> {
        tokio::time::timeout(
            timeout,
            self.shared
                .subscriptions
                .wait_until(topic.as_ref(), |n| n >= count),
        )
        .await
        .map_err(|_| BusError::Timeout)
    }
}

impl Clone for Publisher {
    fn clone(&self) -> Self {
        if !self.closed {
            self.shared.handles.fetch_add(1, Ordering::AcqRel);
        }
        Publisher {
            shared: Arc::clone(&self.shared),
            closed: self.closed,
        }
    }
}

impl Drop for Publisher {
    fn drop(&mut self) {
        if !self.closed && self.shared.handles.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.shared.shutdown.cancel();
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    sender: broadcast::Sender<Envelope>,
    subscriptions: SubscriptionRegistry,
    shutdown: CancellationToken,
) {
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!("Subscriber connected from {}", peer);
                    connections.spawn(serve_connection(
                        stream,
                        peer,
                        sender.subscribe(),
                        subscriptions.clone(),
                        shutdown.clone(),
                    ));
                }
                Err(e) => {
                    warn!("Failed to accept subscriber: {}", e);
                }
            },
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }

    drop(listener);
    while connections.join_next().await.is_some() {}
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    mut envelopes: broadcast::Receiver<Envelope>,
    subscriptions: SubscriptionRegistry,
    shutdown: CancellationToken,
) {
    let mut framed = Framed::new(stream, MultipartCodec::new());
    let mut topics: HashSet<Bytes> = HashSet::new();

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            incoming = framed.next() => match incoming {
                Some(Ok(Message::Subscribe(topic))) => {
                    if topics.insert(topic.clone()) {
                        subscriptions.add(&topic);
                        debug!("{} subscribed to {}", peer, String::from_utf8_lossy(&topic));
                    }
                }
                Some(Ok(Message::Unsubscribe(topic))) => {
                    if topics.remove(&topic) {
                        subscriptions.remove(&topic);
                        debug!("{} unsubscribed from {}", peer, String::from_utf8_lossy(&topic));
                    }
                }
                Some(Ok(Message::Parts(_))) => {
                    warn!("Ignoring data message from subscriber {}", peer);
                }
                Some(Err(e)) => {
                    warn!("Dropping subscriber {}: {}", peer, e);
                    break;
                }
                None => {
                    debug!("Subscriber {} disconnected", peer);
                    break;
                }
            },
            envelope = envelopes.recv() => match envelope {
                Ok(envelope) => {
                    if !topics.contains(&envelope.topic) {
                        continue;
                    }
                    let sent = tokio::select! {
                        _ = shutdown.cancelled() => break,
                        sent = framed.send(Message::Parts(envelope.into_parts())) => sent,
                    };
                    if let Err(e) = sent {
                        warn!("Failed to deliver to subscriber {}: {}", peer, e);
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(count)) => {
                    warn!("Subscriber {} lagged, {} envelopes dropped", peer, count);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    for topic in &topics {
        subscriptions.remove(topic);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subscriber::Subscriber;

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let ctx = Context::new("test");
        let publisher = Publisher::bind(&ctx, "tcp://127.0.0.1:0", Sequencing::Unnumbered)
            .await
            .unwrap();

        publisher.publish(&b"nevmblock"[..], &b""[..]).unwrap();
        assert_eq!(publisher.events_published(), 1);
        assert_eq!(publisher.subscriber_count(b"nevmblock"), 0);
    }

    #[tokio::test]
    async fn test_publish_after_close() {
        let ctx = Context::new("test");
        let mut publisher = Publisher::bind(&ctx, "tcp://127.0.0.1:0", Sequencing::Unnumbered)
            .await
            .unwrap();

        publisher.close().await;
        publisher.close().await;
        assert!(publisher.is_closed());
        assert!(matches!(
            publisher.publish(&b"nevmblock"[..], &b""[..]),
            Err(BusError::ClosedEndpoint)
        ));
    }

    #[tokio::test]
    async fn test_publish_after_terminate() {
        let ctx = Context::new("test");
        let publisher = Publisher::bind(&ctx, "tcp://127.0.0.1:0", Sequencing::Numbered)
            .await
            .unwrap();

        ctx.terminate();
        assert!(matches!(
            publisher.publish(&b"nevmblock"[..], &b""[..]),
            Err(BusError::Terminated)
        ));
    }

    #[tokio::test]
    async fn test_bind_on_terminated_context() {
        let ctx = Context::new("test");
        ctx.terminate();
        let result = Publisher::bind(&ctx, "tcp://127.0.0.1:0", Sequencing::Numbered).await;
        assert!(matches!(result, Err(BusError::Terminated)));
    }

    #[tokio::test]
    async fn test_socket_released_after_last_handle() {
        let ctx = Context::new("test");
        let mut first = Publisher::bind(&ctx, "tcp://127.0.0.1:0", Sequencing::Unnumbered)
            .await
            .unwrap();
        let mut second = first.clone();
        let addr = first.local_addr();

        first.close().await;
        assert!(second.publish(&b"nevmblock"[..], &b"x"[..]).is_ok());

        second.close().await;
        TcpListener::bind(addr).await.unwrap();
    }

    #[tokio::test]
    async fn test_wait_for_subscribers_times_out() {
        let ctx = Context::new("test");
        let publisher = Publisher::bind(&ctx, "tcp://127.0.0.1:0", Sequencing::Unnumbered)
            .await
            .unwrap();

        let result = publisher
            .wait_for_subscribers(b"nevmblock", 1, Duration::from_millis(20))
            .await;
        assert!(matches!(result, Err(BusError::Timeout)));
    }

    #[tokio::test]
    async fn test_wait_for_subscribers_wakes_on_subscribe() {
        let ctx = Context::new("test");
        let publisher = Publisher::bind(&ctx, "tcp://127.0.0.1:0", Sequencing::Unnumbered)
            .await
            .unwrap();
        let address = format!("tcp://{}", publisher.local_addr());

        let waiter = publisher.wait_for_subscribers(b"nevmblock", 1, Duration::from_secs(5));
        let subscribe = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let mut subscriber = Subscriber::connect(&ctx, &address).await.unwrap();
            subscriber.subscribe(&b"nevmblock"[..]).await.unwrap();
            subscriber
        };
        let (waited, _subscriber) = tokio::join!(waiter, subscribe);
        waited.unwrap();
        assert_eq!(publisher.subscriber_count(b"nevmblock"), 1);
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let ctx = Context::new("test");
        let publisher = Publisher::bind(&ctx, "tcp://127.0.0.1:0", Sequencing::Unnumbered)
            .await
            .unwrap();
        let address = format!("tcp://{}", publisher.local_addr());

        let mut subscriber = Subscriber::connect(&ctx, &address).await.unwrap();
        subscriber.subscribe(&b"nevmblock"[..]).await.unwrap();
        subscriber.subscribe(&b"nevmblockdisconnect"[..]).await.unwrap();
        for topic in [&b"nevmblock"[..], &b"nevmblockdisconnect"[..]] {
            publisher
                .wait_for_subscribers(topic, 1, Duration::from_secs(5))
                .await
                .unwrap();
        }

        subscriber.unsubscribe(&b"nevmblock"[..]).await.unwrap();
        assert_eq!(subscriber.topics(), &[Bytes::from_static(b"nevmblockdisconnect")]);
        tokio::time::timeout(
            Duration::from_secs(5),
            publisher
                .shared
                .subscriptions
                .wait_until(b"nevmblock", |n| n == 0),
        )
        .await
        .unwrap();
        assert_eq!(publisher.subscriber_count(b"nevmblock"), 0);
        assert_eq!(publisher.subscriber_count(b"nevmblockdisconnect"), 1);

        publisher.publish(&b"nevmblock"[..], &b"dropped"[..]).unwrap();
        publisher
            .publish(&b"nevmblockdisconnect"[..], &b"delivered"[..])
            .unwrap();

        let envelope = subscriber
            .receive_envelope(Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(&envelope.topic[..], b"nevmblockdisconnect");
        assert_eq!(&envelope.body[..], b"delivered");
    }

    #[tokio::test]
    async fn test_invalid_bind_address() {
        let ctx = Context::new("test");
        let result = Publisher::bind(&ctx, "ipc:///tmp/nevm", Sequencing::Unnumbered).await;
        assert!(matches!(result, Err(BusError::InvalidAddress(_))));
    }
}
