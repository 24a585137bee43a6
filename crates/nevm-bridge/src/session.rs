use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use nevm_bus::{Context, Publisher, Sequencing, Subscriber, DEFAULT_CHANNEL_CAPACITY};
use nevm_core::Topic;
use tokio::sync::watch;
use tokio::task::{Id, JoinSet};
use tracing::{error, info, warn};

use crate::error::BridgeError;
use crate::hasher::{HashSource, NonceHashSource};
use crate::notification::{LoopState, NotificationLoop};
use crate::DEFAULT_RECEIVE_TIMEOUT_MS;

/// Where one topic is received from and acknowledged to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicBinding {
    pub topic: Topic,
    /// Consensus-side publisher the loop subscribes to
    pub consensus_address: String,
    /// Execution-side address the loop's acknowledgements are published on
    pub execution_address: String,
}

/// Configuration for a bridge session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub bindings: Vec<TopicBinding>,
    pub receive_timeout: Duration,
    pub channel_capacity: usize,
}

impl SessionConfig {
    /// Every topic received from one address and acknowledged on another
    pub fn new(topics: &[Topic], consensus_address: &str, execution_address: &str) -> Self {
        SessionConfig {
            bindings: topics
                .iter()
                .map(|topic| TopicBinding {
                    topic: *topic,
                    consensus_address: consensus_address.to_string(),
                    execution_address: execution_address.to_string(),
                })
                .collect(),
            receive_timeout: Duration::from_millis(DEFAULT_RECEIVE_TIMEOUT_MS),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }

    pub fn with_receive_timeout(mut self, timeout: Duration) -> Self {
        self.receive_timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<(), BridgeError> {
        if self.bindings.is_empty() {
            return Err(BridgeError::Config("no topics configured".to_string()));
        }
        for (i, binding) in self.bindings.iter().enumerate() {
            if self.bindings[..i].iter().any(|b| b.topic == binding.topic) {
                return Err(BridgeError::Config(format!(
                    "topic {} configured more than once",
                    binding.topic
                )));
            }
        }
        if self.receive_timeout.is_zero() {
            return Err(BridgeError::Config("receive timeout must be positive".to_string()));
        }
        Ok(())
    }
}

type LoopOutcome = (Topic, Result<u64, BridgeError>);
type Endpoints = (Topic, Subscriber, Publisher);

/// Owns the two messaging contexts and every notification loop.
///
/// The inbound context carries consensus-to-execution notifications, the
/// outbound context carries acknowledgements back. Terminating one never
/// waits on the other.
pub struct BridgeSession {
    inbound: Context,
    outbound: Context,
    loops: JoinSet<LoopOutcome>,
    tasks: HashMap<Id, Topic>,
    states: Vec<(Topic, watch::Receiver<LoopState>)>,
    /// Loops whose task panicked before reaching a terminal state
    panicked: Vec<Topic>,
    publishers: HashMap<Topic, Publisher>,
}

impl BridgeSession {
    pub async fn start(config: SessionConfig) -> Result<Self, BridgeError> {
        Self::start_with_hash_source(config, Arc::new(NonceHashSource)).await
    }

    pub async fn start_with_hash_source(
        config: SessionConfig,
        hash_source: Arc<dyn HashSource>,
    ) -> Result<Self, BridgeError> {
        config.validate()?;

        let inbound = Context::new("consensus->execution");
        let outbound = Context::new("execution->consensus");

        let (endpoints, publishers) = match Self::open_endpoints(&config, &inbound, &outbound).await {
            Ok(endpoints) => endpoints,
            Err(e) => {
                inbound.terminate();
                outbound.terminate();
                return Err(e);
            }
        };

        let mut loops = JoinSet::new();
        let mut tasks = HashMap::new();
        let mut states = Vec::with_capacity(endpoints.len());

        for (topic, subscriber, publisher) in endpoints {
            let (notification_loop, state) = NotificationLoop::new(
                topic,
                subscriber,
                publisher,
                config.receive_timeout,
                Arc::clone(&hash_source),
            );
            states.push((topic, state));
            let handle = loops.spawn(async move { (topic, notification_loop.run().await) });
            tasks.insert(handle.id(), topic);
        }

        info!("Bridge session started with {} loops", states.len());

        Ok(BridgeSession {
            inbound,
            outbound,
            loops,
            tasks,
            states,
            panicked: Vec::new(),
            publishers,
        })
    }

    /// One subscriber per topic, one bound publisher per distinct execution
    /// address shared through cloned handles. The session keeps a handle
    /// per topic for observing subscriptions.
    async fn open_endpoints(
        config: &SessionConfig,
        inbound: &Context,
        outbound: &Context,
    ) -> Result<(Vec<Endpoints>, HashMap<Topic, Publisher>), BridgeError> {
        let mut bound: HashMap<String, Publisher> = HashMap::new();
        let mut publishers = HashMap::new();
        let mut endpoints = Vec::with_capacity(config.bindings.len());

        for binding in &config.bindings {
            let publisher = match bound.get(&binding.execution_address) {
                Some(publisher) => publisher.clone(),
                None => {
                    let publisher = Publisher::bind_with_capacity(
                        outbound,
                        &binding.execution_address,
                        Sequencing::Unnumbered,
                        config.channel_capacity,
                    )
                    .await?;
                    bound.insert(binding.execution_address.clone(), publisher.clone());
                    publisher
                }
            };
            publishers.insert(binding.topic, publisher.clone());

            let mut subscriber = Subscriber::connect(inbound, &binding.consensus_address).await?;
            subscriber.subscribe(binding.topic).await?;
            endpoints.push((binding.topic, subscriber, publisher));
        }

        for (_, mut publisher) in bound {
            publisher.close().await;
        }

        Ok((endpoints, publishers))
    }

    /// Terminate both contexts and wait for every loop to exit.
    ///
    /// Returns the first fatal loop error, if any. Calling `stop` again is a
    /// no-op.
    pub async fn stop(&mut self) -> Result<(), BridgeError> {
        self.inbound.terminate();
        self.outbound.terminate();

        let mut first_error = None;
        while let Some((topic, outcome)) = self.join_next().await {
            match outcome {
                Ok(handled) => info!("{} loop exited after {} notifications", topic, handled),
                Err(e) => {
                    error!("{} loop exited with error: {}", topic, e);
                    first_error.get_or_insert(e);
                }
            }
        }

        for publisher in self.publishers.values_mut() {
            publisher.close().await;
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Wait for the next loop to exit. Outside of `stop` this only happens on
    /// a fatal error. Returns `None` once every loop has been joined.
    pub async fn next_exit(&mut self) -> Option<LoopOutcome> {
        self.join_next().await
    }

    async fn join_next(&mut self) -> Option<LoopOutcome> {
        loop {
            match self.loops.join_next_with_id().await? {
                Ok((id, outcome)) => {
                    self.tasks.remove(&id);
                    return Some(outcome);
                }
                Err(e) => {
                    let Some(topic) = self.tasks.remove(&e.id()) else {
                        warn!("Joined untracked loop task {}: {}", e.id(), e);
                        continue;
                    };
                    self.panicked.push(topic);
                    let reason = e.to_string();
                    return Some((topic, Err(BridgeError::TaskFailed { topic, reason })));
                }
            }
        }
    }

    pub fn states(&self) -> Vec<(Topic, LoopState)> {
        self.states
            .iter()
            .map(|(topic, state)| {
                if self.panicked.contains(topic) {
                    (*topic, LoopState::Failed)
                } else {
                    (*topic, *state.borrow())
                }
            })
            .collect()
    }

    pub fn running_loops(&self) -> usize {
        self.loops.len()
    }

    /// Address acknowledgements for `topic` are published on
    pub fn execution_addr(&self, topic: Topic) -> Option<SocketAddr> {
        self.publishers.get(&topic).map(|p| p.local_addr())
    }

    pub async fn wait_for_ack_subscribers(
        &self,
        topic: Topic,
        timeout: Duration,
    ) -> Result<(), BridgeError> {
        let publisher = self
            .publishers
            .get(&topic)
            .ok_or_else(|| BridgeError::Config(format!("topic {} is not bridged", topic)))?;
        publisher
            .wait_for_subscribers(topic.as_bytes(), 1, timeout)
            .await?;
        Ok(())
    }

    pub fn is_stopped(&self) -> bool {
        self.inbound.is_terminated() && self.outbound.is_terminated() && self.loops.is_empty()
    }
}

impl Drop for BridgeSession {
    fn drop(&mut self) {
        self.inbound.terminate();
        self.outbound.terminate();
    }
}
