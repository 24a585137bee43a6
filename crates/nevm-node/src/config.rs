use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use nevm_bridge::{SessionConfig, TopicBinding, DEFAULT_RECEIVE_TIMEOUT_MS};
use nevm_bus::{Endpoint, DEFAULT_CHANNEL_CAPACITY};
use nevm_core::Topic;
use serde::{Deserialize, Serialize};

/// Notifier key prefix for consensus-side publishers
const PUB_KEY_PREFIX: &str = "zmqpub";

/// Notifier key prefix for execution-side publishers
const SUBPUB_KEY_PREFIX: &str = "zmqsubpub";

/// Bridge configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Address the consensus node publishes notifications on
    pub consensus_address: String,

    /// Address acknowledgements are published on
    pub execution_address: String,

    /// Bridged topics
    pub topics: Vec<TopicConfig>,

    /// Receive timeout per loop iteration in milliseconds
    #[serde(default = "default_receive_timeout_ms")]
    pub receive_timeout_ms: u64,

    /// Envelopes buffered per publisher
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicConfig {
    pub topic: Topic,

    /// Overrides `BridgeConfig::consensus_address`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consensus_address: Option<String>,

    /// Overrides `BridgeConfig::execution_address`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_address: Option<String>,
}

impl TopicConfig {
    pub fn new(topic: Topic) -> Self {
        TopicConfig {
            topic,
            consensus_address: None,
            execution_address: None,
        }
    }
}

fn default_receive_timeout_ms() -> u64 {
    DEFAULT_RECEIVE_TIMEOUT_MS
}

fn default_channel_capacity() -> usize {
    DEFAULT_CHANNEL_CAPACITY
}

impl Default for BridgeConfig {
    fn default() -> Self {
        BridgeConfig {
            consensus_address: "tcp://127.0.0.1:29433".to_string(),
            execution_address: "tcp://127.0.0.1:29434".to_string(),
            topics: Topic::ALL.into_iter().map(TopicConfig::new).collect(),
            receive_timeout_ms: DEFAULT_RECEIVE_TIMEOUT_MS,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

impl BridgeConfig {
    /// Load config from file
    pub fn load(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: BridgeConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save config to file
    pub fn save(&self, path: &PathBuf) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Build a config from notifier keys such as
    /// `-zmqpubnevmblock=tcp://127.0.0.1:29433`.
    ///
    /// Keys for topics outside the bridge are ignored. Every bridged topic
    /// needs both a `zmqpub` and a `zmqsubpub` key.
    pub fn from_args<S: AsRef<str>>(args: &[S]) -> Result<Self> {
        let mut config = BridgeConfig {
            topics: Vec::new(),
            ..BridgeConfig::default()
        };
        config.apply_args(args)?;
        if config.topics.is_empty() {
            bail!("no bridged topics in notifier arguments");
        }
        Ok(config)
    }

    /// Merge notifier keys into this config, overriding per-topic addresses.
    pub fn apply_args<S: AsRef<str>>(&mut self, args: &[S]) -> Result<()> {
        let mut seen = Vec::new();

        for arg in args {
            let arg = arg.as_ref();
            let key_value = arg.trim_start_matches('-');
            let (key, address) = key_value
                .split_once('=')
                .ok_or_else(|| anyhow!("expected KEY=ADDRESS, got {}", arg))?;

            let (topic_name, consensus_side) = if let Some(rest) = key.strip_prefix(SUBPUB_KEY_PREFIX) {
                (rest, false)
            } else if let Some(rest) = key.strip_prefix(PUB_KEY_PREFIX) {
                (rest, true)
            } else {
                bail!("unknown notifier key {}", key);
            };

            let Ok(topic) = topic_name.parse::<Topic>() else {
                continue;
            };
            address
                .parse::<Endpoint>()
                .map_err(|e| anyhow!("{}: {}", key, e))?;

            let index = match self.topics.iter().position(|t| t.topic == topic) {
                Some(i) => i,
                None => {
                    self.topics.push(TopicConfig::new(topic));
                    self.topics.len() - 1
                }
            };
            let entry = &mut self.topics[index];
            if consensus_side {
                entry.consensus_address = Some(address.to_string());
            } else {
                entry.execution_address = Some(address.to_string());
            }
            seen.push((topic, consensus_side));
        }

        for (topic, _) in &seen {
            let has_pub = seen.contains(&(*topic, true));
            let has_subpub = seen.contains(&(*topic, false));
            if has_pub != has_subpub {
                let missing = if has_pub { SUBPUB_KEY_PREFIX } else { PUB_KEY_PREFIX };
                bail!("{} has no -{}{} key", topic, missing, topic);
            }
        }

        Ok(())
    }

    /// Check addresses, topics and limits
    pub fn validate(&self) -> Result<()> {
        self.to_session_config()?;
        if self.channel_capacity == 0 {
            bail!("channel_capacity must be positive");
        }
        Ok(())
    }

    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms)
    }

    /// Resolve per-topic overrides into session bindings
    pub fn to_session_config(&self) -> Result<SessionConfig> {
        let bindings = self
            .topics
            .iter()
            .map(|t| {
                let consensus_address = t
                    .consensus_address
                    .clone()
                    .unwrap_or_else(|| self.consensus_address.clone());
                let execution_address = t
                    .execution_address
                    .clone()
                    .unwrap_or_else(|| self.execution_address.clone());
                for address in [&consensus_address, &execution_address] {
                    address
                        .parse::<Endpoint>()
                        .map_err(|e| anyhow!("{}: {}", t.topic, e))?;
                }
                Ok(TopicBinding {
                    topic: t.topic,
                    consensus_address,
                    execution_address,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let config = SessionConfig {
            bindings,
            receive_timeout: self.receive_timeout(),
            channel_capacity: self.channel_capacity,
        };
        config.validate()?;
        Ok(config)
    }
}

/// Generate a sample configuration bridging every topic
pub fn generate_sample_config() -> BridgeConfig {
    BridgeConfig::default()
}
