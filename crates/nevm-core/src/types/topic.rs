use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Acknowledgement body for `nevmblockconnect`
pub const ACK_CONNECTED: &[u8] = b"connected";

/// Acknowledgement body for `nevmblockdisconnect`
pub const ACK_DISCONNECTED: &[u8] = b"disconnected";

/// The fixed set of bridge topics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Topic {
    #[serde(rename = "nevmblock")]
    Block,
    #[serde(rename = "nevmblockconnect")]
    BlockConnect,
    #[serde(rename = "nevmblockdisconnect")]
    BlockDisconnect,
}

impl Topic {
    pub const ALL: [Topic; 3] = [Topic::Block, Topic::BlockConnect, Topic::BlockDisconnect];

    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::Block => "nevmblock",
            Topic::BlockConnect => "nevmblockconnect",
            Topic::BlockDisconnect => "nevmblockdisconnect",
        }
    }

    pub fn as_bytes(&self) -> &'static [u8] {
        self.as_str().as_bytes()
    }

    /// Exact, case-sensitive match against the wire bytes
    pub fn from_bytes(bytes: &[u8]) -> Option<Topic> {
        Topic::ALL.into_iter().find(|t| t.as_bytes() == bytes)
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Topic {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Topic::from_bytes(s.as_bytes()).ok_or_else(|| CoreError::UnknownTopic(s.to_string()))
    }
}

impl From<Topic> for Bytes {
    fn from(topic: Topic) -> Self {
        Bytes::from_static(topic.as_bytes())
    }
}
