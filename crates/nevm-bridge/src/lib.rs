//! NEVM Bridge - Notification loops between the consensus and execution nodes
//!
//! This crate runs one notification loop per topic on the execution side and
//! provides the consensus-side notifier that feeds them.

pub mod error;
pub mod hasher;
pub mod notification;
pub mod notifier;
pub mod session;

pub use error::BridgeError;
pub use hasher::{AnnounceHashes, HashSource, NonceHashSource};
pub use notification::{LoopState, NotificationLoop};
pub use notifier::{Ack, AckListener, ConsensusNotifier};
pub use session::{BridgeSession, SessionConfig, TopicBinding};

/// Default time a loop blocks in `receive` before retrying.
pub const DEFAULT_RECEIVE_TIMEOUT_MS: u64 = 60_000;
