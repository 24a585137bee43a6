//! NEVM Bus - Topic-addressed pub/sub endpoints over TCP
//!
//! Publishers bind and fan envelopes out to every connection subscribed to
//! the envelope's topic. Subscribers connect lazily, filter by exact topic
//! and verify sequence ordering. Every endpoint is created from a
//! [`Context`]; terminating the context unblocks and stops all of them.

pub mod address;
pub mod context;
pub mod error;
pub mod frame;
pub mod publisher;
pub mod subscriber;

pub use address::Endpoint;
pub use context::Context;
pub use error::BusError;
pub use frame::{Message, MultipartCodec};
pub use publisher::{Publisher, Sequencing};
pub use subscriber::Subscriber;

/// Envelopes buffered per publisher before slow connections start lagging.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1000;

/// Largest single frame accepted from a peer.
pub const MAX_FRAME_LEN: usize = 32 * 1024 * 1024;
