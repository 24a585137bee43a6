pub mod announce;
pub mod connect;
pub mod envelope;
pub mod topic;

pub use announce::{decode_block_announce, encode_block_announce, BlockAnnounce};
pub use connect::{decode_block_connect, encode_block_connect, BlockConnect};
pub use envelope::Envelope;
pub use topic::{Topic, ACK_CONNECTED, ACK_DISCONNECTED};
