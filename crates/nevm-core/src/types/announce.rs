use serde::{Deserialize, Serialize};

use crate::codec::{BinaryReader, BinaryWriter};
use crate::crypto::Hash;
use crate::error::CoreError;

/// Payload of `nevmblock`: a produced block header plus its execution-state
/// commitment, keyed by an opaque topic hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockAnnounce {
    /// 256-bit little-endian integer
    pub topic_hash: Hash,
    pub block_hash: Hash,
    pub state_hash: Hash,
    pub topic: Vec<u8>,
}

impl BlockAnnounce {
    /// Size of the fixed-width prefix
    pub const FIXED_LEN: usize = Hash::LEN * 3;

    pub fn new(topic_hash: Hash, block_hash: Hash, state_hash: Hash, topic: impl Into<Vec<u8>>) -> Self {
        BlockAnnounce {
            topic_hash,
            block_hash,
            state_hash,
            topic: topic.into(),
        }
    }

    pub fn encoded_len(&self) -> usize {
        Self::FIXED_LEN + self.topic.len()
    }
}

/// `[topic_hash 32][block_hash 32][state_hash 32][topic ..]`
pub fn encode_block_announce(announce: &BlockAnnounce) -> Vec<u8> {
    let mut writer = BinaryWriter::with_capacity(announce.encoded_len());
    writer
        .write_hash(&announce.topic_hash)
        .write_hash(&announce.block_hash)
        .write_hash(&announce.state_hash)
        .write_bytes(&announce.topic);
    writer.into_bytes()
}

/// The topic is the trailing field and runs to the end of the payload.
pub fn decode_block_announce(bytes: &[u8]) -> Result<BlockAnnounce, CoreError> {
    let mut reader = BinaryReader::new(bytes);
    let topic_hash = reader.read_hash()?;
    let block_hash = reader.read_hash()?;
    let state_hash = reader.read_hash()?;
    let topic = reader.read_to_end().to_vec();
    reader.finish()?;

    Ok(BlockAnnounce {
        topic_hash,
        block_hash,
        state_hash,
        topic,
    })
}
