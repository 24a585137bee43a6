use serde::{Deserialize, Serialize};

use crate::codec::{BinaryReader, BinaryWriter};
use crate::crypto::Hash;
use crate::error::CoreError;

/// Payload of `nevmblockconnect`: the execution-layer view of a block the
/// consensus node has connected.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BlockConnect {
    /// Consensus block that carried the execution payload
    pub block_hash: Hash,
    /// Serialized execution block
    pub block_data: Vec<u8>,
    /// Whether the consensus node blocks until the execution node answers
    pub wait_for_response: bool,
}

impl BlockConnect {
    /// Encoded size with empty block data
    pub const MIN_LEN: usize = Hash::LEN + 4 + 1;

    pub fn new(block_hash: Hash, block_data: impl Into<Vec<u8>>, wait_for_response: bool) -> Self {
        BlockConnect {
            block_hash,
            block_data: block_data.into(),
            wait_for_response,
        }
    }

    pub fn encoded_len(&self) -> usize {
        Self::MIN_LEN + self.block_data.len()
    }
}

/// `[block_hash 32][data_len u32][block_data][wait_for_response u8]`
pub fn encode_block_connect(connect: &BlockConnect) -> Result<Vec<u8>, CoreError> {
    let mut writer = BinaryWriter::with_capacity(connect.encoded_len());
    writer
        .write_hash(&connect.block_hash)
        .write_var_bytes(&connect.block_data)?
        .write_bool(connect.wait_for_response);
    Ok(writer.into_bytes())
}

/// Decodes a full record. Truncated input or trailing bytes are rejected.
pub fn decode_block_connect(bytes: &[u8]) -> Result<BlockConnect, CoreError> {
    let mut reader = BinaryReader::new(bytes);
    let block_hash = reader.read_hash()?;
    let block_data = reader.read_var_bytes()?.to_vec();
    let wait_for_response = reader.read_bool()?;
    reader.finish()?;

    Ok(BlockConnect {
        block_hash,
        block_data,
        wait_for_response,
    })
}
