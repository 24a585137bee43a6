use nevm_core::{hash_sha256d, Hash, Topic};
use rand::Rng;

/// Hashes placed in a `BlockAnnounce` reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnnounceHashes {
    pub topic_hash: Hash,
    pub block_hash: Hash,
    pub state_hash: Hash,
}

/// Derives the announce hashes for a `nevmblock` notification.
///
/// The execution node decides how these are computed; the loop only needs
/// them to be non-zero and unique per call.
pub trait HashSource: Send + Sync {
    fn announce_hashes(&self, topic: Topic, notification: &[u8]) -> AnnounceHashes;
}

/// Double SHA-256 of a random 32-bit nonce in decimal, used for every field.
#[derive(Debug, Clone, Copy, Default)]
pub struct NonceHashSource;

impl HashSource for NonceHashSource {
    fn announce_hashes(&self, _topic: Topic, _notification: &[u8]) -> AnnounceHashes {
        let nonce: i32 = rand::thread_rng().gen();
        let hash = hash_sha256d(nonce.to_string().as_bytes());
        AnnounceHashes {
            topic_hash: hash,
            block_hash: hash,
            state_hash: hash,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nonce_hashes_non_zero() {
        let hashes = NonceHashSource.announce_hashes(Topic::Block, b"");
        assert!(!hashes.topic_hash.is_zero());
        assert!(!hashes.block_hash.is_zero());
        assert!(!hashes.state_hash.is_zero());
    }

    #[test]
    fn test_nonce_hashes_vary() {
        let distinct: std::collections::HashSet<_> = (0..16)
            .map(|_| NonceHashSource.announce_hashes(Topic::Block, b"").topic_hash)
            .collect();
        assert!(distinct.len() > 1);
    }
}
