pub mod hash;

pub use hash::{hash_sha256, hash_sha256d, Hash};
