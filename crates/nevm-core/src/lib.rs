//! NEVM Core - Topics, envelopes, and block payload codecs
//!
//! This crate provides the wire-level types shared by both sides of the
//! consensus/execution notification bridge.

pub mod codec;
pub mod crypto;
pub mod error;
pub mod types;

pub use codec::{BinaryReader, BinaryWriter};
pub use crypto::{hash_sha256, hash_sha256d, Hash};
pub use error::CoreError;
pub use types::*;
