//! Core partitioner trait definitions.

use crate::token::Token;

/// Length in bytes of the hex digest produced by [`Partitioner::digest`].
pub const DIGEST_LEN: usize = 64;

/// A partitioner converts keys into tokens for placement on the hash ring.
///
/// Partitioners are stateless and thread-safe, allowing concurrent
/// token generation without synchronization overhead. A single instance is
/// built by the composition root and shared through an `Arc`.
pub trait Partitioner: Send + Sync + 'static {
    /// Converts a key into a token.
    ///
    /// Must be deterministic across processes: two clients with the same
    /// partitioner route the same key to the same ring position.
    fn partition(&self, key: &[u8]) -> Token;

    /// Fixed-length digest of a key.
    ///
    /// Always [`DIGEST_LEN`] lowercase hex characters (BLAKE3).
    fn digest(&self, key: &[u8]) -> String {
        blake3::hash(key).to_hex().to_string()
    }

    /// Returns the name of this partitioner.
    fn name(&self) -> &'static str;
}
