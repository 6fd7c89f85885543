//! Partitioner abstraction for consistent hashing.
//!
//! Partitioners are the hash calculator of the client: they turn keys into
//! tokens that can be placed on the ring, and produce the fixed-length digest
//! used on the wire for keys that exceed the protocol's length ceiling.

pub mod sip;
pub mod traits;
pub mod xxh3;

pub use sip::SipPartitioner;
pub use traits::{Partitioner, DIGEST_LEN};
pub use xxh3::Xxh3Partitioner;
