//! Key transformation for the wire.

use std::fmt;

use bytes::Bytes;
use corelib::Partitioner;
use protocol::MAX_KEY_LEN;

use crate::error::{ClientError, Result};

/// A caller key paired with the bytes actually sent to the server.
///
/// Keys longer than the protocol limit are replaced on the wire by their
/// hex digest; results are always reported under the original key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireKey {
    original: String,
    wire: Bytes,
}

impl WireKey {
    pub fn new(original: impl Into<String>, partitioner: &dyn Partitioner) -> Result<Self> {
        let original = original.into();
        if original.is_empty() {
            return Err(ClientError::InvalidKey("key must not be empty".into()));
        }
        let wire = if original.len() > MAX_KEY_LEN {
            Bytes::from(partitioner.digest(original.as_bytes()))
        } else {
            Bytes::copy_from_slice(original.as_bytes())
        };
        Ok(Self { original, wire })
    }

    #[inline]
    pub fn original(&self) -> &str {
        &self.original
    }

    #[inline]
    pub fn wire(&self) -> &Bytes {
        &self.wire
    }

    pub fn is_digested(&self) -> bool {
        self.wire.as_ref() != self.original.as_bytes()
    }

    pub fn into_original(self) -> String {
        self.original
    }
}

impl fmt::Display for WireKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.original)
    }
}
