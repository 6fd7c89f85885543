//! Extras layouts and expiration encoding.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{ProtocolError, Result};

/// Longest expiration sent as a relative offset (30 days); servers read
/// anything larger as an absolute unix time.
pub const RELATIVE_EXPIRY_LIMIT: u64 = 60 * 60 * 24 * 30;

/// Counter expiration meaning "fail instead of creating a missing counter".
pub const NO_AUTO_CREATE: u32 = 0xffff_ffff;

/// Encode a time-to-live as a protocol expiration value.
///
/// `None` and zero mean "never expires". A fractional second rounds up, so
/// a positive time-to-live never encodes as zero.
pub fn encode_expiry(ttl: Option<Duration>) -> u32 {
    let secs = match ttl {
        None => return 0,
        Some(ttl) if ttl.subsec_nanos() > 0 => ttl.as_secs().saturating_add(1),
        Some(ttl) => ttl.as_secs(),
    };
    if secs <= RELATIVE_EXPIRY_LIMIT {
        return secs as u32;
    }
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    now.saturating_add(secs).min(u32::MAX as u64 - 1) as u32
}

/// Set/Add/Replace extras: flags then expiration.
pub fn store(flags: u32, expiration: u32) -> Bytes {
    let mut buf = BytesMut::with_capacity(8);
    buf.put_u32(flags);
    buf.put_u32(expiration);
    buf.freeze()
}

/// Increment/Decrement extras: delta, initial value, expiration.
pub fn counter(delta: u64, initial: u64, expiration: u32) -> Bytes {
    let mut buf = BytesMut::with_capacity(20);
    buf.put_u64(delta);
    buf.put_u64(initial);
    buf.put_u32(expiration);
    buf.freeze()
}

/// Touch / GAT / Flush extras: a single expiration.
pub fn expiration(expiration: u32) -> Bytes {
    Bytes::copy_from_slice(&expiration.to_be_bytes())
}

/// Flags carried in the extras of a get response.
pub fn get_flags(extras: &[u8]) -> Result<u32> {
    match extras.len() {
        0 => Ok(0),
        4 => Ok((&extras[..]).get_u32()),
        actual => Err(ProtocolError::MalformedExtras { expected: 4, actual }),
    }
}

/// Store extras parsed back (servers and tests).
pub fn parse_store(extras: &[u8]) -> Result<(u32, u32)> {
    if extras.len() != 8 {
        return Err(ProtocolError::MalformedExtras {
            expected: 8,
            actual: extras.len(),
        });
    }
    let mut buf = extras;
    Ok((buf.get_u32(), buf.get_u32()))
}

/// Counter extras parsed back (servers and tests).
pub fn parse_counter(extras: &[u8]) -> Result<(u64, u64, u32)> {
    if extras.len() != 20 {
        return Err(ProtocolError::MalformedExtras {
            expected: 20,
            actual: extras.len(),
        });
    }
    let mut buf = extras;
    Ok((buf.get_u64(), buf.get_u64(), buf.get_u32()))
}

/// The 8-byte big-endian counter value of an incr/decr response.
pub fn counter_value(value: &[u8]) -> Result<u64> {
    if value.len() != 8 {
        return Err(ProtocolError::MalformedValue("counter value must be 8 bytes"));
    }
    Ok((&value[..]).get_u64())
}
