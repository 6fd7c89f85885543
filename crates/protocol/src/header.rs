//! Fixed 24-byte packet header.
//!
//! ```text
//! Byte/     0       |       1       |       2       |       3       |
//!    +---------------+---------------+---------------+---------------+
//!   0| Magic         | Opcode        | Key length                    |
//!    +---------------+---------------+---------------+---------------+
//!   4| Extras length | Data type     | vbucket (req) / status (resp) |
//!    +---------------+---------------+---------------+---------------+
//!   8| Total body length (extras + key + value)                      |
//!    +---------------+---------------+---------------+---------------+
//!  12| Opaque                                                        |
//!    +---------------+---------------+---------------+---------------+
//!  16| CAS                                                           |
//!    |                                                               |
//!    +---------------+---------------+---------------+---------------+
//! ```
//!
//! All multi-byte fields are big-endian.

use bytes::{Buf, BufMut};

use crate::error::{ProtocolError, Result};
use crate::opcode::Opcode;
use crate::status::Status;

pub const HEADER_LEN: usize = 24;
pub const MAGIC_REQUEST: u8 = 0x80;
pub const MAGIC_RESPONSE: u8 = 0x81;

/// Raw data type; the protocol defines no other value.
pub const DATA_TYPE_RAW: u8 = 0x00;

/// Header of a client request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestHeader {
    pub opcode: u8,
    pub key_len: u16,
    pub extras_len: u8,
    pub data_type: u8,
    pub vbucket: u16,
    pub body_len: u32,
    pub opaque: u32,
    pub cas: u64,
}

impl RequestHeader {
    pub fn opcode(&self) -> Option<Opcode> {
        Opcode::from_u8(self.opcode)
    }

    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_u8(MAGIC_REQUEST);
        dst.put_u8(self.opcode);
        dst.put_u16(self.key_len);
        dst.put_u8(self.extras_len);
        dst.put_u8(self.data_type);
        dst.put_u16(self.vbucket);
        dst.put_u32(self.body_len);
        dst.put_u32(self.opaque);
        dst.put_u64(self.cas);
    }

    pub fn decode(raw: &[u8; HEADER_LEN]) -> Result<Self> {
        let mut buf = &raw[..];
        let magic = buf.get_u8();
        if magic != MAGIC_REQUEST {
            return Err(ProtocolError::BadMagic(magic));
        }
        let header = Self {
            opcode: buf.get_u8(),
            key_len: buf.get_u16(),
            extras_len: buf.get_u8(),
            data_type: buf.get_u8(),
            vbucket: buf.get_u16(),
            body_len: buf.get_u32(),
            opaque: buf.get_u32(),
            cas: buf.get_u64(),
        };
        check_lengths(header.extras_len, header.key_len, header.body_len)?;
        Ok(header)
    }
}

/// Header of a server response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseHeader {
    pub opcode: u8,
    pub key_len: u16,
    pub extras_len: u8,
    pub data_type: u8,
    pub status: Status,
    pub body_len: u32,
    pub opaque: u32,
    pub cas: u64,
}

impl ResponseHeader {
    pub fn opcode(&self) -> Option<Opcode> {
        Opcode::from_u8(self.opcode)
    }

    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_u8(MAGIC_RESPONSE);
        dst.put_u8(self.opcode);
        dst.put_u16(self.key_len);
        dst.put_u8(self.extras_len);
        dst.put_u8(self.data_type);
        dst.put_u16(self.status.code());
        dst.put_u32(self.body_len);
        dst.put_u32(self.opaque);
        dst.put_u64(self.cas);
    }

    /// Parse and validate a response header.
    ///
    /// `max_body` bounds the declared body so a corrupt length cannot make
    /// the reader allocate gigabytes.
    pub fn decode(raw: &[u8; HEADER_LEN], max_body: u32) -> Result<Self> {
        let mut buf = &raw[..];
        let magic = buf.get_u8();
        if magic != MAGIC_RESPONSE {
            return Err(ProtocolError::BadMagic(magic));
        }
        let header = Self {
            opcode: buf.get_u8(),
            key_len: buf.get_u16(),
            extras_len: buf.get_u8(),
            data_type: buf.get_u8(),
            status: Status::from_u16(buf.get_u16()),
            body_len: buf.get_u32(),
            opaque: buf.get_u32(),
            cas: buf.get_u64(),
        };
        if header.body_len > max_body {
            return Err(ProtocolError::BodyTooLarge {
                declared: header.body_len,
                limit: max_body,
            });
        }
        check_lengths(header.extras_len, header.key_len, header.body_len)?;
        Ok(header)
    }

    /// Length of the value section.
    pub fn value_len(&self) -> usize {
        self.body_len as usize - self.extras_len as usize - self.key_len as usize
    }
}

fn check_lengths(extras: u8, key: u16, body: u32) -> Result<()> {
    if extras as u32 + key as u32 > body {
        return Err(ProtocolError::InconsistentLengths { extras, key, body });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_header_layout_is_byte_exact() {
        let header = RequestHeader {
            opcode: Opcode::Set.as_u8(),
            key_len: 5,
            extras_len: 8,
            data_type: DATA_TYPE_RAW,
            vbucket: 0,
            body_len: 8 + 5 + 3,
            opaque: 0xdead_beef,
            cas: 0x0102_0304_0506_0708,
        };
        let mut buf = Vec::new();
        header.encode(&mut buf);
        assert_eq!(
            buf,
            [
                0x80, 0x01, 0x00, 0x05, // magic, opcode, key length
                0x08, 0x00, 0x00, 0x00, // extras, data type, vbucket
                0x00, 0x00, 0x00, 0x10, // total body
                0xde, 0xad, 0xbe, 0xef, // opaque
                0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, // cas
            ]
        );
        let raw: [u8; HEADER_LEN] = buf.try_into().unwrap();
        assert_eq!(RequestHeader::decode(&raw).unwrap(), header);
    }

    #[test]
    fn test_response_header_decode() {
        let raw: [u8; HEADER_LEN] = [
            0x81, 0x00, 0x00, 0x00, //
            0x04, 0x00, 0x00, 0x01, // status: key not found
            0x00, 0x00, 0x00, 0x09, //
            0x00, 0x00, 0x00, 0x07, //
            0, 0, 0, 0, 0, 0, 0, 42,
        ];
        let header = ResponseHeader::decode(&raw, 1024).unwrap();
        assert_eq!(header.status, Status::KeyNotFound);
        assert_eq!(header.extras_len, 4);
        assert_eq!(header.body_len, 9);
        assert_eq!(header.value_len(), 5);
        assert_eq!(header.opaque, 7);
        assert_eq!(header.cas, 42);
    }

    #[test]
    fn test_response_header_rejects_bad_magic() {
        let mut raw = [0u8; HEADER_LEN];
        raw[0] = 0x80;
        assert_eq!(ResponseHeader::decode(&raw, 1024), Err(ProtocolError::BadMagic(0x80)));
    }

    #[test]
    fn test_response_header_rejects_oversized_body() {
        let mut raw = [0u8; HEADER_LEN];
        raw[0] = MAGIC_RESPONSE;
        raw[8..12].copy_from_slice(&2048u32.to_be_bytes());
        assert!(matches!(
            ResponseHeader::decode(&raw, 1024),
            Err(ProtocolError::BodyTooLarge { declared: 2048, limit: 1024 })
        ));
    }

    #[test]
    fn test_response_header_rejects_inconsistent_lengths() {
        let mut raw = [0u8; HEADER_LEN];
        raw[0] = MAGIC_RESPONSE;
        raw[3] = 10; // key length
        raw[11] = 4; // body length
        assert!(matches!(
            ResponseHeader::decode(&raw, 1024),
            Err(ProtocolError::InconsistentLengths { .. })
        ));
    }
}
