//! Request and response packets.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{ProtocolError, Result};
use crate::header::{RequestHeader, ResponseHeader, DATA_TYPE_RAW, HEADER_LEN};
use crate::opcode::Opcode;
use crate::status::Status;
use crate::MAX_KEY_LEN;

/// A request packet: header fields plus extras, key and value sections.
///
/// Sections are `Bytes` so a large value can be written to the socket as
/// its own segment without being copied into the header buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub opcode: Opcode,
    pub vbucket: u16,
    pub opaque: u32,
    pub cas: u64,
    pub extras: Bytes,
    pub key: Bytes,
    pub value: Bytes,
}

impl Request {
    pub fn new(opcode: Opcode) -> Self {
        Self {
            opcode,
            vbucket: 0,
            opaque: 0,
            cas: 0,
            extras: Bytes::new(),
            key: Bytes::new(),
            value: Bytes::new(),
        }
    }

    pub fn with_opaque(mut self, opaque: u32) -> Self {
        self.opaque = opaque;
        self
    }

    pub fn with_cas(mut self, cas: u64) -> Self {
        self.cas = cas;
        self
    }

    pub fn with_extras(mut self, extras: impl Into<Bytes>) -> Self {
        self.extras = extras.into();
        self
    }

    pub fn with_key(mut self, key: impl Into<Bytes>) -> Self {
        self.key = key.into();
        self
    }

    pub fn with_value(mut self, value: impl Into<Bytes>) -> Self {
        self.value = value.into();
        self
    }

    /// Total body length: extras + key + value.
    pub fn body_len(&self) -> usize {
        self.extras.len() + self.key.len() + self.value.len()
    }

    pub fn header(&self) -> Result<RequestHeader> {
        if self.key.len() > MAX_KEY_LEN {
            return Err(ProtocolError::KeyTooLong(self.key.len()));
        }
        let extras_len = u8::try_from(self.extras.len()).map_err(|_| ProtocolError::MalformedExtras {
            expected: u8::MAX as usize,
            actual: self.extras.len(),
        })?;
        let body_len = u32::try_from(self.body_len())
            .map_err(|_| ProtocolError::MalformedValue("body exceeds 4 GiB"))?;
        Ok(RequestHeader {
            opcode: self.opcode.as_u8(),
            key_len: self.key.len() as u16,
            extras_len,
            data_type: DATA_TYPE_RAW,
            vbucket: self.vbucket,
            body_len,
            opaque: self.opaque,
            cas: self.cas,
        })
    }

    /// Encode the whole packet into `dst`.
    pub fn encode(&self, dst: &mut BytesMut) -> Result<()> {
        let header = self.header()?;
        dst.reserve(HEADER_LEN + self.body_len());
        header.encode(dst);
        dst.put_slice(&self.extras);
        dst.put_slice(&self.key);
        dst.put_slice(&self.value);
        Ok(())
    }

    /// Encode into write segments: header, extras and key are copied into
    /// `scratch`; a non-empty value is appended as its own segment.
    pub fn encode_segments(&self, scratch: &mut BytesMut, out: &mut Vec<Bytes>) -> Result<()> {
        let header = self.header()?;
        scratch.reserve(HEADER_LEN + self.extras.len() + self.key.len());
        header.encode(scratch);
        scratch.put_slice(&self.extras);
        scratch.put_slice(&self.key);
        out.push(scratch.split().freeze());
        if !self.value.is_empty() {
            out.push(self.value.clone());
        }
        Ok(())
    }

    /// Rebuild a request from a decoded header and its body.
    pub fn from_parts(header: RequestHeader, body: Bytes) -> Result<Self> {
        let opcode = header
            .opcode()
            .ok_or(ProtocolError::UnexpectedOpcode(header.opcode))?;
        let (extras, key, value) = split_body(body, header.extras_len, header.key_len)?;
        Ok(Self {
            opcode,
            vbucket: header.vbucket,
            opaque: header.opaque,
            cas: header.cas,
            extras,
            key,
            value,
        })
    }
}

/// A response packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub header: ResponseHeader,
    pub extras: Bytes,
    pub key: Bytes,
    pub value: Bytes,
}

impl Response {
    /// Start building a response (used by servers and tests).
    pub fn new(opcode: Opcode, status: Status, opaque: u32) -> Self {
        Self {
            header: ResponseHeader {
                opcode: opcode.as_u8(),
                key_len: 0,
                extras_len: 0,
                data_type: DATA_TYPE_RAW,
                status,
                body_len: 0,
                opaque,
                cas: 0,
            },
            extras: Bytes::new(),
            key: Bytes::new(),
            value: Bytes::new(),
        }
    }

    pub fn with_cas(mut self, cas: u64) -> Self {
        self.header.cas = cas;
        self
    }

    pub fn with_extras(mut self, extras: impl Into<Bytes>) -> Self {
        self.extras = extras.into();
        self.sync_lengths();
        self
    }

    pub fn with_key(mut self, key: impl Into<Bytes>) -> Self {
        self.key = key.into();
        self.sync_lengths();
        self
    }

    pub fn with_value(mut self, value: impl Into<Bytes>) -> Self {
        self.value = value.into();
        self.sync_lengths();
        self
    }

    fn sync_lengths(&mut self) {
        self.header.extras_len = self.extras.len() as u8;
        self.header.key_len = self.key.len() as u16;
        self.header.body_len = (self.extras.len() + self.key.len() + self.value.len()) as u32;
    }

    /// Split a body read off the wire into its sections.
    pub fn from_parts(header: ResponseHeader, body: Bytes) -> Result<Self> {
        if body.len() != header.body_len as usize {
            return Err(ProtocolError::InconsistentLengths {
                extras: header.extras_len,
                key: header.key_len,
                body: body.len() as u32,
            });
        }
        let (extras, key, value) = split_body(body, header.extras_len, header.key_len)?;
        Ok(Self {
            header,
            extras,
            key,
            value,
        })
    }

    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(HEADER_LEN + self.header.body_len as usize);
        self.header.encode(dst);
        dst.put_slice(&self.extras);
        dst.put_slice(&self.key);
        dst.put_slice(&self.value);
    }

    #[inline]
    pub fn status(&self) -> Status {
        self.header.status
    }

    #[inline]
    pub fn opaque(&self) -> u32 {
        self.header.opaque
    }

    #[inline]
    pub fn cas(&self) -> u64 {
        self.header.cas
    }

    #[inline]
    pub fn opcode(&self) -> Option<Opcode> {
        self.header.opcode()
    }

    /// Error text carried in the value of a failed response.
    pub fn error_message(&self) -> Option<String> {
        if self.status().is_success() || self.value.is_empty() {
            return None;
        }
        Some(String::from_utf8_lossy(&self.value).into_owned())
    }
}

fn split_body(mut body: Bytes, extras_len: u8, key_len: u16) -> Result<(Bytes, Bytes, Bytes)> {
    let extras_len = extras_len as usize;
    let key_len = key_len as usize;
    if extras_len + key_len > body.len() {
        return Err(ProtocolError::InconsistentLengths {
            extras: extras_len as u8,
            key: key_len as u16,
            body: body.len() as u32,
        });
    }
    let extras = body.split_to(extras_len);
    let key = body.split_to(key_len);
    Ok((extras, key, body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::MAGIC_REQUEST;

    #[test]
    fn test_request_encode_layout() {
        let request = Request::new(Opcode::Set)
            .with_opaque(9)
            .with_extras(vec![0, 0, 0, 1, 0, 0, 0, 60])
            .with_key("hello")
            .with_value("world");
        let mut buf = BytesMut::new();
        request.encode(&mut buf).unwrap();

        assert_eq!(buf.len(), HEADER_LEN + 8 + 5 + 5);
        assert_eq!(buf[0], MAGIC_REQUEST);
        assert_eq!(buf[1], 0x01);
        assert_eq!(&buf[2..4], &[0, 5]);
        assert_eq!(buf[4], 8);
        assert_eq!(&buf[8..12], &18u32.to_be_bytes());
        assert_eq!(&buf[HEADER_LEN + 8..HEADER_LEN + 13], b"hello");
        assert_eq!(&buf[HEADER_LEN + 13..], b"world");
    }

    #[test]
    fn test_segments_match_contiguous_encoding() {
        let request = Request::new(Opcode::Append)
            .with_key("k")
            .with_value(Bytes::from_static(b"tail"));
        let mut contiguous = BytesMut::new();
        request.encode(&mut contiguous).unwrap();

        let mut scratch = BytesMut::new();
        let mut segments = Vec::new();
        request.encode_segments(&mut scratch, &mut segments).unwrap();
        assert_eq!(segments.len(), 2);
        let joined: Vec<u8> = segments.iter().flat_map(|s| s.iter().copied()).collect();
        assert_eq!(joined, contiguous.to_vec());
    }

    #[test]
    fn test_request_rejects_long_key() {
        let request = Request::new(Opcode::Get).with_key(vec![b'k'; MAX_KEY_LEN + 1]);
        assert_eq!(request.header(), Err(ProtocolError::KeyTooLong(MAX_KEY_LEN + 1)));
        let request = Request::new(Opcode::Get).with_key(vec![b'k'; MAX_KEY_LEN]);
        assert!(request.header().is_ok());
    }

    #[test]
    fn test_response_round_trip_recovers_sections() {
        let response = Response::new(Opcode::GetK, Status::NoError, 3)
            .with_cas(0xfeed)
            .with_extras(vec![0, 0, 0, 7])
            .with_key("user:1")
            .with_value("payload");
        let mut buf = BytesMut::new();
        response.encode(&mut buf);

        let raw: [u8; HEADER_LEN] = buf[..HEADER_LEN].try_into().unwrap();
        let header = ResponseHeader::decode(&raw, 1 << 20).unwrap();
        let body = buf.split_off(HEADER_LEN).freeze();
        let decoded = Response::from_parts(header, body).unwrap();

        assert_eq!(decoded, response);
        assert_eq!(&decoded.key[..], b"user:1");
        assert_eq!(&decoded.value[..], b"payload");
        assert_eq!(decoded.cas(), 0xfeed);
    }

    #[test]
    fn test_error_message_only_on_failure() {
        let ok = Response::new(Opcode::Get, Status::NoError, 0).with_value("v");
        assert_eq!(ok.error_message(), None);
        let miss = Response::new(Opcode::Get, Status::KeyNotFound, 0).with_value("Not found");
        assert_eq!(miss.error_message().as_deref(), Some("Not found"));
    }
}
