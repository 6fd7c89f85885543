//! A single TCP connection to a cache node.

use std::io;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use protocol::{ProtocolError, Response, ResponseHeader, HEADER_LEN};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;
use tracing::{debug, warn};

/// Failure while reading a response frame.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Buffered TCP connection with liveness tracking.
///
/// Any I/O or framing error marks the connection dead; a dead connection is
/// destroyed by its pool instead of being reused. The flag is never reset.
pub struct Connection {
    id: u64,
    endpoint: String,
    stream: BufWriter<TcpStream>,
    scratch: BytesMut,
    alive: bool,
    authenticated: bool,
    in_exchange: bool,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("endpoint", &self.endpoint)
            .field("alive", &self.alive)
            .field("authenticated", &self.authenticated)
            .finish()
    }
}

impl Connection {
    pub async fn connect(id: u64, endpoint: &str, timeout: Duration) -> io::Result<Self> {
        let stream = match tokio::time::timeout(timeout, TcpStream::connect(endpoint)).await {
            Ok(stream) => stream?,
            Err(_) => {
                return Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("connect timed out after {timeout:?}"),
                ))
            }
        };
        // Requests are small and latency-bound.
        stream.set_nodelay(true)?;
        debug!(id, endpoint, "opened connection");
        Ok(Self {
            id,
            endpoint: endpoint.to_owned(),
            stream: BufWriter::new(stream),
            scratch: BytesMut::with_capacity(1024),
            alive: true,
            authenticated: false,
            in_exchange: false,
        })
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    #[inline]
    pub fn is_alive(&self) -> bool {
        self.alive
    }

    pub fn mark_dead(&mut self) {
        self.alive = false;
    }

    #[inline]
    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    pub fn mark_authenticated(&mut self) {
        self.authenticated = true;
    }

    /// Alive and not abandoned half way through an exchange.
    pub fn is_reusable(&self) -> bool {
        self.alive && !self.in_exchange
    }

    pub(crate) fn begin_exchange(&mut self) {
        self.in_exchange = true;
    }

    pub(crate) fn end_exchange(&mut self) {
        self.in_exchange = false;
    }

    pub(crate) fn scratch_mut(&mut self) -> &mut BytesMut {
        &mut self.scratch
    }

    /// Write all segments and flush.
    pub async fn write(&mut self, segments: &[Bytes]) -> io::Result<()> {
        let result = async {
            for segment in segments {
                self.stream.write_all(segment).await?;
            }
            self.stream.flush().await
        }
        .await;
        if result.is_err() {
            self.alive = false;
        }
        result
    }

    /// Read exactly `len` bytes.
    pub async fn read_exact(&mut self, len: usize) -> io::Result<Bytes> {
        let mut buf = BytesMut::zeroed(len);
        match self.stream.read_exact(&mut buf).await {
            Ok(_) => Ok(buf.freeze()),
            Err(err) => {
                self.alive = false;
                Err(err)
            }
        }
    }

    /// Read and validate one response frame.
    pub async fn read_response(&mut self, max_body: u32) -> Result<Response, FrameError> {
        let head = self.read_exact(HEADER_LEN).await?;
        let raw: [u8; HEADER_LEN] = head[..]
            .try_into()
            .map_err(|_| io::Error::new(io::ErrorKind::UnexpectedEof, "short header"))?;
        let header = match ResponseHeader::decode(&raw, max_body) {
            Ok(header) => header,
            Err(err) => {
                self.alive = false;
                return Err(err.into());
            }
        };
        let body = self.read_exact(header.body_len as usize).await?;
        Response::from_parts(header, body).map_err(|err| {
            self.alive = false;
            err.into()
        })
    }

    /// Discard bytes the server sent while the connection sat idle.
    ///
    /// Returns the number of stray bytes dropped. A closed peer marks the
    /// connection dead and returns an error.
    pub fn drain_stray(&mut self) -> io::Result<usize> {
        let mut drained = 0;
        let mut buf = [0u8; 512];
        loop {
            match self.stream.get_ref().try_read(&mut buf) {
                Ok(0) => {
                    self.alive = false;
                    return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "peer closed connection"));
                }
                Ok(n) => drained += n,
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) => {
                    self.alive = false;
                    return Err(err);
                }
            }
        }
        if drained > 0 {
            warn!(id = self.id, endpoint = %self.endpoint, drained, "discarded stray bytes on idle connection");
        }
        Ok(drained)
    }
}
