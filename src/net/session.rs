//! One accepted connection and its chunked writer.
//!
//! # Responsibilities
//! - Own the socket from accept until the worker disposes of it
//! - Split replies into `segment_size` chunks, each sent with one blocking write
//! - Frame encrypted replies: marker first, then one ciphertext chunk per segment
//! - Keep the encryption scratch buffer for the lifetime of the session
//!
//! Writes block without a timeout. A peer that stops reading stalls the
//! caller (the single worker thread) until the kernel gives up on the socket.

use std::collections::TryReserveError;
use std::fmt;
use std::io::{self, Read, Write};
use std::net::{IpAddr, Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;

use crate::observability::metrics;
use crate::security::encryption::{crypt_buffer_size, EncryptError, Encryptor, CRYPT_MARKER};

/// Capacity of the plaintext request buffer.
pub const MAX_LENGTH: usize = 1024;

/// Default upper bound for one socket write.
pub const DEFAULT_SEGMENT_SIZE: usize = 48 * 1024;

/// Canned acknowledgement of the echo mode, terminator included.
pub const ANSWER: &[u8] = b"Answer!\n\0";

static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a session, used to correlate log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn next() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Error type for session I/O.
#[derive(Debug, Error)]
pub enum SessionError {
    /// A chunk could not be written; `written` counts bytes already on the wire.
    #[error("socket write of {attempted} bytes failed after {written} bytes sent: {source}")]
    Send {
        attempted: usize,
        written: usize,
        #[source]
        source: io::Error,
    },
    /// The engine reported no block size, or zero.
    #[error("encryption engine has no usable block size")]
    NoBlockSize,
    /// The ciphertext scratch buffer could not be grown.
    #[error("cannot allocate {size} byte encryption buffer: {source}")]
    Allocation {
        size: usize,
        #[source]
        source: TryReserveError,
    },
    /// The engine failed or produced more than the buffer holds.
    #[error("encryption failed: {0}")]
    Encrypt(#[from] EncryptError),
    /// Reading the request failed.
    #[error("socket read failed: {0}")]
    Read(#[source] io::Error),
    /// The socket no longer knows its peer.
    #[error("peer address unavailable: {0}")]
    PeerAddress(#[source] io::Error),
}

/// Byte stream a session can own. Implemented for [`TcpStream`].
pub trait SessionStream: Read + Write + Send {
    fn peer_addr(&self) -> io::Result<SocketAddr>;

    /// Close both directions; the descriptor itself goes away on drop.
    fn close(&mut self) -> io::Result<()>;
}

impl SessionStream for TcpStream {
    fn peer_addr(&self) -> io::Result<SocketAddr> {
        TcpStream::peer_addr(self)
    }

    fn close(&mut self) -> io::Result<()> {
        self.shutdown(Shutdown::Both)
    }
}

/// Textual peer address as handed to the allow-list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    /// Address without port; IPv4-mapped peers appear as plain IPv4.
    pub ip: String,
    /// True for a genuine IPv6 peer.
    pub ipv6: bool,
}

impl PeerInfo {
    fn from_addr(addr: SocketAddr) -> Self {
        let ip = match addr.ip() {
            IpAddr::V6(v6) => v6.to_ipv4_mapped().map(IpAddr::V4).unwrap_or(IpAddr::V6(v6)),
            v4 => v4,
        };
        Self {
            ip: ip.to_string(),
            ipv6: ip.is_ipv6(),
        }
    }
}

/// An accepted connection.
pub struct Session<S = TcpStream> {
    id: ConnectionId,
    stream: S,
    data: Box<[u8; MAX_LENGTH]>,
    crypt_buf: Vec<u8>,
    segment_size: usize,
}

impl<S: SessionStream> Session<S> {
    pub fn new(stream: S, segment_size: usize) -> Self {
        Self {
            id: ConnectionId::next(),
            stream,
            data: Box::new([0; MAX_LENGTH]),
            crypt_buf: Vec::new(),
            segment_size: segment_size.max(1),
        }
    }

    /// Identifier used in every log line about this session.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Largest chunk handed to one socket write.
    pub fn segment_size(&self) -> usize {
        self.segment_size
    }

    /// Bytes currently reserved for ciphertext; zero until the first encrypted write.
    pub fn crypt_buffer_len(&self) -> usize {
        self.crypt_buf.len()
    }

    /// Request bytes captured by the last [`read_request`](Self::read_request).
    pub fn request(&self, length: usize) -> &[u8] {
        &self.data[..length.min(MAX_LENGTH)]
    }

    /// Peer address of the socket, as the allow-list sees it.
    pub fn peer_info(&self) -> Result<PeerInfo, SessionError> {
        self.stream
            .peer_addr()
            .map(PeerInfo::from_addr)
            .map_err(SessionError::PeerAddress)
    }

    /// Send `data` in segments, encrypting each one when an engine is given.
    ///
    /// Returns the number of bytes put on the wire, marker included. The first
    /// failing chunk ends the write; nothing is retried.
    pub fn write(
        &mut self,
        data: &[u8],
        encryptor: Option<&mut dyn Encryptor>,
    ) -> Result<usize, SessionError> {
        if data.is_empty() {
            tracing::debug!(connection_id = %self.id, "Empty write ignored");
            return Ok(0);
        }

        let written = match encryptor {
            Some(engine) => self.write_encrypted(data, engine),
            None => self.write_plain(data),
        }?;

        metrics::record_bytes_sent(written);
        Ok(written)
    }

    fn write_plain(&mut self, data: &[u8]) -> Result<usize, SessionError> {
        let mut written = 0;
        for chunk in data.chunks(self.segment_size) {
            written += send_chunk(&mut self.stream, chunk, written)?;
            tracing::trace!(
                connection_id = %self.id,
                sent = chunk.len(),
                left = data.len() - written,
                "Chunk sent"
            );
        }
        Ok(written)
    }

    fn write_encrypted(
        &mut self,
        data: &[u8],
        engine: &mut dyn Encryptor,
    ) -> Result<usize, SessionError> {
        let capacity = self.alloc_crypt_buffer(engine)?;

        let mut written = 0;
        let mut remaining = data.len();
        for (index, chunk) in data.chunks(self.segment_size).enumerate() {
            let buf = &mut self.crypt_buf[..capacity];
            buf[..chunk.len()].copy_from_slice(chunk);

            let is_final = remaining == chunk.len();
            let produced = engine
                .encode(buf, chunk.len(), is_final)
                .and_then(|produced| {
                    if produced > capacity {
                        Err(EncryptError::Overflow { produced, capacity })
                    } else {
                        Ok(produced)
                    }
                })
                .map_err(|e| {
                    tracing::error!(connection_id = %self.id, error = %e, "Cannot encrypt reply");
                    SessionError::Encrypt(e)
                })?;

            if index == 0 {
                written += send_chunk(&mut self.stream, CRYPT_MARKER, written)?;
            }
            written += send_chunk(&mut self.stream, &self.crypt_buf[..produced], written)?;
            remaining -= chunk.len();

            tracing::trace!(
                connection_id = %self.id,
                plain = chunk.len(),
                encrypted = produced,
                left = remaining,
                "Encrypted chunk sent"
            );
        }
        Ok(written)
    }

    /// Size the scratch buffer for `engine`. Grows, never shrinks.
    fn alloc_crypt_buffer(&mut self, engine: &dyn Encryptor) -> Result<usize, SessionError> {
        let block_size = match engine.block_size() {
            Some(size) if size > 0 => size,
            other => {
                tracing::error!(
                    connection_id = %self.id,
                    block_size = ?other,
                    "Encryption requested but engine has no usable block size"
                );
                return Err(SessionError::NoBlockSize);
            }
        };

        let required = crypt_buffer_size(self.segment_size, block_size);
        if self.crypt_buf.len() < required {
            self.crypt_buf
                .try_reserve_exact(required - self.crypt_buf.len())
                .map_err(|source| {
                    tracing::error!(connection_id = %self.id, size = required, "Encryption buffer allocation failed");
                    SessionError::Allocation {
                        size: required,
                        source,
                    }
                })?;
            self.crypt_buf.resize(required, 0);
            tracing::debug!(
                connection_id = %self.id,
                block_size,
                buffer = required,
                "Encryption buffer allocated"
            );
        }
        Ok(self.crypt_buf.len())
    }

    /// Read one request into the plaintext buffer. Returns the byte count.
    pub fn read_request(&mut self) -> Result<usize, SessionError> {
        self.stream
            .read(&mut self.data[..])
            .map_err(SessionError::Read)
    }

    /// Echo mode: read a request and answer with [`ANSWER`].
    ///
    /// Kept for protocol compatibility checks, not used for real replies.
    pub fn acknowledge(&mut self) -> Result<usize, SessionError> {
        let length = self.read_request()?;
        tracing::debug!(connection_id = %self.id, length, "Request received");
        self.write(ANSWER, None)
    }

    /// Shut the socket down. Errors are logged; the session is dropped anyway.
    pub fn close(&mut self) {
        if let Err(e) = self.stream.close() {
            tracing::debug!(connection_id = %self.id, error = %e, "Socket shutdown failed");
        }
    }
}

impl<S> fmt::Debug for Session<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("segment_size", &self.segment_size)
            .field("crypt_buffer", &self.crypt_buf.len())
            .finish()
    }
}

/// Blocking write of exactly `chunk.len()` bytes.
fn send_chunk<W: Write>(sink: &mut W, chunk: &[u8], written: usize) -> Result<usize, SessionError> {
    if chunk.is_empty() {
        tracing::warn!("Empty buffer passed to socket write");
        return Ok(0);
    }
    sink.write_all(chunk).map_err(|source| {
        tracing::debug!(attempted = chunk.len(), error = %source, "Socket write failed");
        SessionError::Send {
            attempted: chunk.len(),
            written,
            source,
        }
    })?;
    Ok(chunk.len())
}
