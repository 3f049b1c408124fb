//! In-memory doubles for session and worker tests.

use std::io::{self, Cursor, Read, Write};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use crate::net::session::SessionStream;
use crate::security::encryption::{EncryptError, Encryptor};

#[derive(Debug, Default)]
struct StreamLog {
    writes: Vec<Vec<u8>>,
    closed: bool,
}

/// Stream that records every `write` call as one entry.
#[derive(Debug, Clone)]
pub struct RecordingStream {
    log: Arc<Mutex<StreamLog>>,
    input: Arc<Mutex<Cursor<Vec<u8>>>>,
    peer: Option<SocketAddr>,
    fail_after: Option<usize>,
}

impl Default for RecordingStream {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingStream {
    /// Stream with a loopback peer and no input.
    pub fn new() -> Self {
        Self {
            log: Arc::default(),
            input: Arc::default(),
            peer: Some(SocketAddr::from(([127, 0, 0, 1], 40000))),
            fail_after: None,
        }
    }

    pub fn with_peer(mut self, peer: &str) -> Self {
        self.peer = Some(peer.parse().unwrap());
        self
    }

    pub fn without_peer(mut self) -> Self {
        self.peer = None;
        self
    }

    pub fn with_input(self, input: &[u8]) -> Self {
        *self.input.lock().unwrap() = Cursor::new(input.to_vec());
        self
    }

    /// Accept `n` writes, fail every later one.
    pub fn fail_after(mut self, n: usize) -> Self {
        self.fail_after = Some(n);
        self
    }

    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.log.lock().unwrap().writes.clone()
    }

    pub fn bytes(&self) -> Vec<u8> {
        self.writes().concat()
    }

    pub fn is_closed(&self) -> bool {
        self.log.lock().unwrap().closed
    }
}

impl Read for RecordingStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.input.lock().unwrap().read(buf)
    }
}

impl Write for RecordingStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut log = self.log.lock().unwrap();
        if self.fail_after.is_some_and(|n| log.writes.len() >= n) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "peer went away"));
        }
        log.writes.push(buf.to_vec());
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl SessionStream for RecordingStream {
    fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.peer
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "no peer"))
    }

    fn close(&mut self) -> io::Result<()> {
        self.log.lock().unwrap().closed = true;
        Ok(())
    }
}

/// Encryptor that XORs bytes and pads the final chunk to a whole block.
#[derive(Debug, Clone)]
pub struct MockEncryptor {
    block_size: Option<usize>,
    calls: Arc<Mutex<Vec<(usize, bool)>>>,
    fail_on_call: Option<usize>,
    inflate: usize,
}

impl MockEncryptor {
    pub fn new(block_size: usize) -> Self {
        Self {
            block_size: Some(block_size),
            calls: Arc::default(),
            fail_on_call: None,
            inflate: 0,
        }
    }

    pub fn without_block_size() -> Self {
        Self {
            block_size: None,
            ..Self::new(0)
        }
    }

    /// Fail the zero-based `n`th encode call.
    pub fn fail_on_call(mut self, n: usize) -> Self {
        self.fail_on_call = Some(n);
        self
    }

    pub fn inflate_by(mut self, extra: usize) -> Self {
        self.inflate = extra;
        self
    }

    /// `(length, is_final)` of every encode call so far.
    pub fn calls(&self) -> Vec<(usize, bool)> {
        self.calls.lock().unwrap().clone()
    }
}

impl Encryptor for MockEncryptor {
    fn block_size(&self) -> Option<usize> {
        self.block_size
    }

    fn encode(
        &mut self,
        buffer: &mut [u8],
        length: usize,
        is_final: bool,
    ) -> Result<usize, EncryptError> {
        let call = {
            let mut calls = self.calls.lock().unwrap();
            calls.push((length, is_final));
            calls.len() - 1
        };
        if self.fail_on_call == Some(call) {
            return Err(EncryptError::Rejected { length });
        }

        for byte in &mut buffer[..length] {
            *byte ^= 0x5a;
        }
        let produced = if is_final {
            let block = self.block_size.unwrap_or(1).max(1);
            (length / block + 1) * block
        } else {
            length
        };
        Ok(produced + self.inflate)
    }
}
