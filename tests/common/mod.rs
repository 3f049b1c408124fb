//! Shared utilities for port integration tests.

#![allow(dead_code)]

use std::io::Read;
use std::net::{Ipv4Addr, SocketAddr, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use agent_port::config::{self, AgentConfig, SharedConfig};
use agent_port::security::encryption::{EncryptError, Encryptor};
use agent_port::{ExternalPort, Reply};

/// Configuration for tests: ephemeral port and a short worker wake delay.
pub fn test_config() -> AgentConfig {
    let mut config = AgentConfig::default();
    config.port.port = 0;
    config.port.wake_delay_ms = 20;
    config
}

pub fn shared_test_config() -> SharedConfig {
    config::shared(test_config())
}

/// Poll until `cond` holds, failing the test after five seconds.
pub fn wait_until(what: &str, cond: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(5));
    }
}

/// Start `port` and return a loopback address that reaches its listener.
pub fn start_port(port: &ExternalPort, reply: Arc<dyn Reply>) -> SocketAddr {
    assert!(port.start(reply), "port refused to start");
    wait_until("listener", || port.local_addr().is_some());
    let bound = port.local_addr().unwrap();
    SocketAddr::from((Ipv4Addr::LOCALHOST, bound.port()))
}

/// Connect and read until the port closes the connection.
pub fn fetch(addr: SocketAddr) -> Vec<u8> {
    let mut stream = TcpStream::connect(addr).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    let mut received = Vec::new();
    stream.read_to_end(&mut received).unwrap();
    received
}

/// Toy block cipher: XOR with 0xff, zero padding on the final chunk.
pub struct XorEncryptor {
    pub block_size: usize,
}

impl Encryptor for XorEncryptor {
    fn block_size(&self) -> Option<usize> {
        Some(self.block_size)
    }

    fn encode(
        &mut self,
        buffer: &mut [u8],
        length: usize,
        is_final: bool,
    ) -> Result<usize, EncryptError> {
        for byte in &mut buffer[..length] {
            *byte ^= 0xff;
        }
        if !is_final {
            return Ok(length);
        }
        let padded = length.div_ceil(self.block_size) * self.block_size;
        buffer[length..padded].fill(0);
        Ok(padded)
    }
}
