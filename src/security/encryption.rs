//! Contract between the session writer and an encryption engine.
//!
//! The cipher itself lives outside this crate. The writer only needs the
//! block size (to size its scratch buffer) and an in-place encode call that
//! is told which chunk is the last one, so padding is emitted exactly once.

use thiserror::Error;

/// Plaintext marker sent ahead of the ciphertext of every encrypted write.
pub const CRYPT_MARKER: &[u8] = b"00";

/// Failure reported by an encryption engine.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EncryptError {
    #[error("engine rejected {length} bytes")]
    Rejected { length: usize },
    #[error("ciphertext of {produced} bytes exceeds buffer capacity {capacity}")]
    Overflow { produced: usize, capacity: usize },
}

/// Block-cipher style encoder used by [`Session::write`](crate::net::session::Session::write).
pub trait Encryptor: Send {
    /// Cipher block size. `None` means the engine is not usable.
    fn block_size(&self) -> Option<usize>;

    /// Encrypt the first `length` bytes of `buffer` in place.
    ///
    /// `buffer.len()` is the usable capacity. `is_final` is set for the last
    /// chunk of a write. Returns the number of ciphertext bytes produced.
    fn encode(&mut self, buffer: &mut [u8], length: usize, is_final: bool)
        -> Result<usize, EncryptError>;
}

/// Scratch buffer size for a segment: rounded up to whole blocks, with one
/// spare block so final padding always fits.
pub fn crypt_buffer_size(segment_size: usize, block_size: usize) -> usize {
    (segment_size / block_size + 1) * block_size
}
