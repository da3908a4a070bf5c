//! Per-transport cipher contexts
//!
//! Each connection owns one context for the stream transport and a separate
//! one for the datagram transport. A context starts out as plaintext and is
//! switched to a keyed context once the handshake reply has been sent.
//!
//! The keyed context is a positional XOR stream restarted at offset zero for
//! every frame. Restarting per frame lets a receiver decrypt the two-byte
//! length prefix on its own before the rest of the frame has arrived.

use rand::Rng;

/// Length of generated keys in bytes
pub const KEY_LENGTH: usize = 16;

/// Key material for a keyed cipher context
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CipherKey(Vec<u8>);

impl CipherKey {
    /// Wraps existing key material, rejecting empty keys
    pub fn new(bytes: Vec<u8>) -> Option<Self> {
        if bytes.is_empty() {
            None
        } else {
            Some(Self(bytes))
        }
    }

    /// Draws a fresh random key
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let mut bytes = vec![0u8; KEY_LENGTH];
        rng.fill(bytes.as_mut_slice());
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    fn mask(&self, position: usize) -> u8 {
        let len = self.0.len();
        let round = (position / len) as u8;
        self.0[position % len] ^ round.wrapping_mul(0x9D)
    }
}

/// Cipher state for one transport of one connection
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum CipherContext {
    #[default]
    Plaintext,
    Keyed(CipherKey),
}

impl CipherContext {
    /// Applies the cipher in place to `buf`, which starts at frame offset `offset`
    ///
    /// XOR is its own inverse so the same call encrypts and decrypts.
    pub fn apply(&self, offset: usize, buf: &mut [u8]) {
        if let CipherContext::Keyed(key) = self {
            for (i, byte) in buf.iter_mut().enumerate() {
                *byte ^= key.mask(offset + i);
            }
        }
    }

    pub fn is_keyed(&self) -> bool {
        matches!(self, CipherContext::Keyed(_))
    }
}
