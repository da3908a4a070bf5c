//! Frame codec: length framing, opcode obfuscation, checksum and cipher
//!
//! Stream frames are laid out as
//! `[len:u16][code:u8][session:u16][payload:len][checksum:u16]` and datagram
//! frames insert a `[sequence:u16]` after the length. All integers are
//! big-endian, the opcode is XORed with [`CODE_KEY`] and the checksum covers
//! every byte in front of it. The whole frame, checksum included, then goes
//! through the transport's cipher context.

use crate::checksum::checksum;
use crate::cipher::CipherContext;
use crate::frame::{Frame, Transport};
use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Constant every opcode is XORed with on the wire
pub const CODE_KEY: u8 = 0xA8;

pub const LENGTH_SIZE: usize = 2;
pub const STREAM_HEADER_SIZE: usize = 5;
pub const DATAGRAM_HEADER_SIZE: usize = 7;
pub const CHECKSUM_SIZE: usize = 2;

/// Default cap on the declared payload length of inbound frames
pub const DEFAULT_MAX_PAYLOAD: usize = 2048;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("bad frame checksum (frame 0x{expected:04X}, calculated 0x{actual:04X})")]
    Checksum { expected: u16, actual: u16 },
    #[error("declared payload length {declared} exceeds maximum {max}")]
    FrameTooLarge { declared: usize, max: usize },
    #[error("frame truncated: needed {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },
}

/// Header fields of an outgoing frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub code: u8,
    pub session: u16,
    /// Present on datagram frames only
    pub sequence: Option<u16>,
}

/// Result of a decode attempt over an accumulator
#[derive(Debug)]
pub enum DecodeOutcome {
    Frame { frame: Frame, consumed: usize },
    NeedMoreData,
}

/// Encoder/decoder for one transport of one connection
#[derive(Debug, Clone)]
pub struct FrameCodec {
    transport: Transport,
    cipher: CipherContext,
    max_payload: usize,
}

impl FrameCodec {
    pub fn stream(max_payload: usize) -> Self {
        Self {
            transport: Transport::Stream,
            cipher: CipherContext::Plaintext,
            max_payload,
        }
    }

    pub fn datagram(max_payload: usize) -> Self {
        Self {
            transport: Transport::Datagram,
            cipher: CipherContext::Plaintext,
            max_payload,
        }
    }

    pub fn transport(&self) -> Transport {
        self.transport
    }

    pub fn cipher(&self) -> &CipherContext {
        &self.cipher
    }

    pub fn set_cipher(&mut self, cipher: CipherContext) {
        self.cipher = cipher;
    }

    pub fn max_payload(&self) -> usize {
        self.max_payload
    }

    pub fn header_size(&self) -> usize {
        match self.transport {
            Transport::Stream => STREAM_HEADER_SIZE,
            Transport::Datagram => DATAGRAM_HEADER_SIZE,
        }
    }

    /// Total wire size of a frame carrying `payload_len` bytes
    pub fn frame_size(&self, payload_len: usize) -> usize {
        self.header_size() + payload_len + CHECKSUM_SIZE
    }

    /// Frames, checksums and encrypts one message
    ///
    /// Datagram codecs write `header.sequence` (zero when absent); stream
    /// codecs ignore it. Only payloads that cannot be described by the
    /// 16-bit length field are refused here, outbound size policy is the
    /// caller's business.
    pub fn encode(&self, header: FrameHeader, payload: &[u8]) -> Result<BytesMut, CodecError> {
        if payload.len() > u16::MAX as usize {
            return Err(CodecError::FrameTooLarge {
                declared: payload.len(),
                max: u16::MAX as usize,
            });
        }

        let mut buf = BytesMut::with_capacity(self.frame_size(payload.len()));
        buf.put_u16(payload.len() as u16);
        if self.transport == Transport::Datagram {
            buf.put_u16(header.sequence.unwrap_or(0));
        }
        buf.put_u8(header.code ^ CODE_KEY);
        buf.put_u16(header.session);
        buf.put_slice(payload);
        let sum = checksum(&buf);
        buf.put_u16(sum);

        self.cipher.apply(0, &mut buf);
        Ok(buf)
    }

    /// Reads the payload length a buffer declares, decrypting only the prefix
    pub fn declared_length(&self, buf: &[u8]) -> Option<usize> {
        if buf.len() < LENGTH_SIZE {
            return None;
        }
        let mut prefix = [buf[0], buf[1]];
        self.cipher.apply(0, &mut prefix);
        Some(u16::from_be_bytes(prefix) as usize)
    }

    /// Attempts to take one frame off the front of `buf`
    ///
    /// Returns [`DecodeOutcome::NeedMoreData`] without consuming anything when
    /// the buffer holds less than a whole frame.
    pub fn decode(&self, buf: &[u8]) -> Result<DecodeOutcome, CodecError> {
        let declared = match self.declared_length(buf) {
            Some(len) => len,
            None => return Ok(DecodeOutcome::NeedMoreData),
        };

        if declared > self.max_payload {
            return Err(CodecError::FrameTooLarge {
                declared,
                max: self.max_payload,
            });
        }

        let total = self.frame_size(declared);
        if buf.len() < total {
            return Ok(DecodeOutcome::NeedMoreData);
        }

        let mut plain = BytesMut::from(&buf[..total]);
        self.cipher.apply(0, &mut plain);

        let body_end = total - CHECKSUM_SIZE;
        let expected = u16::from_be_bytes([plain[body_end], plain[body_end + 1]]);
        let actual = checksum(&plain[..body_end]);
        if expected != actual {
            return Err(CodecError::Checksum { expected, actual });
        }

        let (sequence, code_at) = match self.transport {
            Transport::Stream => (None, LENGTH_SIZE),
            Transport::Datagram => (
                Some(u16::from_be_bytes([plain[2], plain[3]])),
                LENGTH_SIZE + 2,
            ),
        };
        let code = plain[code_at] ^ CODE_KEY;
        let session = u16::from_be_bytes([plain[code_at + 1], plain[code_at + 2]]);

        let plain: Bytes = plain.freeze();
        let payload = plain.slice(self.header_size()..body_end);

        Ok(DecodeOutcome::Frame {
            frame: Frame::new(code, session, sequence, payload),
            consumed: total,
        })
    }
}
