//! Decoded frames and the payload writer used to build outgoing ones

use crate::codec::CodecError;
use bytes::{BufMut, Bytes, BytesMut};

/// Which transport a frame travels on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transport {
    /// Reliable, ordered TCP stream
    Stream,
    /// Best-effort UDP datagram
    Datagram,
}

/// One decoded protocol message
///
/// A frame is immutable apart from its read cursor. Field reads are
/// big-endian unless the method name says otherwise, and every read fails
/// with [`CodecError::Truncated`] instead of panicking when the payload runs
/// out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    code: u8,
    session: u16,
    sequence: Option<u16>,
    payload: Bytes,
    cursor: usize,
}

impl Frame {
    pub fn new(code: u8, session: u16, sequence: Option<u16>, payload: Bytes) -> Self {
        Self {
            code,
            session,
            sequence,
            payload,
            cursor: 0,
        }
    }

    /// Opcode after the wire obfuscation has been removed
    pub fn code(&self) -> u8 {
        self.code
    }

    /// Session id the peer wrote into the header
    pub fn session(&self) -> u16 {
        self.session
    }

    /// Datagram sequence counter, `None` for stream frames
    pub fn sequence(&self) -> Option<u16> {
        self.sequence
    }

    pub fn transport(&self) -> Transport {
        if self.sequence.is_some() {
            Transport::Datagram
        } else {
            Transport::Stream
        }
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn position(&self) -> usize {
        self.cursor
    }

    pub fn remaining(&self) -> usize {
        self.payload.len() - self.cursor
    }

    /// Moves the cursor back to the start of the payload
    pub fn rewind(&mut self) {
        self.cursor = 0;
    }

    fn take(&mut self, n: usize) -> Result<&[u8], CodecError> {
        if self.remaining() < n {
            return Err(CodecError::Truncated {
                needed: n,
                available: self.remaining(),
            });
        }
        let start = self.cursor;
        self.cursor += n;
        Ok(&self.payload[start..start + n])
    }

    pub fn skip(&mut self, n: usize) -> Result<(), CodecError> {
        self.take(n).map(|_| ())
    }

    pub fn read_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, CodecError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn read_u16_le(&mut self) -> Result<u16, CodecError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn read_u32(&mut self) -> Result<u32, CodecError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_u32_le(&mut self) -> Result<u32, CodecError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<Bytes, CodecError> {
        let start = self.cursor;
        self.take(n)?;
        Ok(self.payload.slice(start..start + n))
    }

    /// Reads a one-byte length followed by that many bytes of text
    pub fn read_pascal_string(&mut self) -> Result<String, CodecError> {
        let len = self.read_u8()? as usize;
        let raw = self.take(len)?;
        Ok(String::from_utf8_lossy(raw).into_owned())
    }

    /// Reads a fixed-width, zero-padded text field
    pub fn read_fixed_string(&mut self, width: usize) -> Result<String, CodecError> {
        let raw = self.take(width)?;
        let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
        Ok(String::from_utf8_lossy(&raw[..end]).into_owned())
    }
}

/// Outgoing message before framing: an opcode and its payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutPacket {
    pub code: u8,
    pub payload: Bytes,
}

/// Builds a payload field by field
///
/// Mirrors the reads offered by [`Frame`]. Positions are payload offsets so
/// encoders can go back and patch a count once they know it.
#[derive(Debug, Default)]
pub struct PacketWriter {
    code: u8,
    buf: BytesMut,
}

impl PacketWriter {
    pub fn new(code: u8) -> Self {
        Self {
            code,
            buf: BytesMut::with_capacity(64),
        }
    }

    pub fn code(&self) -> u8 {
        self.code
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn write_u8(&mut self, value: u8) -> &mut Self {
        self.buf.put_u8(value);
        self
    }

    pub fn write_u16(&mut self, value: u16) -> &mut Self {
        self.buf.put_u16(value);
        self
    }

    pub fn write_u16_le(&mut self, value: u16) -> &mut Self {
        self.buf.put_u16_le(value);
        self
    }

    pub fn write_u32(&mut self, value: u32) -> &mut Self {
        self.buf.put_u32(value);
        self
    }

    pub fn write_u32_le(&mut self, value: u32) -> &mut Self {
        self.buf.put_u32_le(value);
        self
    }

    pub fn write_u64_le(&mut self, value: u64) -> &mut Self {
        self.buf.put_u64_le(value);
        self
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.buf.put_slice(bytes);
        self
    }

    pub fn fill(&mut self, value: u8, count: usize) -> &mut Self {
        self.buf.put_bytes(value, count);
        self
    }

    /// Writes a one-byte length then the text, truncated to 255 bytes
    pub fn write_pascal_string(&mut self, text: &str) -> &mut Self {
        let raw = text.as_bytes();
        let len = raw.len().min(u8::MAX as usize);
        self.buf.put_u8(len as u8);
        self.buf.put_slice(&raw[..len]);
        self
    }

    /// Writes the text followed by a zero terminator
    pub fn write_string(&mut self, text: &str) -> &mut Self {
        self.buf.put_slice(text.as_bytes());
        self.buf.put_u8(0);
        self
    }

    /// Writes the text into a fixed-width field, zero padded or truncated
    pub fn fill_string(&mut self, text: &str, width: usize) -> &mut Self {
        let raw = text.as_bytes();
        let len = raw.len().min(width);
        self.buf.put_slice(&raw[..len]);
        self.buf.put_bytes(0, width - len);
        self
    }

    /// Overwrites a byte already written at payload offset `position`
    ///
    /// Out-of-range positions are ignored.
    pub fn patch_u8(&mut self, position: usize, value: u8) {
        if let Some(slot) = self.buf.get_mut(position) {
            *slot = value;
        }
    }

    pub fn finish(self) -> OutPacket {
        OutPacket {
            code: self.code,
            payload: self.buf.freeze(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_of(payload: &[u8]) -> Frame {
        Frame::new(0x10, 7, None, Bytes::copy_from_slice(payload))
    }

    #[test]
    fn test_sequential_reads() {
        let mut frame = frame_of(&[0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07]);
        assert_eq!(frame.read_u8().unwrap(), 0x01);
        assert_eq!(frame.read_u16().unwrap(), 0x0203);
        assert_eq!(frame.read_u16_le().unwrap(), 0x0504);
        assert_eq!(frame.remaining(), 2);
        assert_eq!(frame.position(), 5);
    }

    #[test]
    fn test_read_past_end_is_truncated_error() {
        let mut frame = frame_of(&[0x01]);
        match frame.read_u32() {
            Err(CodecError::Truncated { needed, available }) => {
                assert_eq!(needed, 4);
                assert_eq!(available, 1);
            }
            other => panic!("unexpected result: {:?}", other),
        }
        // A failed read leaves the cursor untouched
        assert_eq!(frame.read_u8().unwrap(), 0x01);
    }

    #[test]
    fn test_strings_round_trip_through_writer() {
        let mut writer = PacketWriter::new(0x20);
        writer
            .write_pascal_string("Avalon")
            .fill_string("abc", 6)
            .write_u32_le(0xDEADBEEF);
        let packet = writer.finish();

        let mut frame = Frame::new(packet.code, 0, None, packet.payload);
        assert_eq!(frame.read_pascal_string().unwrap(), "Avalon");
        assert_eq!(frame.read_fixed_string(6).unwrap(), "abc");
        assert_eq!(frame.read_u32_le().unwrap(), 0xDEADBEEF);
        assert_eq!(frame.remaining(), 0);
    }

    #[test]
    fn test_pascal_string_truncates_long_text() {
        let long = "x".repeat(300);
        let mut writer = PacketWriter::new(0);
        writer.write_pascal_string(&long);
        assert_eq!(writer.len(), 256);
    }

    #[test]
    fn test_patch_and_terminated_string() {
        let mut writer = PacketWriter::new(0);
        writer.write_u8(0).write_string("hi");
        writer.patch_u8(0, 9);
        writer.patch_u8(100, 1);
        let packet = writer.finish();
        assert_eq!(&packet.payload[..], &[9, b'h', b'i', 0]);
    }

    #[test]
    fn test_transport_follows_sequence() {
        assert_eq!(frame_of(&[]).transport(), Transport::Stream);
        let datagram = Frame::new(1, 1, Some(5), Bytes::new());
        assert_eq!(datagram.transport(), Transport::Datagram);
    }
}
