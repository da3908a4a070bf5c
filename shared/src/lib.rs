//! # Shared Wire Protocol
//!
//! Everything both ends of a connection must agree on byte for byte: the
//! frame layout, the checksum, the per-transport cipher contexts, the opcode
//! tables and the client build numbering. The crate performs no I/O; the
//! server and the headless client drive it from their own sockets.
//!
//! ## Frame layout
//!
//! ```text
//! stream:   [len:u16][code^0xA8:u8][session:u16][payload][checksum:u16]
//! datagram: [len:u16][sequence:u16][code^0xA8:u8][session:u16][payload][checksum:u16]
//! ```
//!
//! `len` counts payload bytes. The checksum covers everything in front of
//! it, and the complete frame is passed through the transport's cipher
//! context before it is written.
//!
//! ## Usage Example
//!
//! ```rust
//! use shared::{DecodeOutcome, FrameCodec, FrameHeader, DEFAULT_MAX_PAYLOAD};
//!
//! let codec = FrameCodec::stream(DEFAULT_MAX_PAYLOAD);
//! let header = FrameHeader { code: 0xA3, session: 7, sequence: None };
//! let bytes = codec.encode(header, b"ping").unwrap();
//!
//! match codec.decode(&bytes).unwrap() {
//!     DecodeOutcome::Frame { frame, consumed } => {
//!         assert_eq!(frame.code(), 0xA3);
//!         assert_eq!(consumed, bytes.len());
//!     }
//!     DecodeOutcome::NeedMoreData => unreachable!(),
//! }
//! ```

pub mod checksum;
pub mod cipher;
pub mod codec;
pub mod frame;
pub mod messages;
pub mod opcode;
pub mod state;
pub mod version;

pub use checksum::checksum;
pub use cipher::{CipherContext, CipherKey};
pub use codec::{
    CodecError, DecodeOutcome, FrameCodec, FrameHeader, CHECKSUM_SIZE, CODE_KEY,
    DATAGRAM_HEADER_SIZE, DEFAULT_MAX_PAYLOAD, STREAM_HEADER_SIZE,
};
pub use frame::{Frame, OutPacket, PacketWriter, Transport};
pub use opcode::{ChatLocation, ChatType, ClientCode, LoginError, ServerCode};
pub use state::{ConnectionState, Requirement};
pub use version::{ClientBuild, Expansion, ProtocolFamily, MAX_BUILD, MIN_BUILD};
