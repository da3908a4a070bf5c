//! 1.125 handshake layouts
//!
//! The crypt key reply announces the version as text, login granted drops
//! the version bytes and the datagram init reply becomes a timestamp.

use super::v168::write_key;
use super::{CryptKeyView, Encoder, EncoderTable, LoginGrantedView, UdpInitView};
use shared::{OutPacket, PacketWriter, ServerCode};

const VERSION_TEXT: &str = "1.125";

pub(super) fn table() -> EncoderTable {
    EncoderTable {
        version: 1125,
        crypt_key,
        login_granted,
        udp_init_reply,
        ..super::v1112::table()
    }
}

fn crypt_key(_: &Encoder, view: &CryptKeyView<'_>) -> OutPacket {
    let (major, minor) = view.build.major_minor();
    let mut w = PacketWriter::new(ServerCode::CryptKey.as_u8());
    w.write_u32_le(VERSION_TEXT.len() as u32)
        .write_bytes(VERSION_TEXT.as_bytes())
        .write_u8(major as u8)
        .write_u8(minor as u8);
    write_key(&mut w, view.stream_key.as_bytes());
    write_key(&mut w, view.datagram_key.as_bytes());
    w.finish()
}

fn login_granted(_: &Encoder, view: &LoginGrantedView<'_>) -> OutPacket {
    let mut w = PacketWriter::new(ServerCode::LoginGranted.as_u8());
    w.write_pascal_string(view.account)
        .write_pascal_string(view.server_name)
        .write_u8(0x05)
        .write_u8(view.color)
        .write_u8(0x00);
    w.finish()
}

fn udp_init_reply(_: &Encoder, view: &UdpInitView<'_>) -> OutPacket {
    let mut w = PacketWriter::new(ServerCode::UdpInitReply.as_u8());
    w.write_u64_le(view.timestamp);
    w.finish()
}
