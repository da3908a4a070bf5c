//! 1.73 messages lead with a marker word before the sender session

use super::v168::write_message_body;
use super::{Encoder, EncoderTable};
use shared::{ChatLocation, ChatType, OutPacket, PacketWriter, ServerCode};

pub(super) fn table() -> EncoderTable {
    EncoderTable {
        version: 173,
        message,
        ..super::v172::table()
    }
}

fn message(_: &Encoder, session: u16, text: &str, kind: ChatType, location: ChatLocation) -> OutPacket {
    let mut w = PacketWriter::new(ServerCode::Message.as_u8());
    w.write_u16(0xFFFF).write_u16(session);
    write_message_body(&mut w, text, kind, location);
    w.finish()
}
