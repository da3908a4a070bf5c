//! 1.90 position broadcasts carry power bars and the class name

use super::v168::write_player_position;
use super::{Encoder, EncoderTable};
use crate::world::PlayerSnapshot;
use shared::messages::PositionUpdate;
use shared::{OutPacket, PacketWriter, ProtocolFamily, ServerCode};

const CLASS_NAME_WIDTH: usize = 32;

pub(super) fn table() -> EncoderTable {
    EncoderTable {
        version: 190,
        player_position,
        ..super::v180::table()
    }
}

fn player_position(_: &Encoder, update: &PositionUpdate, player: &PlayerSnapshot) -> OutPacket {
    let mut w = PacketWriter::new(ServerCode::PlayerPosition.as_u8());
    write_player_position(&mut w, update, ProtocolFamily::V172);
    w.write_u8(player.mana_percent)
        .write_u8(player.endurance_percent)
        .fill_string(&player.class_name, CLASS_NAME_WIDTH)
        .write_u8(u8::from(player.realm_points_visible))
        .write_u8(0x00);
    w.finish()
}
