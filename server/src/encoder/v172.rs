//! 1.72 widened the zone field and switched to the compact player create

use super::v168::{write_player_position, zone_offsets};
use super::{Encoder, EncoderTable};
use crate::world::{PlayerSnapshot, ZoneInfo};
use shared::messages::PositionUpdate;
use shared::{OutPacket, PacketWriter, ProtocolFamily, ServerCode};

pub(super) fn table() -> EncoderTable {
    EncoderTable {
        version: 172,
        player_position,
        player_create,
        ..super::v168::table()
    }
}

fn player_position(_: &Encoder, update: &PositionUpdate, _player: &PlayerSnapshot) -> OutPacket {
    let mut w = PacketWriter::new(ServerCode::PlayerPosition.as_u8());
    write_player_position(&mut w, update, ProtocolFamily::V172);
    w.finish()
}

pub(super) fn appearance_flags(player: &PlayerSnapshot) -> u8 {
    let mut flags = (player.realm & 0x03) << 2;
    if !player.alive {
        flags |= 0x01;
    }
    if player.underwater {
        flags |= 0x02;
    }
    if player.stealthed {
        flags |= 0x10;
    }
    flags
}

/// Everything up to and including the appearance flags
pub(super) fn write_create_head(w: &mut PacketWriter, player: &PlayerSnapshot, zone: &ZoneInfo) {
    let (x, y) = zone_offsets(player, zone);
    let face = &player.face;
    w.write_u16(player.session)
        .write_u16(player.object_id)
        .write_u16(player.model)
        .write_u16(player.position.z as u16)
        .write_u16(zone.skin)
        .write_u16(x)
        .write_u16(y)
        .write_u16(player.position.heading)
        .write_bytes(&face[..4])
        .write_u8(player.level)
        .write_bytes(&face[4..])
        .write_u8(appearance_flags(player));
}

fn player_create(_: &Encoder, player: &PlayerSnapshot, zone: &ZoneInfo) -> OutPacket {
    let mut w = PacketWriter::new(ServerCode::PlayerCreate172.as_u8());
    write_create_head(&mut w, player, zone);
    w.write_pascal_string(&player.name)
        .write_pascal_string(&player.guild)
        .write_pascal_string(&player.last_name)
        .write_u8(0x00);
    w.finish()
}

#[cfg(test)]
mod tests {
    use super::super::fixtures;
    use super::*;

    #[test]
    fn test_player_position_writes_wide_zone() {
        let update = PositionUpdate {
            session: 5,
            zone: 0x0107,
            ..Default::default()
        };
        let player = fixtures::player();
        let old = super::super::v168::table();
        let old = Encoder::new(old).player_position(&update, &player);
        let new = Encoder::new(table()).player_position(&update, &player);
        assert_eq!(&old.payload[10..12], &[0x07, 0x00]);
        assert_eq!(&new.payload[10..12], &[0x01, 0x07]);
    }

    #[test]
    fn test_player_create_compact_layout() {
        let mut player = fixtures::player();
        player.alive = false;
        player.stealthed = true;
        let packet = Encoder::new(table()).player_create(&player, &fixtures::zone());
        let p = &packet.payload;
        assert_eq!(packet.code, ServerCode::PlayerCreate172.as_u8());
        assert_eq!(&p[4..6], &[0x01, 0x23]);
        assert_eq!(&p[8..10], &[0, 9]);
        assert_eq!(&p[16..20], &[1, 2, 3, 4]);
        assert_eq!(p[20], 50);
        assert_eq!(&p[21..24], &[5, 6, 7]);
        assert_eq!(p[24], (1 << 2) | 0x01 | 0x10);
        assert_eq!(p[25], 6);
    }
}
