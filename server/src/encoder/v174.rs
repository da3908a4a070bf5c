//! 1.74: Trials of Atlantis
//!
//! Region data travels with the position reply, player creates carry prefix
//! and title, equipment gets extension bytes and the skill list is chunked.

use super::v168::{write_equipment, write_position_core, EquipmentLayout};
use super::v172::write_create_head;
use super::{Encoder, EncoderTable, SkillChunking};
use crate::world::{ItemInfo, PlayerSnapshot, ZoneInfo};
use shared::{Expansion, OutPacket, PacketWriter, ServerCode};

/// Dungeon offsets are sent in units of this many world units
const OFFSET_UNIT: i32 = 0x2000;

pub(super) fn table() -> EncoderTable {
    EncoderTable {
        version: 174,
        max_expansion: Expansion::TrialsOfAtlantis,
        skill_chunking: SkillChunking {
            threshold: Some(1000),
            first_subtype_99: false,
            final_frame: false,
        },
        position_and_object_id,
        player_create,
        equipment_update,
        ..super::v173::table()
    }
}

fn position_and_object_id(_: &Encoder, player: &PlayerSnapshot, zone: &ZoneInfo, server_name: &str) -> OutPacket {
    let mut w = PacketWriter::new(ServerCode::PositionAndObjectId.as_u8());
    write_position_core(&mut w, player, zone);
    if zone.is_dungeon {
        w.write_u8((zone.x_offset / OFFSET_UNIT) as u8)
            .write_u8((zone.y_offset / OFFSET_UNIT) as u8);
    } else {
        w.write_u8(0).write_u8(0);
    }
    w.write_u16(zone.skin)
        .write_pascal_string(server_name)
        .write_u8(0x00);
    w.finish()
}

/// Compact create with prefix and title
pub(super) fn write_titled_create(player: &PlayerSnapshot, zone: &ZoneInfo) -> PacketWriter {
    let mut w = PacketWriter::new(ServerCode::PlayerCreate172.as_u8());
    write_create_head(&mut w, player, zone);
    w.write_u8(0x00)
        .write_pascal_string(&player.name)
        .write_pascal_string(&player.guild)
        .write_pascal_string(&player.last_name)
        .write_pascal_string(&player.prefix)
        .write_pascal_string(&player.title);
    w
}

fn player_create(_: &Encoder, player: &PlayerSnapshot, zone: &ZoneInfo) -> OutPacket {
    let mut w = write_titled_create(player, zone);
    w.write_u8(0x00);
    w.finish()
}

fn equipment_update(_: &Encoder, player: &PlayerSnapshot, items: &[ItemInfo]) -> OutPacket {
    write_equipment(
        player,
        items,
        EquipmentLayout {
            extension: true,
            ..Default::default()
        },
    )
}

#[cfg(test)]
mod tests {
    use super::super::fixtures;
    use super::*;
    use crate::world::{slot, SkillEntry, SkillPage};

    fn encoder() -> Encoder {
        Encoder::new(table())
    }

    #[test]
    fn test_position_reply_carries_region_data() {
        let mut zone = fixtures::zone();
        zone.is_dungeon = true;
        let packet = encoder().position_and_object_id(&fixtures::player(), &zone, "srv");
        let p = &packet.payload;
        assert_eq!(&p[16..18], &[2, 3]);
        assert_eq!(&p[18..20], &[0, 9]);
        assert_eq!(&p[20..24], &[3, b's', b'r', b'v']);
        assert_eq!(p[24], 0);
        assert_eq!(p.len(), 25);

        zone.is_dungeon = false;
        let packet = encoder().position_and_object_id(&fixtures::player(), &zone, "srv");
        assert_eq!(&packet.payload[16..18], &[0, 0]);
    }

    #[test]
    fn test_player_create_appends_prefix_and_title() {
        let packet = encoder().player_create(&fixtures::player(), &fixtures::zone());
        let p = &packet.payload;
        assert_eq!(p[25], 0);
        assert!(p.ends_with(&[3, b'S', b'i', b'r', 4, b'K', b'i', b'n', b'g', 0]));
    }

    #[test]
    fn test_equipment_extension_only_outside_weapon_slots() {
        let player = fixtures::player();
        let mut sword = fixtures::item();
        sword.slot = slot::RIGHT_HAND;
        let mut chest = fixtures::item();
        chest.slot = 25;
        let packet = encoder().equipment_update(&player, &[sword, chest]);
        let p = &packet.payload;
        assert_eq!(&p[5..8], &[10, 0x02, 0xAB]);
        assert_eq!(&p[8..12], &[25, 0x02, 0xAB, 2]);
        assert_eq!(p.len(), 12);
    }

    #[test]
    fn test_large_skill_list_is_chunked() {
        let skills: Vec<SkillEntry> = (0..150)
            .map(|i| SkillEntry {
                name: format!("A rather long skill name {:03}", i),
                level: 1,
                page: SkillPage::Specialization,
                icon: i,
                bonus: 0,
            })
            .collect();
        let packets = encoder().skill_list(&skills, 2048);
        assert!(packets.len() > 1);

        let mut next = 0usize;
        for packet in &packets {
            assert_eq!(packet.payload[0], 0x01);
            assert_eq!(packet.payload[2], 0x03);
            assert_eq!(packet.payload[3] as usize, next);
            next += packet.payload[1] as usize;
        }
        assert_eq!(next, 150);
    }
}
