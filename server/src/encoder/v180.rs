//! 1.80: Catacombs
//!
//! Player creates describe the character's horse and the skill list gains
//! the flagged first chunk and the end-of-list frame.

use super::v174::write_titled_create;
use super::{Encoder, EncoderTable, SkillChunking};
use crate::world::{PlayerSnapshot, ZoneInfo};
use shared::{Expansion, OutPacket};

pub(super) fn table() -> EncoderTable {
    EncoderTable {
        version: 180,
        max_expansion: Expansion::Catacombs,
        skill_chunking: SkillChunking {
            threshold: Some(1500),
            first_subtype_99: true,
            final_frame: true,
        },
        player_create,
        ..super::v176::table()
    }
}

fn player_create(_: &Encoder, player: &PlayerSnapshot, zone: &ZoneInfo) -> OutPacket {
    let mut w = write_titled_create(player, zone);
    match &player.horse {
        Some(horse) => {
            w.write_u8(horse.id)
                .write_u8(horse.barding)
                .write_u16_le(horse.saddle_emblem);
        }
        None => {
            w.write_u8(0x00);
        }
    }
    w.write_u8(0x00);
    w.finish()
}

#[cfg(test)]
mod tests {
    use super::super::fixtures;
    use super::*;
    use crate::world::{HorseInfo, SkillEntry, SkillPage};

    fn encoder() -> Encoder {
        Encoder::new(table())
    }

    #[test]
    fn test_player_create_describes_horse() {
        let mut player = fixtures::player();
        let zone = fixtures::zone();
        let bare = encoder().player_create(&player, &zone);
        assert!(bare.payload.ends_with(&[b'g', 0, 0]));

        player.horse = Some(HorseInfo {
            id: 4,
            barding: 2,
            saddle_emblem: 0x0102,
        });
        let mounted = encoder().player_create(&player, &zone);
        assert!(mounted.payload.ends_with(&[b'g', 4, 2, 0x02, 0x01, 0]));
    }

    #[test]
    fn test_skill_list_flags_first_chunk_and_terminates() {
        let skills: Vec<SkillEntry> = (0..120)
            .map(|i| SkillEntry {
                name: format!("An even longer skill name {:03}", i),
                level: 2,
                page: SkillPage::Styles,
                icon: i,
                bonus: 0,
            })
            .collect();
        let packets = encoder().skill_list(&skills, 2048);
        assert!(packets.len() >= 3);
        assert_eq!(packets[0].payload[2], 99);
        assert_eq!(packets[0].payload[3], 0);
        assert_eq!(packets[1].payload[2], 0x03);
        assert_eq!(&packets.last().unwrap().payload[..], &[0x02, 0, 99, 0]);

        let listed: usize = packets[..packets.len() - 1]
            .iter()
            .map(|p| p.payload[1] as usize)
            .sum();
        assert_eq!(listed, 120);
    }

    #[test]
    fn test_short_skill_list_still_terminates() {
        let skills = vec![SkillEntry {
            name: "Slash".to_string(),
            level: 5,
            page: SkillPage::Specialization,
            icon: 1,
            bonus: 0,
        }];
        let packets = encoder().skill_list(&skills, 2048);
        assert_eq!(packets.len(), 2);
        assert_eq!(&packets[0].payload[..4], &[0x01, 1, 0x03, 0]);
    }
}
