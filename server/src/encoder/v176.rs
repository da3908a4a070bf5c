//! 1.76 narrowed the equipment effect and flags the new emblem set on
//! shields and cloaks

use super::v168::{write_equipment, EquipmentLayout};
use super::{Encoder, EncoderTable};
use crate::world::{ItemInfo, PlayerSnapshot};
use shared::OutPacket;

pub(super) const LAYOUT: EquipmentLayout = EquipmentLayout {
    extension: true,
    emblem_slot_flag: true,
    narrow_effect: true,
};

pub(super) fn table() -> EncoderTable {
    EncoderTable {
        version: 176,
        equipment_update,
        ..super::v174::table()
    }
}

fn equipment_update(_: &Encoder, player: &PlayerSnapshot, items: &[ItemInfo]) -> OutPacket {
    write_equipment(player, items, LAYOUT)
}
