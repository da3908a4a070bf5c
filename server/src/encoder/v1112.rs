//! 1.112 item data grew a byte after the object type

use super::v168::{write_item, ItemLayout};
use super::{Encoder, EncoderTable};
use crate::world::ItemInfo;
use shared::PacketWriter;

pub(super) fn table() -> EncoderTable {
    EncoderTable {
        version: 1112,
        write_item_data,
        ..super::v1110::table()
    }
}

fn write_item_data(_: &Encoder, w: &mut PacketWriter, item: Option<&ItemInfo>) {
    write_item(
        w,
        item,
        ItemLayout {
            type_padding: true,
            bonus_level: true,
        },
    );
}
