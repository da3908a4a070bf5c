//! 1.109: Darkness Rising, items report their bonus level

use super::v168::{write_item, ItemLayout};
use super::{Encoder, EncoderTable};
use crate::world::ItemInfo;
use shared::{Expansion, PacketWriter};

pub(super) fn table() -> EncoderTable {
    EncoderTable {
        version: 1109,
        max_expansion: Expansion::DarknessRising,
        write_item_data,
        ..super::v190::table()
    }
}

fn write_item_data(_: &Encoder, w: &mut PacketWriter, item: Option<&ItemInfo>) {
    write_item(
        w,
        item,
        ItemLayout {
            bonus_level: true,
            ..Default::default()
        },
    );
}

#[cfg(test)]
mod tests {
    use super::super::fixtures;
    use super::*;

    #[test]
    fn test_bonus_level_follows_bonus() {
        let mut w = PacketWriter::new(0);
        Encoder::new(table()).write_item_data(&mut w, Some(&fixtures::item()));
        let p = w.finish().payload;
        assert_eq!(p[10], 35);
        assert_eq!(p[11], 44);
        assert_eq!(&p[12..14], &[0x02, 0xAB]);
    }

    #[test]
    fn test_inventory_uses_selected_item_layout() {
        let encoder = Encoder::new(table());
        let packets = encoder.inventory_update(&fixtures::player(), &[fixtures::item()], 0);
        let p = &packets[0].payload;
        assert_eq!(p[4], 10);
        assert_eq!(p[5 + 11], 44);
    }
}
