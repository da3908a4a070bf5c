//! 1.110: Labyrinth of the Minotaur, trainer levels are capped

use super::v168::write_trainer_window;
use super::{Encoder, EncoderTable};
use crate::world::SpecEntry;
use shared::{Expansion, OutPacket};

const TRAINER_LEVEL_CAP: u8 = 50;

pub(super) fn table() -> EncoderTable {
    EncoderTable {
        version: 1110,
        max_expansion: Expansion::LabyrinthOfTheMinotaur,
        trainer_window,
        ..super::v1109::table()
    }
}

fn trainer_window(_: &Encoder, specs: &[SpecEntry], points: u8) -> OutPacket {
    write_trainer_window(specs, points, Some(TRAINER_LEVEL_CAP))
}
