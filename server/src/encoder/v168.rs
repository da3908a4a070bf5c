//! Base layouts, first understood by 1.68 clients

use super::{CryptKeyView, Encoder, EncoderTable, LoginGrantedView, SkillChunking, UdpInitView};
use crate::world::{slot, ItemInfo, PlayerSnapshot, SkillEntry, SpecEntry, ZoneInfo};
use shared::messages::PositionUpdate;
use shared::{
    ChatLocation, ChatType, ClientBuild, Expansion, LoginError, OutPacket, PacketWriter,
    ProtocolFamily, ServerCode, CHECKSUM_SIZE, STREAM_HEADER_SIZE,
};

/// Items per inventory update frame
pub(super) const INVENTORY_CHUNK: usize = 32;

pub(super) fn table() -> EncoderTable {
    EncoderTable {
        version: 168,
        max_expansion: Expansion::ShroudedIsles,
        skill_chunking: SkillChunking {
            threshold: None,
            first_subtype_99: false,
            final_frame: false,
        },
        crypt_key,
        login_granted,
        login_denied,
        session_id,
        ping_reply,
        message,
        udp_init_reply,
        position_and_object_id,
        player_create,
        object_delete,
        quit,
        player_position,
        equipment_update,
        write_item_data,
        inventory_update,
        skill_list,
        trainer_window,
    }
}

fn writer(code: ServerCode) -> PacketWriter {
    PacketWriter::new(code.as_u8())
}

fn major_minor(build: ClientBuild) -> (u8, u8) {
    let (major, minor) = build.major_minor();
    (major as u8, minor as u8)
}

/// Zone-relative coordinates as the client expects them
pub(super) fn zone_offsets(player: &PlayerSnapshot, zone: &ZoneInfo) -> (u16, u16) {
    (
        (player.position.x - zone.x_offset) as u16,
        (player.position.y - zone.y_offset) as u16,
    )
}

pub(super) fn write_key(w: &mut PacketWriter, key: &[u8]) {
    w.write_u16(key.len() as u16).write_bytes(key);
}

fn crypt_key(_: &Encoder, view: &CryptKeyView<'_>) -> OutPacket {
    let (major, minor) = major_minor(view.build);
    let mut w = writer(ServerCode::CryptKey);
    w.write_u8(0x01)
        .write_u8(0x32)
        .write_u8(major)
        .write_u8(minor)
        .write_u8(0x00);
    write_key(&mut w, view.stream_key.as_bytes());
    write_key(&mut w, view.datagram_key.as_bytes());
    w.finish()
}

fn login_granted(_: &Encoder, view: &LoginGrantedView<'_>) -> OutPacket {
    let (major, minor) = major_minor(view.build);
    let mut w = writer(ServerCode::LoginGranted);
    w.write_u8(0x01)
        .write_u8(major)
        .write_u8(minor)
        .write_u8(0x00)
        .write_pascal_string(view.account)
        .write_pascal_string(view.server_name)
        .write_u8(0x0C)
        .write_u8(view.color)
        .write_u8(0x00);
    w.finish()
}

fn login_denied(_: &Encoder, build: ClientBuild, error: LoginError) -> OutPacket {
    let (major, minor) = major_minor(build);
    let mut w = writer(ServerCode::LoginDenied);
    w.write_u8(error as u8)
        .write_u8(0x01)
        .write_u8(major)
        .write_u8(minor)
        .write_u8(0x00);
    w.finish()
}

fn session_id(_: &Encoder, session: u16) -> OutPacket {
    let mut w = writer(ServerCode::SessionId);
    w.write_u16_le(session);
    w.finish()
}

fn ping_reply(_: &Encoder, timestamp: u32, sequence: u16) -> OutPacket {
    let mut w = writer(ServerCode::PingReply);
    w.write_u32(timestamp)
        .fill(0, 4)
        .write_u16(sequence.wrapping_add(1))
        .fill(0, 6);
    w.finish()
}

/// Body shared by every message layout after the session header
pub(super) fn write_message_body(w: &mut PacketWriter, text: &str, kind: ChatType, location: ChatLocation) {
    w.write_u8(kind as u8).fill(0, 3);
    let mut line = String::with_capacity(text.len() + 2);
    line.push_str(location.prefix());
    line.push_str(text);
    w.write_string(&line);
}

fn message(_: &Encoder, session: u16, text: &str, kind: ChatType, location: ChatLocation) -> OutPacket {
    let mut w = writer(ServerCode::Message);
    w.write_u16(session).write_u16(0);
    write_message_body(&mut w, text, kind, location);
    w.finish()
}

fn udp_init_reply(_: &Encoder, view: &UdpInitView<'_>) -> OutPacket {
    let mut w = writer(ServerCode::UdpInitReply);
    w.fill_string(view.server_ip, 22).write_u16(view.server_port);
    w.finish()
}

pub(super) fn write_position_core(w: &mut PacketWriter, player: &PlayerSnapshot, zone: &ZoneInfo) {
    let mut flags = 0u8;
    if zone.diving_enabled {
        flags |= 0x80;
    }
    if player.underwater {
        flags |= 0x01;
    }
    w.write_u16(player.object_id)
        .write_u16(player.position.z as u16)
        .write_u32(player.position.x as u32)
        .write_u32(player.position.y as u32)
        .write_u16(player.position.heading)
        .write_u8(flags)
        .write_u8(0x00);
}

fn position_and_object_id(_: &Encoder, player: &PlayerSnapshot, zone: &ZoneInfo, _server_name: &str) -> OutPacket {
    let mut w = writer(ServerCode::PositionAndObjectId);
    write_position_core(&mut w, player, zone);
    w.finish()
}

fn player_create(_: &Encoder, player: &PlayerSnapshot, zone: &ZoneInfo) -> OutPacket {
    let (x, y) = zone_offsets(player, zone);
    let mut w = writer(ServerCode::PlayerCreate);
    w.write_u16(player.session)
        .write_u16(player.object_id)
        .write_u16(x)
        .write_u16(y)
        .write_u8(zone.id as u8)
        .write_u8(0x00)
        .write_u16(player.position.z as u16)
        .write_u16(player.position.heading)
        .write_u16(player.model)
        .write_u8(u8::from(player.alive))
        .write_u8(0x00)
        .write_u8(player.realm)
        .write_u8(player.level)
        .write_u8(u8::from(player.stealthed))
        .write_u8(0x00)
        .write_pascal_string(&player.name)
        .write_pascal_string(&player.guild)
        .write_pascal_string(&player.last_name)
        .write_u8(0x00);
    w.finish()
}

fn object_delete(_: &Encoder, object_id: u16) -> OutPacket {
    let mut w = writer(ServerCode::ObjectDelete);
    w.write_u16(object_id).write_u16(1);
    w.finish()
}

fn quit(_: &Encoder, total_out: bool, level: u8) -> OutPacket {
    let mut w = writer(ServerCode::Quit);
    w.write_u8(u8::from(total_out)).write_u8(level);
    w.finish()
}

pub(super) fn write_player_position(w: &mut PacketWriter, update: &PositionUpdate, family: ProtocolFamily) {
    update.write_body(w, family);
}

fn player_position(_: &Encoder, update: &PositionUpdate, _player: &PlayerSnapshot) -> OutPacket {
    let mut w = writer(ServerCode::PlayerPosition);
    write_player_position(&mut w, update, ProtocolFamily::V168);
    w.finish()
}

/// Equipment layout switches shared by the versions that extend it
#[derive(Debug, Clone, Copy, Default)]
pub(super) struct EquipmentLayout {
    /// Extension byte after the model for non-weapon slots
    pub extension: bool,
    /// Newer emblem set flagged in the slot byte of shields and cloaks
    pub emblem_slot_flag: bool,
    /// Effect written as one byte instead of two
    pub narrow_effect: bool,
}

fn is_weapon_slot(slot_position: u8) -> bool {
    (slot::RIGHT_HAND..=slot::RANGED).contains(&slot_position)
}

pub(super) fn write_equipment(player: &PlayerSnapshot, items: &[ItemInfo], layout: EquipmentLayout) -> OutPacket {
    let mut w = writer(ServerCode::EquipmentUpdate);
    w.write_u16(player.object_id)
        .write_u8(u8::from(player.hood_up) | player.active_quiver)
        .write_u8(player.active_weapon_slots)
        .write_u8(items.len().min(u8::MAX as usize) as u8);

    for item in items.iter().take(u8::MAX as usize) {
        let texture = if item.emblem != 0 {
            item.emblem
        } else {
            u32::from(item.color)
        };

        let mut slot_byte = item.slot;
        if layout.emblem_slot_flag && (item.slot == slot::LEFT_HAND || item.slot == slot::CLOAK) {
            slot_byte |= ((texture & 0x0001_0000) >> 9) as u8;
        }
        w.write_u8(slot_byte);

        let mut model = item.model & 0x1FFF;
        if texture & !0xFF != 0 {
            model |= 0x8000;
        } else if texture & 0xFF != 0 {
            model |= 0x4000;
        }
        if item.effect != 0 {
            model |= 0x2000;
        }
        w.write_u16(model);

        if layout.extension && !is_weapon_slot(item.slot) {
            w.write_u8(item.extension);
        }

        if texture & !0xFF != 0 {
            w.write_u16(texture as u16);
        } else if texture & 0xFF != 0 {
            w.write_u8(texture as u8);
        }

        if item.effect != 0 {
            if layout.narrow_effect {
                w.write_u8(item.effect as u8);
            } else {
                w.write_u16(item.effect);
            }
        }
    }
    w.finish()
}

fn equipment_update(_: &Encoder, player: &PlayerSnapshot, items: &[ItemInfo]) -> OutPacket {
    write_equipment(player, items, EquipmentLayout::default())
}

/// Item template layout switches
#[derive(Debug, Clone, Copy, Default)]
pub(super) struct ItemLayout {
    /// Unknown zero byte after the object type
    pub type_padding: bool,
    /// Bonus level byte after the bonus
    pub bonus_level: bool,
}

impl ItemLayout {
    fn size(self) -> usize {
        19 + usize::from(self.type_padding) + usize::from(self.bonus_level)
    }
}

pub(super) fn write_item(w: &mut PacketWriter, item: Option<&ItemInfo>, layout: ItemLayout) {
    let Some(item) = item else {
        w.fill(0x00, layout.size());
        return;
    };

    let damage_bits = if item.damage_type > 3 {
        0
    } else {
        item.damage_type << 6
    };
    w.write_u8(item.level)
        .write_u8(item.dps_af)
        .write_u8(item.spd_abs)
        .write_u8(item.hand << 6)
        .write_u8(damage_bits | item.object_type);
    if layout.type_padding {
        w.write_u8(0x00);
    }
    w.write_u16(item.weight)
        .write_u8(item.condition)
        .write_u8(item.durability)
        .write_u8(item.quality)
        .write_u8(item.bonus);
    if layout.bonus_level {
        w.write_u8(item.bonus_level);
    }
    w.write_u16(item.model).write_u8(item.extension);

    let mut flag = 0x02u8;
    if item.emblem != 0 {
        w.write_u16(item.emblem as u16);
        flag |= ((item.emblem & 0x0001_0000) >> 16) as u8;
    } else {
        w.write_u16(item.color);
    }
    w.write_u8(flag)
        .write_u16(item.effect)
        .write_pascal_string(&item.name);
}

fn write_item_data(_: &Encoder, w: &mut PacketWriter, item: Option<&ItemInfo>) {
    write_item(w, item, ItemLayout::default());
}

fn inventory_update(encoder: &Encoder, player: &PlayerSnapshot, items: &[ItemInfo], window: u8) -> Vec<OutPacket> {
    let mut packets = Vec::new();
    let mut chunks = items.chunks(INVENTORY_CHUNK).peekable();
    if chunks.peek().is_none() {
        let mut w = writer(ServerCode::InventoryUpdate);
        w.write_u8(0)
            .write_u8(0)
            .write_u8(player.active_weapon_slots)
            .write_u8(window);
        packets.push(w.finish());
        return packets;
    }

    for (index, chunk) in chunks.enumerate() {
        let mut w = writer(ServerCode::InventoryUpdate);
        w.write_u8(chunk.len() as u8)
            .write_u8(0)
            .write_u8(player.active_weapon_slots)
            .write_u8(if index == 0 { window } else { 0 });
        for item in chunk {
            w.write_u8(item.slot);
            encoder.write_item_data(&mut w, Some(item));
        }
        packets.push(w.finish());
    }
    packets
}

fn skill_entry_len(skill: &SkillEntry) -> usize {
    8 + skill.name.len().min(u8::MAX as usize)
}

fn skill_list_header(w: &mut PacketWriter, count: usize, first: usize) {
    w.write_u8(0x01)
        .write_u8(count as u8)
        .write_u8(0x03)
        .write_u8(first as u8);
}

/// Writes the skill listing, splitting it the way the encoder's chunking
/// settings ask for
///
/// Each flushed frame has its count, subtype and first-index bytes patched
/// once its contents are known. Without a threshold the list stays in one
/// frame until the next entry would push it past `max_frame`.
fn skill_list(encoder: &Encoder, skills: &[SkillEntry], max_frame: usize) -> Vec<OutPacket> {
    let chunking = encoder.skill_chunking();
    let payload_budget = max_frame.saturating_sub(STREAM_HEADER_SIZE + CHECKSUM_SIZE);
    let mut packets = Vec::new();
    let mut w = writer(ServerCode::VariousUpdate);
    skill_list_header(&mut w, skills.len(), 0);
    let mut first = 0usize;

    for (index, skill) in skills.iter().enumerate() {
        let past_threshold = chunking.threshold.map_or(false, |threshold| w.len() > threshold);
        let over_budget = w.len() + skill_entry_len(skill) > payload_budget;
        if index > first && (past_threshold || over_budget) {
            let subtype = if chunking.first_subtype_99 && first == 0 {
                99
            } else {
                0x03
            };
            w.patch_u8(1, (index - first) as u8);
            w.patch_u8(2, subtype);
            w.patch_u8(3, first as u8);
            let full = std::mem::replace(&mut w, writer(ServerCode::VariousUpdate));
            packets.push(full.finish());
            skill_list_header(&mut w, index, first);
            first = index;
        }

        w.write_u8(skill.level)
            .write_u8(skill.page as u8)
            .write_u16(0)
            .write_u8(skill.bonus)
            .write_u16(skill.icon)
            .write_pascal_string(&skill.name);
    }

    w.patch_u8(1, (skills.len() - first) as u8);
    w.patch_u8(2, 0x03);
    w.patch_u8(3, first as u8);
    packets.push(w.finish());

    if chunking.final_frame {
        let mut end = writer(ServerCode::VariousUpdate);
        end.write_bytes(&[0x02, 0x00, 99, 0x00]);
        packets.push(end.finish());
    }
    packets
}

pub(super) fn write_trainer_window(specs: &[SpecEntry], points: u8, level_cap: Option<u8>) -> OutPacket {
    let cap = |level: u8| level_cap.map_or(level, |cap| level.min(cap));
    let mut w = writer(ServerCode::TrainerWindow);
    w.write_u8(specs.len() as u8)
        .write_u8(points)
        .write_u8(0)
        .write_u8(0);
    for (index, spec) in specs.iter().enumerate() {
        w.write_u8(index as u8)
            .write_u8(cap(spec.level))
            .write_u8(cap(spec.level.saturating_add(1)))
            .write_pascal_string(&spec.name);
    }
    w.finish()
}

fn trainer_window(_: &Encoder, specs: &[SpecEntry], points: u8) -> OutPacket {
    write_trainer_window(specs, points, None)
}
