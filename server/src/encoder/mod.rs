//! Protocol-version encoder chain
//!
//! Every client build renders the same logical server messages into its own
//! byte layout. Each supported version is an [`EncoderTable`]: a flat table of
//! writer functions built by copying the previous version's table and
//! replacing only the entries whose layout changed, e.g.
//!
//! ```ignore
//! EncoderTable {
//!     version: 1109,
//!     write_item_data,
//!     ..super::v190::table()
//! }
//! ```
//!
//! so "what changed in 1.109" is exactly the list of fields named there.
//! Writers receive the [`Encoder`] they run under, which lets a base writer
//! such as the inventory update call the item-data writer of the *selected*
//! version.
//!
//! [`EncoderChain::select`] binds one shared encoder per connection at
//! handshake time; handlers then call the `Encoder` methods and never branch
//! on the client version themselves.

mod v1109;
mod v1110;
mod v1112;
mod v1125;
mod v168;
mod v172;
mod v173;
mod v174;
mod v176;
mod v180;
mod v190;

use crate::error::HandshakeError;
use crate::world::{ItemInfo, PlayerSnapshot, SkillEntry, SpecEntry, ZoneInfo};
use shared::messages::PositionUpdate;
use shared::{
    ChatLocation, ChatType, CipherKey, ClientBuild, Expansion, LoginError, OutPacket,
    PacketWriter,
};
use std::fmt;
use std::sync::Arc;

/// Inputs of the version-and-crypt-key reply
pub struct CryptKeyView<'a> {
    pub build: ClientBuild,
    pub stream_key: &'a CipherKey,
    pub datagram_key: &'a CipherKey,
}

/// Inputs of the login-granted reply
pub struct LoginGrantedView<'a> {
    pub build: ClientBuild,
    pub account: &'a str,
    pub server_name: &'a str,
    pub color: u8,
}

/// Inputs of the datagram init reply
pub struct UdpInitView<'a> {
    pub server_ip: &'a str,
    pub server_port: u16,
    /// Coarse server clock, written by builds that expect a timestamp
    pub timestamp: u64,
}

/// How the skill list is split across frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SkillChunking {
    /// Flush the current frame once its payload grows past this size
    pub threshold: Option<usize>,
    /// Mark a flushed first chunk with subtype 99 instead of 3
    pub first_subtype_99: bool,
    /// Terminate the listing with an explicit end-of-list frame
    pub final_frame: bool,
}

/// One writer per logical outbound message
#[derive(Clone, Copy)]
pub struct EncoderTable {
    /// Build number this table was introduced with
    pub version: u16,
    pub max_expansion: Expansion,
    pub skill_chunking: SkillChunking,
    pub crypt_key: fn(&Encoder, &CryptKeyView<'_>) -> OutPacket,
    pub login_granted: fn(&Encoder, &LoginGrantedView<'_>) -> OutPacket,
    pub login_denied: fn(&Encoder, ClientBuild, LoginError) -> OutPacket,
    pub session_id: fn(&Encoder, u16) -> OutPacket,
    pub ping_reply: fn(&Encoder, u32, u16) -> OutPacket,
    pub message: fn(&Encoder, u16, &str, ChatType, ChatLocation) -> OutPacket,
    pub udp_init_reply: fn(&Encoder, &UdpInitView<'_>) -> OutPacket,
    pub position_and_object_id: fn(&Encoder, &PlayerSnapshot, &ZoneInfo, &str) -> OutPacket,
    pub player_create: fn(&Encoder, &PlayerSnapshot, &ZoneInfo) -> OutPacket,
    pub object_delete: fn(&Encoder, u16) -> OutPacket,
    pub quit: fn(&Encoder, bool, u8) -> OutPacket,
    pub player_position: fn(&Encoder, &PositionUpdate, &PlayerSnapshot) -> OutPacket,
    pub equipment_update: fn(&Encoder, &PlayerSnapshot, &[ItemInfo]) -> OutPacket,
    pub write_item_data: fn(&Encoder, &mut PacketWriter, Option<&ItemInfo>),
    pub inventory_update: fn(&Encoder, &PlayerSnapshot, &[ItemInfo], u8) -> Vec<OutPacket>,
    pub skill_list: fn(&Encoder, &[SkillEntry], usize) -> Vec<OutPacket>,
    pub trainer_window: fn(&Encoder, &[SpecEntry], u8) -> OutPacket,
}

/// Renders outbound messages for one protocol version
pub struct Encoder {
    table: EncoderTable,
}

impl fmt::Debug for Encoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Encoder")
            .field("version", &self.table.version)
            .field("max_expansion", &self.table.max_expansion)
            .finish()
    }
}

impl Encoder {
    pub fn new(table: EncoderTable) -> Self {
        Self { table }
    }

    pub fn version(&self) -> u16 {
        self.table.version
    }

    pub fn max_expansion(&self) -> Expansion {
        self.table.max_expansion
    }

    pub fn skill_chunking(&self) -> SkillChunking {
        self.table.skill_chunking
    }

    pub fn crypt_key(&self, view: &CryptKeyView<'_>) -> OutPacket {
        (self.table.crypt_key)(self, view)
    }

    pub fn login_granted(&self, view: &LoginGrantedView<'_>) -> OutPacket {
        (self.table.login_granted)(self, view)
    }

    pub fn login_denied(&self, build: ClientBuild, error: LoginError) -> OutPacket {
        (self.table.login_denied)(self, build, error)
    }

    pub fn session_id(&self, session: u16) -> OutPacket {
        (self.table.session_id)(self, session)
    }

    pub fn ping_reply(&self, timestamp: u32, sequence: u16) -> OutPacket {
        (self.table.ping_reply)(self, timestamp, sequence)
    }

    pub fn message(&self, session: u16, text: &str, kind: ChatType, location: ChatLocation) -> OutPacket {
        (self.table.message)(self, session, text, kind, location)
    }

    /// Shorthand for a system-window message
    pub fn system_message(&self, session: u16, text: &str) -> OutPacket {
        self.message(session, text, ChatType::System, ChatLocation::SystemWindow)
    }

    pub fn udp_init_reply(&self, view: &UdpInitView<'_>) -> OutPacket {
        (self.table.udp_init_reply)(self, view)
    }

    pub fn position_and_object_id(&self, player: &PlayerSnapshot, zone: &ZoneInfo, server_name: &str) -> OutPacket {
        (self.table.position_and_object_id)(self, player, zone, server_name)
    }

    pub fn player_create(&self, player: &PlayerSnapshot, zone: &ZoneInfo) -> OutPacket {
        (self.table.player_create)(self, player, zone)
    }

    pub fn object_delete(&self, object_id: u16) -> OutPacket {
        (self.table.object_delete)(self, object_id)
    }

    pub fn quit(&self, total_out: bool, level: u8) -> OutPacket {
        (self.table.quit)(self, total_out, level)
    }

    pub fn player_position(&self, update: &PositionUpdate, player: &PlayerSnapshot) -> OutPacket {
        (self.table.player_position)(self, update, player)
    }

    pub fn equipment_update(&self, player: &PlayerSnapshot, items: &[ItemInfo]) -> OutPacket {
        (self.table.equipment_update)(self, player, items)
    }

    pub fn write_item_data(&self, w: &mut PacketWriter, item: Option<&ItemInfo>) {
        (self.table.write_item_data)(self, w, item)
    }

    pub fn inventory_update(&self, player: &PlayerSnapshot, items: &[ItemInfo], window: u8) -> Vec<OutPacket> {
        (self.table.inventory_update)(self, player, items, window)
    }

    /// Skill listing split so that no encoded frame exceeds `max_frame`
    pub fn skill_list(&self, skills: &[SkillEntry], max_frame: usize) -> Vec<OutPacket> {
        (self.table.skill_list)(self, skills, max_frame)
    }

    pub fn trainer_window(&self, specs: &[SpecEntry], points: u8) -> OutPacket {
        (self.table.trainer_window)(self, specs, points)
    }
}

/// All supported versions, oldest first
pub struct EncoderChain {
    encoders: Vec<Arc<Encoder>>,
}

impl Default for EncoderChain {
    fn default() -> Self {
        Self::standard()
    }
}

impl EncoderChain {
    /// Builds a chain from tables; they are ordered by version
    pub fn new(tables: Vec<EncoderTable>) -> Self {
        let mut encoders: Vec<Arc<Encoder>> = tables.into_iter().map(|t| Arc::new(Encoder::new(t))).collect();
        encoders.sort_by_key(|e| e.version());
        Self { encoders }
    }

    /// Every version the server ships with
    pub fn standard() -> Self {
        Self::new(vec![
            v168::table(),
            v172::table(),
            v173::table(),
            v174::table(),
            v176::table(),
            v180::table(),
            v190::table(),
            v1109::table(),
            v1110::table(),
            v1112::table(),
            v1125::table(),
        ])
    }

    pub fn versions(&self) -> Vec<u16> {
        self.encoders.iter().map(|e| e.version()).collect()
    }

    /// Newest encoder whose version does not exceed `build`
    pub fn nearest(&self, build: ClientBuild) -> Option<Arc<Encoder>> {
        self.encoders
            .iter()
            .rev()
            .find(|e| e.version() <= build.number())
            .or_else(|| self.encoders.first())
            .cloned()
    }

    /// Picks the encoder for a handshake
    ///
    /// Fails for builds outside the known ranges and for expansions the
    /// build's encoder does not support.
    pub fn select(&self, build: ClientBuild, expansion: Expansion) -> Result<Arc<Encoder>, HandshakeError> {
        if !build.is_known() {
            return Err(HandshakeError::UnsupportedBuild(build));
        }
        let encoder = self
            .encoders
            .iter()
            .rev()
            .find(|e| e.version() <= build.number())
            .cloned()
            .ok_or(HandshakeError::UnsupportedBuild(build))?;
        if expansion > encoder.max_expansion() {
            return Err(HandshakeError::ExpansionNotAllowed { build, expansion });
        }
        Ok(encoder)
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_chain_is_ordered() {
        let chain = EncoderChain::standard();
        assert_eq!(
            chain.versions(),
            vec![168, 172, 173, 174, 176, 180, 190, 1109, 1110, 1112, 1125]
        );
    }

    #[test]
    fn test_select_picks_newest_not_above_build() {
        let chain = EncoderChain::standard();
        let pick = |b| chain.select(ClientBuild(b), Expansion::Classic).unwrap().version();
        assert_eq!(pick(168), 168);
        assert_eq!(pick(171), 168);
        assert_eq!(pick(175), 174);
        assert_eq!(pick(199), 190);
        assert_eq!(pick(1108), 190);
        assert_eq!(pick(1126), 1125);
    }

    #[test]
    fn test_select_rejects_unknown_builds() {
        let chain = EncoderChain::standard();
        for build in [0, 167, 200, 999, 1099, 1127] {
            assert_eq!(
                chain.select(ClientBuild(build), Expansion::Classic).unwrap_err(),
                HandshakeError::UnsupportedBuild(ClientBuild(build))
            );
        }
    }

    #[test]
    fn test_select_checks_expansion() {
        let chain = EncoderChain::standard();
        assert!(chain.select(ClientBuild(168), Expansion::ShroudedIsles).is_ok());
        assert_eq!(
            chain.select(ClientBuild(168), Expansion::TrialsOfAtlantis).unwrap_err(),
            HandshakeError::ExpansionNotAllowed {
                build: ClientBuild(168),
                expansion: Expansion::TrialsOfAtlantis
            }
        );
        assert!(chain.select(ClientBuild(1110), Expansion::LabyrinthOfTheMinotaur).is_ok());
    }

    #[test]
    fn test_nearest_serves_rejections() {
        let chain = EncoderChain::standard();
        assert_eq!(chain.nearest(ClientBuild(2000)).unwrap().version(), 1125);
        assert_eq!(chain.nearest(ClientBuild(100)).unwrap().version(), 168);
    }

    #[test]
    fn test_encoders_are_shared_per_version() {
        let chain = EncoderChain::standard();
        let a = chain.select(ClientBuild(180), Expansion::Classic).unwrap();
        let b = chain.select(ClientBuild(185), Expansion::Classic).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    /// Item data grows by one bonus-level byte in 1.109, placed after the
    /// bonus byte; every other byte stays where it was.
    #[test]
    fn test_bonus_level_byte_added_in_1109() {
        let chain = EncoderChain::standard();
        let item = fixtures::item();
        let render = |build| {
            let encoder = chain.select(ClientBuild(build), Expansion::Classic).unwrap();
            let mut w = PacketWriter::new(0);
            encoder.write_item_data(&mut w, Some(&item));
            w.finish().payload
        };

        let before = render(199);
        let after = render(1109);
        assert_eq!(after.len(), before.len() + 1);

        let bonus_at = 10;
        assert_eq!(before[bonus_at], item.bonus);
        assert_eq!(after[bonus_at], item.bonus);
        assert_eq!(after[bonus_at + 1], item.bonus_level);
        assert_eq!(&before[..=bonus_at], &after[..=bonus_at]);
        assert_eq!(&before[bonus_at + 1..], &after[bonus_at + 2..]);

        // unchanged until the next override
        assert_eq!(render(1110), after);
    }

    #[test]
    fn test_null_item_sizes_follow_versions() {
        let chain = EncoderChain::standard();
        for (build, size) in [(168, 19), (1109, 20), (1112, 21), (1125, 21)] {
            let encoder = chain.select(ClientBuild(build), Expansion::Classic).unwrap();
            let mut w = PacketWriter::new(0);
            encoder.write_item_data(&mut w, None);
            assert_eq!(w.len(), size, "build {}", build);
        }
    }
}
