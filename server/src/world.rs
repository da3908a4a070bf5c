//! Collaborators the network core calls into
//!
//! World simulation, accounts and persistence live outside the core. The core
//! only sees them through [`WorldState`], [`AccountStore`] and
//! [`Persistence`], each call being an opaque synchronous operation that does
//! its own locking. The in-memory implementations at the bottom back the
//! demo binary and the tests.

use log::{debug, info, warn};
use shared::LoginError;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

pub type PlayerId = u32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZoneInfo {
    pub id: u16,
    pub region: u16,
    pub name: String,
    /// World coordinates of the zone's origin
    pub x_offset: i32,
    pub y_offset: i32,
    pub is_dungeon: bool,
    pub skin: u16,
    pub diving_enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Position {
    pub region: u16,
    pub zone: u16,
    pub x: i32,
    pub y: i32,
    pub z: i32,
    pub heading: u16,
}

/// Mount a player currently rides
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Steed {
    pub object_id: u16,
    pub rider_slot: u8,
}

/// Horse a character owns, shown on player creation by newer clients
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HorseInfo {
    pub id: u8,
    pub barding: u8,
    pub saddle_emblem: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerSnapshot {
    pub id: PlayerId,
    pub object_id: u16,
    pub session: u16,
    pub name: String,
    pub last_name: String,
    pub guild: String,
    pub prefix: String,
    pub title: String,
    pub class_name: String,
    pub level: u8,
    pub model: u16,
    pub realm: u8,
    /// Eye size, lip size, mood, eye colour, hair colour, face type, hair style
    pub face: [u8; 7],
    pub position: Position,
    pub bind: Position,
    pub alive: bool,
    pub stealthed: bool,
    pub detects_stealth: bool,
    pub underwater: bool,
    pub health_percent: u8,
    pub mana_percent: u8,
    pub endurance_percent: u8,
    pub health: i32,
    pub max_health: i32,
    pub endurance: i32,
    pub max_endurance: i32,
    pub steed: Option<Steed>,
    pub horse: Option<HorseInfo>,
    pub safe_fall: u8,
    pub spec_points: u8,
    pub realm_points_visible: bool,
    pub hood_up: bool,
    pub active_quiver: u8,
    pub active_weapon_slots: u8,
}

pub mod slot {
    pub const RIGHT_HAND: u8 = 10;
    pub const LEFT_HAND: u8 = 11;
    pub const TWO_HAND: u8 = 12;
    pub const RANGED: u8 = 13;
    pub const CLOAK: u8 = 26;
    pub const FIRST_BACKPACK: u8 = 40;
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ItemInfo {
    pub slot: u8,
    pub name: String,
    pub level: u8,
    pub dps_af: u8,
    pub spd_abs: u8,
    pub hand: u8,
    pub damage_type: u8,
    pub object_type: u8,
    pub weight: u16,
    pub condition: u8,
    pub durability: u8,
    pub quality: u8,
    pub bonus: u8,
    pub bonus_level: u8,
    pub model: u16,
    pub extension: u8,
    pub color: u16,
    /// Guild emblem, bit 16 marks the newer emblem set
    pub emblem: u32,
    pub effect: u16,
}

/// Tab of the skill window an entry is listed under
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SkillPage {
    Specialization = 0,
    Abilities = 1,
    Styles = 2,
    Spells = 3,
    Songs = 4,
    AbilitiesSpell = 5,
    RealmAbilities = 6,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkillEntry {
    pub name: String,
    pub level: u8,
    pub page: SkillPage,
    pub icon: u16,
    pub bonus: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecEntry {
    pub name: String,
    pub level: u8,
}

/// World state mutations and queries used by the core
pub trait WorldState: Send + Sync {
    fn zone(&self, id: u16) -> Option<ZoneInfo>;
    fn player(&self, id: PlayerId) -> Option<PlayerSnapshot>;
    /// Loads the account's character into the world
    fn enter_world(&self, account: &str, session: u16) -> Option<PlayerSnapshot>;
    fn leave_world(&self, id: PlayerId);
    fn commit_position(&self, id: PlayerId, position: Position, speed: i16, underwater: bool);
    /// Relocates a player to their bind point, returning the new position
    fn move_to_bind(&self, id: PlayerId) -> Option<Position>;
    fn apply_fall_damage(&self, id: PlayerId, damage: i32, endurance: i32);
    fn players_in_radius(&self, region: u16, x: i32, y: i32, z: i32, radius: i32) -> Vec<PlayerId>;
    fn can_detect(&self, observer: PlayerId, target: PlayerId) -> bool;
    fn areas_at(&self, zone: u16, x: i32, y: i32, z: i32) -> BTreeSet<u16>;
    fn notify_area_enter(&self, id: PlayerId, area: u16);
    fn notify_area_leave(&self, id: PlayerId, area: u16);
    fn equipment(&self, id: PlayerId) -> Vec<ItemInfo>;
    fn inventory(&self, id: PlayerId) -> Vec<ItemInfo>;
    fn specializations(&self, id: PlayerId) -> Vec<SpecEntry>;
    fn skills(&self, id: PlayerId) -> Vec<SkillEntry>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub name: String,
    /// Allowed to use the client's debug flight mode
    pub can_fly: bool,
}

pub trait AccountStore: Send + Sync {
    fn authenticate(&self, name: &str, password: &str) -> Result<Account, LoginError>;
    fn ban(&self, name: &str, duration: Duration, reason: &str);
}

pub trait Persistence: Send + Sync {
    fn save_player(&self, player: &PlayerSnapshot);
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Something the in-memory world was asked to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorldEvent {
    Entered(PlayerId),
    Left(PlayerId),
    MovedToBind(PlayerId),
    FallDamage { player: PlayerId, damage: i32, endurance: i32 },
    AreaEntered { player: PlayerId, area: u16 },
    AreaLeft { player: PlayerId, area: u16 },
}

/// Circular area inside one zone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AreaInfo {
    pub id: u16,
    pub zone: u16,
    pub x: i32,
    pub y: i32,
    pub radius: i32,
}

struct PlayerRecord {
    account: String,
    snapshot: PlayerSnapshot,
    equipment: Vec<ItemInfo>,
    inventory: Vec<ItemInfo>,
    specs: Vec<SpecEntry>,
    skills: Vec<SkillEntry>,
}

/// World store kept in process memory
///
/// Players spawn at a fixed point in zone 1. Characters are created on the
/// fly with a small set of starter items and skills.
pub struct InMemoryWorld {
    zones: HashMap<u16, ZoneInfo>,
    areas: Mutex<Vec<AreaInfo>>,
    players: Mutex<HashMap<PlayerId, PlayerRecord>>,
    events: Mutex<Vec<WorldEvent>>,
    next_id: AtomicU32,
    spawn: Position,
}

impl Default for InMemoryWorld {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryWorld {
    pub fn new() -> Self {
        let zones = [
            ZoneInfo {
                id: 1,
                region: 1,
                name: "Camelot Hills".to_string(),
                x_offset: 0,
                y_offset: 0,
                is_dungeon: false,
                skin: 1,
                diving_enabled: true,
            },
            ZoneInfo {
                id: 2,
                region: 1,
                name: "Salisbury Plains".to_string(),
                x_offset: 65_536,
                y_offset: 0,
                is_dungeon: false,
                skin: 2,
                diving_enabled: false,
            },
            ZoneInfo {
                id: 100,
                region: 20,
                name: "Burial Tomb".to_string(),
                x_offset: 32_768,
                y_offset: 16_384,
                is_dungeon: true,
                skin: 100,
                diving_enabled: false,
            },
        ];

        let spawn = Position {
            region: 1,
            zone: 1,
            x: 30_000,
            y: 30_000,
            z: 2_000,
            heading: 0,
        };

        Self {
            zones: zones.into_iter().map(|z| (z.id, z)).collect(),
            areas: Mutex::new(Vec::new()),
            players: Mutex::new(HashMap::new()),
            events: Mutex::new(Vec::new()),
            next_id: AtomicU32::new(1),
            spawn,
        }
    }

    pub fn spawn(&self) -> Position {
        self.spawn
    }

    pub fn add_area(&self, area: AreaInfo) {
        lock(&self.areas).push(area);
    }

    /// Applies `change` to a player's snapshot, returning false if unknown
    pub fn update_player(&self, id: PlayerId, change: impl FnOnce(&mut PlayerSnapshot)) -> bool {
        match lock(&self.players).get_mut(&id) {
            Some(record) => {
                change(&mut record.snapshot);
                true
            }
            None => false,
        }
    }

    pub fn events(&self) -> Vec<WorldEvent> {
        lock(&self.events).clone()
    }

    pub fn player_count(&self) -> usize {
        lock(&self.players).len()
    }

    fn push_event(&self, event: WorldEvent) {
        lock(&self.events).push(event);
    }

    fn new_character(&self, id: PlayerId, account: &str, session: u16) -> PlayerRecord {
        let snapshot = PlayerSnapshot {
            id,
            object_id: (id % u32::from(u16::MAX)) as u16,
            session,
            name: account.to_string(),
            last_name: String::new(),
            guild: String::new(),
            prefix: String::new(),
            title: String::new(),
            class_name: "Armsman".to_string(),
            level: 1,
            model: 32,
            realm: 1,
            face: [0; 7],
            position: self.spawn,
            bind: self.spawn,
            alive: true,
            stealthed: false,
            detects_stealth: false,
            underwater: false,
            health_percent: 100,
            mana_percent: 100,
            endurance_percent: 100,
            health: 100,
            max_health: 100,
            endurance: 100,
            max_endurance: 100,
            steed: None,
            horse: None,
            safe_fall: 0,
            spec_points: 1,
            realm_points_visible: false,
            hood_up: false,
            active_quiver: 0,
            active_weapon_slots: 0xFF,
        };

        let sword = ItemInfo {
            slot: slot::RIGHT_HAND,
            name: "Training Sword".to_string(),
            level: 1,
            dps_af: 12,
            spd_abs: 30,
            damage_type: 2,
            object_type: 3,
            weight: 30,
            condition: 100,
            durability: 100,
            quality: 85,
            model: 4,
            ..ItemInfo::default()
        };
        let cloak = ItemInfo {
            slot: slot::CLOAK,
            name: "Woven Cloak".to_string(),
            level: 1,
            object_type: 41,
            weight: 10,
            condition: 100,
            durability: 100,
            quality: 85,
            model: 57,
            color: 3,
            ..ItemInfo::default()
        };
        let bread = ItemInfo {
            slot: slot::FIRST_BACKPACK,
            name: "Bread".to_string(),
            level: 1,
            dps_af: 4,
            object_type: 40,
            weight: 1,
            condition: 100,
            durability: 100,
            quality: 100,
            model: 489,
            ..ItemInfo::default()
        };

        PlayerRecord {
            account: account.to_string(),
            snapshot,
            equipment: vec![sword.clone(), cloak.clone()],
            inventory: vec![sword, cloak, bread],
            specs: vec![
                SpecEntry {
                    name: "Slash".to_string(),
                    level: 1,
                },
                SpecEntry {
                    name: "Parry".to_string(),
                    level: 1,
                },
            ],
            skills: vec![
                SkillEntry {
                    name: "Slash".to_string(),
                    level: 1,
                    page: SkillPage::Specialization,
                    icon: 0,
                    bonus: 0,
                },
                SkillEntry {
                    name: "Sprint".to_string(),
                    level: 1,
                    page: SkillPage::Abilities,
                    icon: 0x2F,
                    bonus: 0,
                },
            ],
        }
    }

    /// Replaces a player's skill list
    pub fn set_skills(&self, id: PlayerId, skills: Vec<SkillEntry>) {
        if let Some(record) = lock(&self.players).get_mut(&id) {
            record.skills = skills;
        }
    }
}

impl WorldState for InMemoryWorld {
    fn zone(&self, id: u16) -> Option<ZoneInfo> {
        self.zones.get(&id).cloned()
    }

    fn player(&self, id: PlayerId) -> Option<PlayerSnapshot> {
        lock(&self.players).get(&id).map(|r| r.snapshot.clone())
    }

    fn enter_world(&self, account: &str, session: u16) -> Option<PlayerSnapshot> {
        let mut players = lock(&self.players);
        if players.values().any(|r| r.account == account) {
            warn!("Account {} already has a character in the world", account);
            return None;
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let record = self.new_character(id, account, session);
        let snapshot = record.snapshot.clone();
        players.insert(id, record);
        drop(players);

        info!("Player {} ({}) entered the world", snapshot.name, id);
        self.push_event(WorldEvent::Entered(id));
        Some(snapshot)
    }

    fn leave_world(&self, id: PlayerId) {
        if lock(&self.players).remove(&id).is_some() {
            self.push_event(WorldEvent::Left(id));
        }
    }

    fn commit_position(&self, id: PlayerId, position: Position, _speed: i16, underwater: bool) {
        if let Some(record) = lock(&self.players).get_mut(&id) {
            record.snapshot.position = position;
            record.snapshot.underwater = underwater;
        }
    }

    fn move_to_bind(&self, id: PlayerId) -> Option<Position> {
        let bind = {
            let mut players = lock(&self.players);
            let record = players.get_mut(&id)?;
            record.snapshot.position = record.snapshot.bind;
            record.snapshot.bind
        };
        self.push_event(WorldEvent::MovedToBind(id));
        Some(bind)
    }

    fn apply_fall_damage(&self, id: PlayerId, damage: i32, endurance: i32) {
        if let Some(record) = lock(&self.players).get_mut(&id) {
            let p = &mut record.snapshot;
            p.health = (p.health - damage).max(1);
            p.endurance = (p.endurance - endurance).max(0);
            if p.max_health > 0 {
                p.health_percent = (p.health * 100 / p.max_health) as u8;
            }
            if p.max_endurance > 0 {
                p.endurance_percent = (p.endurance * 100 / p.max_endurance) as u8;
            }
        }
        self.push_event(WorldEvent::FallDamage {
            player: id,
            damage,
            endurance,
        });
    }

    fn players_in_radius(&self, region: u16, x: i32, y: i32, z: i32, radius: i32) -> Vec<PlayerId> {
        let radius_sq = i64::from(radius) * i64::from(radius);
        let mut ids: Vec<PlayerId> = lock(&self.players)
            .values()
            .filter(|r| r.snapshot.position.region == region)
            .filter(|r| {
                let p = &r.snapshot.position;
                let dx = i64::from(p.x - x);
                let dy = i64::from(p.y - y);
                let dz = i64::from(p.z - z);
                dx * dx + dy * dy + dz * dz <= radius_sq
            })
            .map(|r| r.snapshot.id)
            .collect();
        ids.sort_unstable();
        ids
    }

    fn can_detect(&self, observer: PlayerId, _target: PlayerId) -> bool {
        lock(&self.players)
            .get(&observer)
            .map_or(false, |r| r.snapshot.detects_stealth)
    }

    fn areas_at(&self, zone: u16, x: i32, y: i32, _z: i32) -> BTreeSet<u16> {
        lock(&self.areas)
            .iter()
            .filter(|a| a.zone == zone)
            .filter(|a| {
                let dx = i64::from(a.x - x);
                let dy = i64::from(a.y - y);
                dx * dx + dy * dy <= i64::from(a.radius) * i64::from(a.radius)
            })
            .map(|a| a.id)
            .collect()
    }

    fn notify_area_enter(&self, id: PlayerId, area: u16) {
        debug!("Player {} entered area {}", id, area);
        self.push_event(WorldEvent::AreaEntered { player: id, area });
    }

    fn notify_area_leave(&self, id: PlayerId, area: u16) {
        debug!("Player {} left area {}", id, area);
        self.push_event(WorldEvent::AreaLeft { player: id, area });
    }

    fn equipment(&self, id: PlayerId) -> Vec<ItemInfo> {
        lock(&self.players)
            .get(&id)
            .map(|r| r.equipment.clone())
            .unwrap_or_default()
    }

    fn inventory(&self, id: PlayerId) -> Vec<ItemInfo> {
        lock(&self.players)
            .get(&id)
            .map(|r| r.inventory.clone())
            .unwrap_or_default()
    }

    fn specializations(&self, id: PlayerId) -> Vec<SpecEntry> {
        lock(&self.players)
            .get(&id)
            .map(|r| r.specs.clone())
            .unwrap_or_default()
    }

    fn skills(&self, id: PlayerId) -> Vec<SkillEntry> {
        lock(&self.players)
            .get(&id)
            .map(|r| r.skills.clone())
            .unwrap_or_default()
    }
}

struct AccountRecord {
    password: String,
    can_fly: bool,
    banned_until: Option<Instant>,
}

/// Account store that registers unknown names on first login
pub struct InMemoryAccounts {
    accounts: Mutex<HashMap<String, AccountRecord>>,
}

impl Default for InMemoryAccounts {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryAccounts {
    pub fn new() -> Self {
        Self {
            accounts: Mutex::new(HashMap::new()),
        }
    }

    pub fn add(&self, name: &str, password: &str, can_fly: bool) {
        lock(&self.accounts).insert(
            name.to_string(),
            AccountRecord {
                password: password.to_string(),
                can_fly,
                banned_until: None,
            },
        );
    }

    pub fn is_banned(&self, name: &str) -> bool {
        lock(&self.accounts)
            .get(name)
            .and_then(|r| r.banned_until)
            .map_or(false, |until| until > Instant::now())
    }
}

impl AccountStore for InMemoryAccounts {
    fn authenticate(&self, name: &str, password: &str) -> Result<Account, LoginError> {
        if name.is_empty() || name.len() > 20 || !name.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(LoginError::AccountInvalid);
        }

        let mut accounts = lock(&self.accounts);
        let record = accounts
            .entry(name.to_string())
            .or_insert_with(|| AccountRecord {
                password: password.to_string(),
                can_fly: false,
                banned_until: None,
            });

        if record.banned_until.map_or(false, |until| until > Instant::now()) {
            return Err(LoginError::AccountInvalid);
        }
        if record.password != password {
            return Err(LoginError::WrongPassword);
        }
        Ok(Account {
            name: name.to_string(),
            can_fly: record.can_fly,
        })
    }

    fn ban(&self, name: &str, duration: Duration, reason: &str) {
        warn!("Banning account {} for {:?}: {}", name, duration, reason);
        if let Some(record) = lock(&self.accounts).get_mut(name) {
            record.banned_until = Some(Instant::now() + duration);
        }
    }
}

/// Persistence that only remembers which players were saved
#[derive(Default)]
pub struct InMemoryPersistence {
    saved: Mutex<Vec<PlayerId>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn saved(&self) -> Vec<PlayerId> {
        lock(&self.saved).clone()
    }
}

impl Persistence for InMemoryPersistence {
    fn save_player(&self, player: &PlayerSnapshot) {
        debug!("Saving player {} ({})", player.name, player.id);
        lock(&self.saved).push(player.id);
    }
}
