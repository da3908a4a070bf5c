//! Per-player kinematic state and the pure rules of the movement validator
//!
//! The position handler owns the I/O side (world commits, broadcasts,
//! messages). Everything here is deterministic given its inputs so the
//! anti-cheat and fall-damage arithmetic can be tested without a server.

use crate::config::{FallDamageConfig, MovementConfig};
use crate::world::{PlayerSnapshot, Position};
use shared::messages::{PositionUpdate, FLAG_DIVING, FLAG_STEALTH};
use shared::ClientBuild;
use std::collections::{BTreeSet, VecDeque};
use std::time::{Duration, Instant};

/// Resolved height clients report after falling through the world geometry
pub const FELL_THROUGH_WORLD_Z: i32 = 0;

/// Motion bits of the debug flight mode
const DEBUG_FLY_BITS: u8 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MotionState {
    #[default]
    Grounded,
    Airborne,
    Swimming,
    Climbing,
    Mounted,
    Dead,
}

impl MotionState {
    /// Derives the state from the update's motion bits and vertical word,
    /// letting the server-side alive and mount flags override both
    pub fn classify(update: &PositionUpdate, alive: bool, mounted: bool) -> Self {
        if !alive {
            return MotionState::Dead;
        }
        if mounted {
            return MotionState::Mounted;
        }
        match update.motion_bits() {
            1 => MotionState::Swimming,
            5 => MotionState::Dead,
            6 => MotionState::Mounted,
            7 => MotionState::Climbing,
            _ if update.fly_data != 0 && !update.is_landing() => MotionState::Airborne,
            _ => MotionState::Grounded,
        }
    }
}

/// Result of timing one update against the minimum interval
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntervalCheck {
    Normal,
    TooFast { streak: u32, total: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AreaChanges {
    pub entered: Vec<u16>,
    pub left: Vec<u16>,
}

/// Movement bookkeeping for one in-world player
#[derive(Debug, Clone)]
pub struct MovementState {
    last_update: Option<Instant>,
    /// Most recent first
    positions: VecDeque<Position>,
    history: usize,
    max_grounded_z: i32,
    speed_violations_total: u32,
    speed_streak: u32,
    fly_violations: u32,
    areas: BTreeSet<u16>,
    last_area_check: Option<Instant>,
    zone: Option<u16>,
    region: Option<u16>,
    unknown_zone_logged: bool,
    motion: MotionState,
}

impl MovementState {
    pub fn new(position: &Position, history: usize) -> Self {
        let history = history.max(1);
        let mut positions = VecDeque::with_capacity(history);
        positions.push_front(*position);
        Self {
            last_update: None,
            positions,
            history,
            max_grounded_z: position.z,
            speed_violations_total: 0,
            speed_streak: 0,
            fly_violations: 0,
            areas: BTreeSet::new(),
            last_area_check: None,
            zone: None,
            region: None,
            unknown_zone_logged: false,
            motion: MotionState::Grounded,
        }
    }

    /// Times this update against the previous one
    ///
    /// Updates closer together than `min_interval` extend the streak and the
    /// lifetime total. A normal interval ends the streak; the total never goes
    /// down.
    pub fn check_interval(&mut self, now: Instant, min_interval: Duration) -> IntervalCheck {
        let previous = self.last_update.replace(now);
        let Some(previous) = previous else {
            return IntervalCheck::Normal;
        };
        if now.saturating_duration_since(previous) < min_interval {
            self.speed_streak += 1;
            self.speed_violations_total += 1;
            IntervalCheck::TooFast {
                streak: self.speed_streak,
                total: self.speed_violations_total,
            }
        } else {
            self.speed_streak = 0;
            IntervalCheck::Normal
        }
    }

    /// Pushes a position unless it repeats the latest one
    pub fn remember_position(&mut self, position: Position) {
        let same = self.positions.front().is_some_and(|last| {
            last.x == position.x && last.y == position.y && last.z == position.z && last.region == position.region
        });
        if same {
            return;
        }
        self.positions.push_front(position);
        self.positions.truncate(self.history);
    }

    /// Most recent first
    pub fn positions(&self) -> impl Iterator<Item = &Position> {
        self.positions.iter()
    }

    /// Updates the fall baseline and returns the descent speed when this
    /// update is a landing
    ///
    /// Landing resets the baseline to the landing height. A fully grounded
    /// update (no vertical word at all) also resets it; while airborne the
    /// baseline only rises.
    pub fn track_height(&mut self, update: &PositionUpdate, z: i32) -> Option<u16> {
        if update.is_landing() {
            self.max_grounded_z = z;
            return Some(update.descent_speed());
        }
        if update.fly_data == 0 || z > self.max_grounded_z {
            self.max_grounded_z = z;
        }
        None
    }

    /// Forgets the fall baseline, used when the player changes region
    pub fn reset_height(&mut self) {
        self.max_grounded_z = i32::MIN;
    }

    pub fn max_grounded_z(&self) -> i32 {
        self.max_grounded_z
    }

    pub fn speed_violations(&self) -> u32 {
        self.speed_violations_total
    }

    pub fn speed_streak(&self) -> u32 {
        self.speed_streak
    }

    pub fn record_fly_violation(&mut self) -> u32 {
        self.fly_violations += 1;
        self.fly_violations
    }

    pub fn fly_violations(&self) -> u32 {
        self.fly_violations
    }

    pub fn motion(&self) -> MotionState {
        self.motion
    }

    pub fn set_motion(&mut self, motion: MotionState) {
        self.motion = motion;
    }

    /// Records the zone of this update, returning whether it changed and
    /// whether the region changed along with it
    pub fn enter_zone(&mut self, zone: u16, region: u16) -> (bool, bool) {
        let zone_changed = self.zone != Some(zone);
        let region_changed = self.region.is_some_and(|r| r != region);
        self.zone = Some(zone);
        self.region = Some(region);
        self.unknown_zone_logged = false;
        (zone_changed, region_changed)
    }

    pub fn zone(&self) -> Option<u16> {
        self.zone
    }

    /// True the first time an unknown zone is reported since the last known one
    pub fn note_unknown_zone(&mut self) -> bool {
        !std::mem::replace(&mut self.unknown_zone_logged, true)
    }

    pub fn area_check_due(&self, now: Instant, interval: Duration) -> bool {
        self.last_area_check
            .map_or(true, |at| now.saturating_duration_since(at) >= interval)
    }

    /// Replaces the area set and reports the difference
    pub fn update_areas(&mut self, now: Instant, current: BTreeSet<u16>) -> AreaChanges {
        self.last_area_check = Some(now);
        let entered = current.difference(&self.areas).copied().collect();
        let left = self.areas.difference(&current).copied().collect();
        self.areas = current;
        AreaChanges { entered, left }
    }

    pub fn areas(&self) -> &BTreeSet<u16> {
        &self.areas
    }
}

/// Whether the update claims the debug flight mode without permission
pub fn is_unauthorized_flight(update: &PositionUpdate, movement: &MovementConfig, can_fly: bool) -> bool {
    update.motion_bits() == DEBUG_FLY_BITS && !movement.debug_mode && !can_fly
}

/// Damage percentage for a landing, zero when the fall was harmless
///
/// Builds from `revised_from_build` on use the revised threshold and divisor.
/// Every safe-fall level absorbs `safe_fall_step` units of descent speed.
pub fn fall_damage_percent(descent_speed: u16, safe_fall: u8, build: ClientBuild, fall: &FallDamageConfig) -> i32 {
    let (min_speed, divisor) = if build.number() >= fall.revised_from_build {
        (fall.revised_min_speed, fall.revised_divisor)
    } else {
        (fall.min_speed, fall.divisor)
    };
    let speed = i32::from(descent_speed) - fall.safe_fall_step * i32::from(safe_fall);
    if speed <= min_speed {
        return 0;
    }
    ((speed - (min_speed + 1)) / divisor).clamp(0, fall.max_percent)
}

pub fn fall_damage(percent: i32, max_health: i32) -> f64 {
    0.01 * f64::from(percent) * f64::from(max_health - 1)
}

pub fn fall_endurance_cost(percent: i32, max_endurance: i32) -> i32 {
    max_endurance * percent / 100
}

/// Rewrites a client update into the form observers receive
///
/// The mount overrides speed, heading and vertical word; death overrides
/// the motion bits. The diving bit moves to its broadcast position and the
/// stealth bit reflects the server's view. The health byte keeps its top
/// bit and carries the server's health percentage.
pub fn sanitize_broadcast(update: &PositionUpdate, player: &PlayerSnapshot) -> PositionUpdate {
    let mut out = *update;
    out.session = player.session;

    if let Some(steed) = &player.steed {
        out.speed_data = 0x1800;
        out.heading_data = steed.object_id;
        out.fly_data = u16::from(steed.rider_slot);
    } else if !player.alive {
        out.speed_data = (out.speed_data & 0xE3FF) | 0x1400;
    }

    let diving = out.flags & FLAG_DIVING != 0;
    out.flags &= 0xFB;
    if diving {
        out.flags |= 0x04;
    }
    out.flags &= 0xFC;
    if player.stealthed {
        out.flags |= FLAG_STEALTH;
    }

    out.health_byte = (out.health_byte & 0x80) | (player.health_percent & 0x7F);
    out
}
