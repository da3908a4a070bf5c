//! Player movement: validation, world commit and observer broadcast

use super::observers;
use crate::context::{HandlerContext, ServerContext};
use crate::encoder::Encoder;
use crate::error::PipelineError;
use crate::movement::{
    fall_damage, fall_damage_percent, fall_endurance_cost, is_unauthorized_flight, sanitize_broadcast,
    IntervalCheck, MotionState, MovementState, FELL_THROUGH_WORLD_Z,
};
use crate::registry::PacketHandler;
use crate::world::{PlayerSnapshot, Position};
use log::{debug, error, info, warn};
use shared::messages::PositionUpdate;
use shared::{Frame, OutPacket, ProtocolFamily};
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Movement handler for one protocol family
///
/// The family decides the wire layout of the zone field.
pub struct PositionHandler {
    family: ProtocolFamily,
}

impl PositionHandler {
    pub fn new(family: ProtocolFamily) -> Self {
        Self { family }
    }

    fn validate(
        &self,
        ctx: &mut HandlerContext<'_>,
        movement: &mut MovementState,
        encoder: &Encoder,
        update: PositionUpdate,
        player: PlayerSnapshot,
    ) -> Result<(), PipelineError> {
        let server = ctx.server;
        let world = &server.world;
        let config = &server.config.movement;
        let now = Instant::now();

        let Some(zone) = world.zone(update.zone) else {
            if movement.note_unknown_zone() {
                warn!(
                    "Session {}: {} reported unknown zone {}",
                    ctx.conn.session, player.name, update.zone
                );
                ctx.system_message(encoder, "Unknown zone, moving you to your bind point.")?;
            }
            world.move_to_bind(player.id);
            return Ok(());
        };

        let z = i32::from(update.z);
        if z == FELL_THROUGH_WORLD_Z {
            warn!("Session {}: {} fell through the world", ctx.conn.session, player.name);
            ctx.system_message(encoder, "You fell through the world and are moved to your bind point.")?;
            world.move_to_bind(player.id);
            movement.reset_height();
            return Ok(());
        }

        let can_fly = ctx.conn.account.as_ref().map_or(false, |a| a.can_fly);
        if is_unauthorized_flight(&update, config, can_fly) {
            let count = movement.record_fly_violation();
            error!(
                "Session {}: {} claimed debug flight (violation {})",
                ctx.conn.session, player.name, count
            );
            self.ban(ctx, config.ban_minutes, "fly hack");
            return Err(PipelineError::FlyHack);
        }

        if let IntervalCheck::TooFast { streak, total } = movement.check_interval(now, config.min_update_interval()) {
            if config.log_every > 0 && streak % config.log_every == 0 {
                warn!(
                    "Session {}: {} sent {} movement updates in a row too quickly ({} total)",
                    ctx.conn.session, player.name, streak, total
                );
            }
            if config.ban_enabled && streak >= config.ban_tolerance {
                self.ban(ctx, config.ban_minutes, "speed hack");
                ctx.send(&encoder.quit(true, player.level))?;
                return Err(PipelineError::SpeedHack { violations: streak });
            }
        }

        let (zone_changed, region_changed) = movement.enter_zone(zone.id, zone.region);
        if region_changed {
            movement.reset_height();
        }

        let position = Position {
            region: zone.region,
            zone: zone.id,
            x: zone.x_offset + i32::from(update.x_offset),
            y: zone.y_offset + i32::from(update.y_offset),
            z,
            heading: update.heading(),
        };

        let motion = MotionState::classify(&update, player.alive, player.steed.is_some());
        if motion != MotionState::Swimming {
            if let Some(descent) = movement.track_height(&update, z) {
                let percent = fall_damage_percent(descent, player.safe_fall, ctx.build(), &config.fall);
                if percent > 0 {
                    let damage = fall_damage(percent, player.max_health) as i32;
                    let endurance = fall_endurance_cost(percent, player.max_endurance);
                    world.apply_fall_damage(player.id, damage, endurance);
                    debug!(
                        "Session {}: {} fell at speed {} for {}% damage",
                        ctx.conn.session, player.name, descent, percent
                    );
                    ctx.system_message(encoder, &format!("You take {} damage from the fall!", damage))?;
                }
            }
        }
        movement.set_motion(motion);
        movement.remember_position(position);
        world.commit_position(player.id, position, update.speed(), update.is_diving());

        if zone_changed {
            info!("Session {}: {} entered {}", ctx.conn.session, player.name, zone.name);
            let moved = world.player(player.id).unwrap_or_else(|| player.clone());
            ctx.system_message(encoder, &format!("You have entered {}.", zone.name))?;
            ctx.send(&encoder.position_and_object_id(&moved, &zone, &server.config.server_name))?;
        }

        if movement.area_check_due(now, config.area_check_interval()) {
            let changes = movement.update_areas(now, world.areas_at(zone.id, position.x, position.y, z));
            for area in changes.left {
                world.notify_area_leave(player.id, area);
            }
            for area in changes.entered {
                world.notify_area_enter(player.id, area);
            }
        }

        let mover = world.player(player.id).unwrap_or(player);
        broadcast(server, &mover, &sanitize_broadcast(&update, &mover));
        Ok(())
    }

    fn ban(&self, ctx: &HandlerContext<'_>, minutes: u64, reason: &str) {
        if !ctx.server.config.movement.ban_enabled {
            return;
        }
        if let Some(account) = &ctx.conn.account {
            ctx.server
                .accounts
                .ban(&account.name, Duration::from_secs(minutes * 60), reason);
        }
    }
}

/// Sends the mover's sanitized update to everyone who can see it
///
/// Observers render the update with their own encoder; each version's
/// packet is built once. Observers that cannot see a stealthed mover get an
/// object removal instead.
fn broadcast(server: &ServerContext, mover: &PlayerSnapshot, update: &PositionUpdate) {
    let mut rendered: HashMap<u16, OutPacket> = HashMap::new();
    for (observer, handle) in observers(server, mover.id, &mover.position) {
        let Some(encoder) = &handle.encoder else {
            continue;
        };
        let result = if mover.stealthed && !server.world.can_detect(observer, mover.id) {
            handle.outbound.send(&encoder.object_delete(mover.object_id))
        } else {
            let packet = rendered
                .entry(encoder.version())
                .or_insert_with(|| encoder.player_position(update, mover));
            handle.outbound.send_datagram(packet, false)
        };
        if let Err(e) = result {
            debug!("Session {}: position broadcast dropped: {}", handle.session, e);
        }
    }
}

impl PacketHandler for PositionHandler {
    fn name(&self) -> &'static str {
        "position"
    }

    fn handle(&self, ctx: &mut HandlerContext<'_>, frame: &mut Frame) -> Result<(), PipelineError> {
        let encoder = ctx.encoder(frame.code())?;
        let update = PositionUpdate::decode(frame, self.family)?;
        let Some(player) = ctx.conn.player.and_then(|id| ctx.server.world.player(id)) else {
            return Ok(());
        };
        let Some(mut movement) = ctx.conn.movement.take() else {
            return Ok(());
        };
        let result = self.validate(ctx, &mut movement, &encoder, update, player);
        ctx.conn.movement = Some(movement);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::context::testing::{codes, connect, negotiate, plain_stream, sent};
    use crate::context::{Collaborators, Connection};
    use crate::handlers::{enter_world, frame_of};
    use crate::outbound::OutboundChannels;
    use crate::world::{AreaInfo, InMemoryAccounts, InMemoryWorld, WorldEvent, WorldState};
    use shared::messages::FLAG_STEALTH;
    use shared::ServerCode;
    use std::sync::Arc;

    struct Scene {
        server: ServerContext,
        world: Arc<InMemoryWorld>,
        accounts: Arc<InMemoryAccounts>,
    }

    fn scene(config: ServerConfig) -> Scene {
        let world = Arc::new(InMemoryWorld::new());
        let accounts = Arc::new(InMemoryAccounts::new());
        let server = ServerContext::new(
            config,
            Collaborators {
                world: Arc::clone(&world) as _,
                accounts: Arc::clone(&accounts) as _,
                ..Collaborators::in_memory()
            },
            "127.0.0.1:10400".parse().unwrap(),
        );
        Scene {
            server,
            world,
            accounts,
        }
    }

    fn join(scene: &Scene, port: u16, build: u16, name: &str) -> (Connection, OutboundChannels) {
        let (mut conn, mut channels) = connect(&scene.server, port);
        negotiate(&scene.server, &mut conn, build);
        enter_world(&scene.server, &mut conn, name);
        let outbound = Arc::clone(&conn.outbound);
        sent(&outbound, &mut channels, &plain_stream());
        (conn, channels)
    }

    fn update(session: u16) -> PositionUpdate {
        PositionUpdate {
            session,
            speed_data: 0,
            z: 2000,
            x_offset: 30_050,
            y_offset: 30_000,
            zone: 1,
            heading_data: 0x0123,
            fly_data: 0,
            flags: 0,
            health_byte: 0x80 | 100,
        }
    }

    fn move_player(scene: &Scene, conn: &mut Connection, update: PositionUpdate) -> Result<(), PipelineError> {
        let family = conn.family;
        let mut ctx = HandlerContext {
            server: &scene.server,
            conn,
        };
        let mut frame = frame_of(update.encode(family));
        PositionHandler::new(family).handle(&mut ctx, &mut frame)
    }

    #[test]
    fn test_update_commits_and_reaches_observer() {
        let scene = scene(ServerConfig::default());
        let (mut mover, _mc) = join(&scene, 6400, 1125, "galahad");
        let session = mover.session;
        let (observer, mut oc) = join(&scene, 6401, 168, "bors");
        let observer_out = Arc::clone(&observer.outbound);

        move_player(&scene, &mut mover, update(session)).unwrap();

        let id = mover.player.unwrap();
        let committed = scene.world.player(id).unwrap().position;
        assert_eq!((committed.x, committed.y, committed.z), (30_050, 30_000, 2000));
        assert_eq!(committed.heading, 0x0123);

        let frames = sent(&observer_out, &mut oc, &plain_stream());
        assert_eq!(codes(&frames), vec![ServerCode::PlayerPosition.as_u8()]);
        let mut frame = frames.into_iter().next().unwrap();
        let seen = PositionUpdate::decode(&mut frame, ProtocolFamily::V168).unwrap();
        assert_eq!(seen.x_offset, 30_050);
        assert_eq!(seen.health_byte, 0x80 | 100);
    }

    #[test]
    fn test_unknown_zone_moves_player_to_bind() {
        let scene = scene(ServerConfig::default());
        let (mut conn, mut channels) = join(&scene, 6402, 1125, "dagonet");
        let session = conn.session;
        let outbound = Arc::clone(&conn.outbound);

        let mut lost = update(session);
        lost.zone = 999;
        move_player(&scene, &mut conn, lost).unwrap();
        move_player(&scene, &mut conn, lost).unwrap();

        let id = conn.player.unwrap();
        let binds = scene
            .world
            .events()
            .iter()
            .filter(|e| **e == WorldEvent::MovedToBind(id))
            .count();
        assert_eq!(binds, 2);
        let messages = codes(&sent(&outbound, &mut channels, &plain_stream()));
        assert_eq!(messages, vec![ServerCode::Message.as_u8()]);
    }

    #[test]
    fn test_falling_through_world_moves_player_to_bind() {
        let scene = scene(ServerConfig::default());
        let (mut conn, _channels) = join(&scene, 6403, 168, "lamorak");
        let session = conn.session;
        let mut fell = update(session);
        fell.z = 0;
        move_player(&scene, &mut conn, fell).unwrap();
        let id = conn.player.unwrap();
        assert!(scene.world.events().contains(&WorldEvent::MovedToBind(id)));
    }

    #[test]
    fn test_debug_flight_is_fatal_and_bans_when_enabled() {
        let mut config = ServerConfig::default();
        config.movement.ban_enabled = true;
        let scene = scene(config);
        let (mut conn, _channels) = join(&scene, 6404, 1125, "mordred");
        let session = conn.session;

        let mut flying = update(session);
        flying.speed_data = 3 << 10;
        let err = move_player(&scene, &mut conn, flying).unwrap_err();
        assert!(matches!(err, PipelineError::FlyHack));
        assert!(!err.is_graceful());
        assert!(scene.accounts.is_banned("mordred"));
        assert_eq!(conn.movement.as_ref().unwrap().fly_violations(), 1);
    }

    #[test]
    fn test_debug_flight_allowed_for_flying_accounts() {
        let scene = scene(ServerConfig::default());
        scene.accounts.add("merlin", "pw", true);
        let (mut conn, _channels) = join(&scene, 6405, 1125, "merlin");
        let session = conn.session;
        let mut flying = update(session);
        flying.speed_data = 3 << 10;
        move_player(&scene, &mut conn, flying).unwrap();
    }

    #[test]
    fn test_rapid_updates_count_without_ban_by_default() {
        let scene = scene(ServerConfig::default());
        let (mut conn, _channels) = join(&scene, 6406, 1125, "agravain");
        let session = conn.session;
        for _ in 0..6 {
            move_player(&scene, &mut conn, update(session)).unwrap();
        }
        let movement = conn.movement.as_ref().unwrap();
        assert_eq!(movement.speed_violations(), 5);
        assert_eq!(movement.speed_streak(), 5);
        assert!(!scene.accounts.is_banned("agravain"));
    }

    #[test]
    fn test_speed_hack_past_tolerance_bans_and_quits() {
        let mut config = ServerConfig::default();
        config.movement.ban_enabled = true;
        config.movement.ban_tolerance = 3;
        let scene = scene(config);
        let (mut conn, mut channels) = join(&scene, 6407, 1125, "gaheris");
        let session = conn.session;
        let outbound = Arc::clone(&conn.outbound);

        for _ in 0..3 {
            move_player(&scene, &mut conn, update(session)).unwrap();
        }
        let err = move_player(&scene, &mut conn, update(session)).unwrap_err();
        assert!(matches!(err, PipelineError::SpeedHack { violations: 3 }));
        assert!(scene.accounts.is_banned("gaheris"));
        let sent_codes = codes(&sent(&outbound, &mut channels, &plain_stream()));
        assert_eq!(sent_codes.last(), Some(&ServerCode::Quit.as_u8()));
    }

    #[test]
    fn test_hard_landing_applies_fall_damage() {
        let scene = scene(ServerConfig::default());
        let (mut conn, _channels) = join(&scene, 6408, 1125, "pelleas");
        let session = conn.session;
        let mut landing = update(session);
        landing.fly_data = 0x8000 | 1200;
        move_player(&scene, &mut conn, landing).unwrap();

        let id = conn.player.unwrap();
        assert!(scene.world.events().contains(&WorldEvent::FallDamage {
            player: id,
            damage: 45,
            endurance: 46,
        }));
        assert_eq!(scene.world.player(id).unwrap().health, 55);
    }

    #[test]
    fn test_landing_while_swimming_is_harmless() {
        let scene = scene(ServerConfig::default());
        let (mut conn, _channels) = join(&scene, 6409, 1125, "ector");
        let session = conn.session;
        let mut landing = update(session);
        landing.speed_data = 1 << 10;
        landing.fly_data = 0x8000 | 1200;
        move_player(&scene, &mut conn, landing).unwrap();

        let id = conn.player.unwrap();
        assert_eq!(scene.world.player(id).unwrap().health, 100);
    }

    #[test]
    fn test_zone_change_announces_new_zone() {
        let scene = scene(ServerConfig::default());
        let (mut conn, mut channels) = join(&scene, 6410, 1125, "safir");
        let session = conn.session;
        let outbound = Arc::clone(&conn.outbound);

        let mut crossing = update(session);
        crossing.zone = 2;
        crossing.x_offset = 100;
        move_player(&scene, &mut conn, crossing).unwrap();

        let id = conn.player.unwrap();
        assert_eq!(scene.world.player(id).unwrap().position.x, 65_636);
        assert_eq!(
            codes(&sent(&outbound, &mut channels, &plain_stream())),
            vec![ServerCode::Message.as_u8(), ServerCode::PositionAndObjectId.as_u8()]
        );
        assert_eq!(conn.movement.as_ref().unwrap().zone(), Some(2));
    }

    #[test]
    fn test_area_entry_is_notified() {
        let scene = scene(ServerConfig::default());
        scene.world.add_area(AreaInfo {
            id: 7,
            zone: 1,
            x: 30_000,
            y: 30_000,
            radius: 500,
        });
        let (mut conn, _channels) = join(&scene, 6411, 168, "palomides");
        let session = conn.session;
        move_player(&scene, &mut conn, update(session)).unwrap();

        let id = conn.player.unwrap();
        assert!(scene
            .world
            .events()
            .contains(&WorldEvent::AreaEntered { player: id, area: 7 }));
        assert!(conn.movement.as_ref().unwrap().areas().contains(&7));
    }

    #[test]
    fn test_hidden_stealther_is_removed_from_view() {
        let scene = scene(ServerConfig::default());
        let (mut mover, _mc) = join(&scene, 6412, 1125, "shade");
        let session = mover.session;
        let (observer, mut oc) = join(&scene, 6413, 1125, "watcher");
        let observer_out = Arc::clone(&observer.outbound);
        let mover_id = mover.player.unwrap();
        scene.world.update_player(mover_id, |p| p.stealthed = true);

        move_player(&scene, &mut mover, update(session)).unwrap();
        let frames = sent(&observer_out, &mut oc, &plain_stream());
        assert_eq!(codes(&frames), vec![ServerCode::ObjectDelete.as_u8()]);

        scene
            .world
            .update_player(observer.player.unwrap(), |p| p.detects_stealth = true);
        move_player(&scene, &mut mover, update(session)).unwrap();
        let mut frames = sent(&observer_out, &mut oc, &plain_stream());
        assert_eq!(codes(&frames), vec![ServerCode::PlayerPosition.as_u8()]);
        let seen = PositionUpdate::decode(&mut frames[0], ProtocolFamily::V172).unwrap();
        assert_eq!(seen.flags & FLAG_STEALTH, FLAG_STEALTH);
    }
}
