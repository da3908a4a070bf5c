//! Account login and world entry

use super::observers;
use crate::context::HandlerContext;
use crate::encoder::LoginGrantedView;
use crate::error::PipelineError;
use crate::movement::MovementState;
use crate::registry::PacketHandler;
use crate::session_manager;
use log::{debug, info, warn};
use shared::messages::LoginRequest;
use shared::{ClientCode, ConnectionState, Frame};

/// Colour scheme byte of the login reply
const SERVER_COLOR: u8 = 0x00;

pub struct LoginHandler;

impl PacketHandler for LoginHandler {
    fn name(&self) -> &'static str {
        "login"
    }

    fn handle(&self, ctx: &mut HandlerContext<'_>, frame: &mut Frame) -> Result<(), PipelineError> {
        let encoder = ctx.encoder(frame.code())?;
        let request = LoginRequest::decode(frame)?;
        if ctx.conn.account.is_some() {
            debug!("Session {}: repeated login ignored", ctx.conn.session);
            return Ok(());
        }

        match ctx.server.accounts.authenticate(&request.account, &request.password) {
            Ok(account) => {
                ctx.send(&encoder.login_granted(&LoginGrantedView {
                    build: ctx.build(),
                    account: &account.name,
                    server_name: &ctx.server.config.server_name,
                    color: SERVER_COLOR,
                }))?;
                info!("Session {}: account {} logged in", ctx.conn.session, account.name);
                ctx.conn.account = Some(account);
                ctx.conn.advance(ConnectionState::Authenticated);
                Ok(())
            }
            Err(error) => {
                warn!(
                    "Session {}: login for {} refused: {:?}",
                    ctx.conn.session, request.account, error
                );
                ctx.send(&encoder.login_denied(ctx.build(), error))?;
                Err(PipelineError::LoginRejected(request.account))
            }
        }
    }
}

/// Loads the character, describes it to its client and introduces it to
/// the players around it
pub struct WorldInitHandler;

impl PacketHandler for WorldInitHandler {
    fn name(&self) -> &'static str {
        "world-init"
    }

    fn handle(&self, ctx: &mut HandlerContext<'_>, frame: &mut Frame) -> Result<(), PipelineError> {
        let encoder = ctx.encoder(frame.code())?;
        let Some(account) = ctx.conn.account.clone() else {
            return Err(PipelineError::NotNegotiated(ClientCode::WorldInitRequest.as_u8()));
        };
        if ctx.conn.player.is_some() {
            debug!("Session {}: already in the world", ctx.conn.session);
            return Ok(());
        }

        let world = &ctx.server.world;
        let Some(player) = world.enter_world(&account.name, ctx.conn.session) else {
            ctx.system_message(&encoder, "Your character is already in the world.")?;
            return Err(PipelineError::LoginRejected(account.name));
        };
        let Some(zone) = world.zone(player.position.zone) else {
            world.leave_world(player.id);
            ctx.system_message(&encoder, "Your character is in an unknown zone.")?;
            return Err(PipelineError::LoginRejected(account.name));
        };

        ctx.send(&encoder.position_and_object_id(&player, &zone, &ctx.server.config.server_name))?;
        ctx.send(&encoder.equipment_update(&player, &world.equipment(player.id)))?;
        ctx.send_all(&encoder.inventory_update(&player, &world.inventory(player.id), 0))?;

        let mut movement = MovementState::new(&player.position, ctx.server.config.movement.position_history);
        movement.enter_zone(zone.id, zone.region);
        ctx.conn.movement = Some(movement);
        ctx.conn.player = Some(player.id);
        ctx.conn.advance(ConnectionState::InWorld);
        ctx.conn.outbound.set_in_world(true);
        session_manager::write(&ctx.server.directory).bind_player(ctx.conn.session, Some(player.id));

        for (other_id, handle) in observers(ctx.server, player.id, &player.position) {
            if let Some(their_encoder) = &handle.encoder {
                if let Err(e) = handle.outbound.send(&their_encoder.player_create(&player, &zone)) {
                    debug!("Session {}: cannot introduce {}: {}", handle.session, player.name, e);
                }
            }
            let Some(other) = world.player(other_id) else {
                continue;
            };
            if let Some(other_zone) = world.zone(other.position.zone) {
                ctx.send(&encoder.player_create(&other, &other_zone))?;
            }
        }

        info!(
            "Session {}: {} entered {} as object {}",
            ctx.conn.session, player.name, zone.name, player.object_id
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::testing::{codes, connect, negotiate, plain_stream, sent, server, server_with};
    use crate::context::Collaborators;
    use crate::handlers::frame_of;
    use crate::world::InMemoryAccounts;
    use shared::{LoginError, ServerCode};
    use std::sync::Arc;

    fn login(name: &str, password: &str) -> Frame {
        frame_of(
            LoginRequest {
                account: name.to_string(),
                password: password.to_string(),
            }
            .encode(),
        )
    }

    fn world_init() -> Frame {
        Frame::new(ClientCode::WorldInitRequest.as_u8(), 0, None, bytes::Bytes::new())
    }

    #[test]
    fn test_login_before_handshake_is_fatal() {
        let server = server();
        let (mut conn, _channels) = connect(&server, 6000);
        let mut ctx = HandlerContext {
            server: &server,
            conn: &mut conn,
        };
        let err = LoginHandler.handle(&mut ctx, &mut login("arthur", "pw")).unwrap_err();
        assert!(matches!(err, PipelineError::NotNegotiated(0xA7)));
    }

    #[test]
    fn test_login_grants_and_authenticates() {
        let server = server();
        let (mut conn, mut channels) = connect(&server, 6001);
        let outbound = Arc::clone(&conn.outbound);
        negotiate(&server, &mut conn, 1125);

        let mut ctx = HandlerContext {
            server: &server,
            conn: &mut conn,
        };
        LoginHandler.handle(&mut ctx, &mut login("arthur", "pw")).unwrap();
        assert_eq!(conn.state, ConnectionState::Authenticated);
        assert_eq!(conn.account.as_ref().unwrap().name, "arthur");

        let frames = sent(&outbound, &mut channels, &plain_stream());
        assert_eq!(codes(&frames), vec![ServerCode::LoginGranted.as_u8()]);
        assert_eq!(&frames[0].payload()[..7], &[6, b'a', b'r', b't', b'h', b'u', b'r']);
    }

    #[test]
    fn test_wrong_password_is_denied() {
        let accounts = Arc::new(InMemoryAccounts::new());
        accounts.add("arthur", "secret", false);
        let server = server_with(Collaborators {
            accounts,
            ..Collaborators::in_memory()
        });
        let (mut conn, mut channels) = connect(&server, 6002);
        let outbound = Arc::clone(&conn.outbound);
        negotiate(&server, &mut conn, 168);

        let mut ctx = HandlerContext {
            server: &server,
            conn: &mut conn,
        };
        let err = LoginHandler.handle(&mut ctx, &mut login("arthur", "nope")).unwrap_err();
        assert!(matches!(err, PipelineError::LoginRejected(ref name) if name == "arthur"));
        assert!(err.is_graceful());
        assert_eq!(conn.state, ConnectionState::Connecting);

        let frames = sent(&outbound, &mut channels, &plain_stream());
        assert_eq!(frames[0].code(), ServerCode::LoginDenied.as_u8());
        assert_eq!(frames[0].payload()[0], LoginError::WrongPassword as u8);
    }

    #[test]
    fn test_world_entry_introduces_players_both_ways() {
        let server = server();

        let (mut first, mut first_channels) = connect(&server, 6003);
        let first_out = Arc::clone(&first.outbound);
        negotiate(&server, &mut first, 168);
        let (mut second, mut second_channels) = connect(&server, 6004);
        let second_out = Arc::clone(&second.outbound);
        negotiate(&server, &mut second, 1125);

        for (conn, name) in [(&mut first, "lancelot"), (&mut second, "gawain")] {
            let mut ctx = HandlerContext { server: &server, conn };
            LoginHandler.handle(&mut ctx, &mut login(name, "pw")).unwrap();
            WorldInitHandler.handle(&mut ctx, &mut world_init()).unwrap();
        }

        assert_eq!(first.state, ConnectionState::InWorld);
        assert!(first.movement.is_some());
        assert!(second.player.is_some());

        let to_first = codes(&sent(&first_out, &mut first_channels, &plain_stream()));
        let to_second = codes(&sent(&second_out, &mut second_channels, &plain_stream()));

        assert_eq!(
            &to_second[..4],
            &[
                ServerCode::LoginGranted.as_u8(),
                ServerCode::PositionAndObjectId.as_u8(),
                ServerCode::EquipmentUpdate.as_u8(),
                ServerCode::InventoryUpdate.as_u8(),
            ]
        );
        assert_eq!(to_first.last(), Some(&ServerCode::PlayerCreate.as_u8()));
        assert_eq!(to_second.last(), Some(&ServerCode::PlayerCreate172.as_u8()));
    }

    #[test]
    fn test_same_account_cannot_enter_twice() {
        let server = server();
        let (mut first, _c1) = connect(&server, 6005);
        let (mut second, _c2) = connect(&server, 6006);
        negotiate(&server, &mut first, 1125);
        negotiate(&server, &mut second, 1125);

        let mut ctx = HandlerContext {
            server: &server,
            conn: &mut first,
        };
        LoginHandler.handle(&mut ctx, &mut login("percival", "pw")).unwrap();
        WorldInitHandler.handle(&mut ctx, &mut world_init()).unwrap();

        let mut ctx = HandlerContext {
            server: &server,
            conn: &mut second,
        };
        LoginHandler.handle(&mut ctx, &mut login("percival", "pw")).unwrap();
        let err = WorldInitHandler.handle(&mut ctx, &mut world_init()).unwrap_err();
        assert!(matches!(err, PipelineError::LoginRejected(_)));
    }
}
