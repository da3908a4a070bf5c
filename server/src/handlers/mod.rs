//! Client message handlers and their registration
//!
//! [`install`] is the single place that decides which opcode goes to which
//! handler, in which protocol family, behind which connection state.

mod handshake;
mod login;
mod ping;
mod position;
mod session;
mod skills;

pub use handshake::HandshakeHandler;
pub use login::{LoginHandler, WorldInitHandler};
pub use ping::{PingHandler, UdpInitHandler, UdpPingHandler};
pub use position::PositionHandler;
pub use session::{CrashHandler, QuitHandler};
pub use skills::{SkillListHandler, TrainerWindowHandler};

use crate::context::ServerContext;
use crate::gate::PreconditionGate;
use crate::registry::HandlerRegistry;
use crate::session_manager::{self, ConnectionHandle};
use crate::world::{PlayerId, Position};
use shared::{ClientCode, ProtocolFamily, Requirement};
use std::sync::Arc;

/// Fills the registry and the gate with every handler the server ships
pub fn install(registry: &mut HandlerRegistry, gate: &mut PreconditionGate) {
    let open = [
        (ClientCode::CryptKeyRequest, Requirement::None),
        (ClientCode::LoginRequest, Requirement::None),
        (ClientCode::PingRequest, Requirement::None),
        (ClientCode::UdpInitRequest, Requirement::None),
        (ClientCode::UdpPing, Requirement::None),
        (ClientCode::ClientCrash, Requirement::None),
        (ClientCode::WorldInitRequest, Requirement::Authenticated),
        (ClientCode::QuitRequest, Requirement::Authenticated),
        (ClientCode::PlayerPositionUpdate, Requirement::InWorld),
        (ClientCode::SkillListRequest, Requirement::InWorld),
        (ClientCode::TrainerWindowRequest, Requirement::InWorld),
    ];
    for (code, requirement) in open {
        gate.require(code, requirement);
    }

    registry.register_all(ClientCode::CryptKeyRequest, Arc::new(HandshakeHandler));
    registry.register_all(ClientCode::LoginRequest, Arc::new(LoginHandler));
    registry.register_all(ClientCode::WorldInitRequest, Arc::new(WorldInitHandler));
    registry.register_all(ClientCode::PingRequest, Arc::new(PingHandler));
    registry.register_all(ClientCode::UdpInitRequest, Arc::new(UdpInitHandler));
    registry.register_all(ClientCode::UdpPing, Arc::new(UdpPingHandler));
    registry.register_all(ClientCode::QuitRequest, Arc::new(QuitHandler));
    registry.register_all(ClientCode::ClientCrash, Arc::new(CrashHandler));
    registry.register_all(ClientCode::SkillListRequest, Arc::new(SkillListHandler));
    registry.register_all(ClientCode::TrainerWindowRequest, Arc::new(TrainerWindowHandler));

    // The position layout differs between families.
    for family in ProtocolFamily::ALL {
        registry.register(
            family,
            ClientCode::PlayerPositionUpdate,
            Arc::new(PositionHandler::new(family)),
        );
    }
}

/// Connections whose players can see `position`, excluding `player` itself
///
/// Players without a live connection are skipped. The directory lock is
/// released before this returns.
pub fn observers(server: &ServerContext, player: PlayerId, position: &Position) -> Vec<(PlayerId, ConnectionHandle)> {
    let nearby = server.world.players_in_radius(
        position.region,
        position.x,
        position.y,
        position.z,
        server.config.movement.visibility_radius,
    );
    let directory = session_manager::read(&server.directory);
    nearby
        .into_iter()
        .filter(|&id| id != player)
        .filter_map(|id| directory.handle_for_player(id).map(|handle| (id, handle)))
        .collect()
}

#[cfg(test)]
pub(crate) fn frame_of(packet: shared::OutPacket) -> shared::Frame {
    shared::Frame::new(packet.code, 0, None, packet.payload)
}

/// Logs `conn` in as `account` and brings its character into the world
#[cfg(test)]
pub(crate) fn enter_world(server: &ServerContext, conn: &mut crate::context::Connection, account: &str) {
    use crate::context::HandlerContext;
    use crate::registry::PacketHandler;
    use shared::messages::LoginRequest;

    let mut ctx = HandlerContext { server, conn };
    let login = LoginRequest {
        account: account.to_string(),
        password: "pw".to_string(),
    };
    LoginHandler.handle(&mut ctx, &mut frame_of(login.encode())).unwrap();
    let mut init = shared::Frame::new(ClientCode::WorldInitRequest.as_u8(), 0, None, bytes::Bytes::new());
    WorldInitHandler.handle(&mut ctx, &mut init).unwrap();
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::ConnectionState;

    #[test]
    fn test_every_client_code_is_routed() {
        let mut registry = HandlerRegistry::new();
        let mut gate = PreconditionGate::new();
        install(&mut registry, &mut gate);

        for family in ProtocolFamily::ALL {
            for code in ClientCode::ALL {
                assert!(
                    registry.resolve(family, code.as_u8()).is_some(),
                    "{:?} missing in {}",
                    code,
                    family
                );
            }
        }
        assert!(gate.authorize(ClientCode::CryptKeyRequest.as_u8(), ConnectionState::Connecting));
        assert!(!gate.authorize(ClientCode::PlayerPositionUpdate.as_u8(), ConnectionState::Authenticated));
    }
}
