//! Keep-alives and datagram path setup

use crate::context::HandlerContext;
use crate::encoder::UdpInitView;
use crate::error::PipelineError;
use crate::registry::PacketHandler;
use crate::session_manager;
use log::{debug, info};
use shared::messages::{PingRequest, UdpInitRequest};
use shared::{Frame, Transport};
use std::net::SocketAddr;
use std::time::{SystemTime, UNIX_EPOCH};

pub struct PingHandler;

impl PacketHandler for PingHandler {
    fn name(&self) -> &'static str {
        "ping"
    }

    fn handle(&self, ctx: &mut HandlerContext<'_>, frame: &mut Frame) -> Result<(), PipelineError> {
        let encoder = ctx.encoder(frame.code())?;
        let ping = PingRequest::decode(frame)?;
        ctx.send(&encoder.ping_reply(ping.timestamp, ping.sequence))
    }
}

/// Records the client's datagram endpoint and answers over it
pub struct UdpInitHandler;

impl PacketHandler for UdpInitHandler {
    fn name(&self) -> &'static str {
        "udp-init"
    }

    fn handle(&self, ctx: &mut HandlerContext<'_>, frame: &mut Frame) -> Result<(), PipelineError> {
        let encoder = ctx.encoder(frame.code())?;
        let request = UdpInitRequest::decode(frame)?;
        let peer = SocketAddr::new(ctx.conn.addr.ip(), request.port);

        ctx.conn.outbound.set_datagram_peer(peer);
        session_manager::write(&ctx.server.directory).bind_udp(ctx.conn.session, peer);
        info!("Session {}: datagram endpoint {}", ctx.conn.session, peer);

        let server_ip = ctx.server.udp_addr.ip().to_string();
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_secs());
        let reply = encoder.udp_init_reply(&UdpInitView {
            server_ip: &server_ip,
            server_port: ctx.server.udp_addr.port(),
            timestamp,
        });
        ctx.conn.outbound.send_datagram(&reply, true)
    }
}

/// Datagram keep-alive; proves the datagram path works in both directions
pub struct UdpPingHandler;

impl PacketHandler for UdpPingHandler {
    fn name(&self) -> &'static str {
        "udp-ping"
    }

    fn handle(&self, ctx: &mut HandlerContext<'_>, frame: &mut Frame) -> Result<(), PipelineError> {
        if frame.transport() != Transport::Datagram {
            debug!("Session {}: datagram ping arrived over the stream", ctx.conn.session);
            return Ok(());
        }
        if !ctx.conn.outbound.is_datagram_confirmed() {
            debug!("Session {}: datagram path confirmed", ctx.conn.session);
        }
        ctx.conn.outbound.confirm_datagram();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::testing::{
        codes, connect, negotiate, plain_datagram, plain_stream, sent, sent_datagrams, server,
    };
    use crate::handlers::frame_of;
    use shared::{ClientCode, ServerCode};
    use std::sync::Arc;

    #[test]
    fn test_ping_echoes_timestamp_and_next_sequence() {
        let server = server();
        let (mut conn, mut channels) = connect(&server, 6100);
        let outbound = Arc::clone(&conn.outbound);
        negotiate(&server, &mut conn, 168);

        let mut ctx = HandlerContext {
            server: &server,
            conn: &mut conn,
        };
        let ping = PingRequest {
            timestamp: 0xDEAD_BEEF,
            sequence: 41,
        };
        PingHandler.handle(&mut ctx, &mut frame_of(ping.encode())).unwrap();

        let mut frames = sent(&outbound, &mut channels, &plain_stream());
        assert_eq!(codes(&frames), vec![ServerCode::PingReply.as_u8()]);
        let reply = &mut frames[0];
        assert_eq!(reply.read_u32().unwrap(), 0xDEAD_BEEF);
        reply.skip(4).unwrap();
        assert_eq!(reply.read_u16().unwrap(), 42);
    }

    #[test]
    fn test_udp_init_binds_peer_and_replies_over_datagram() {
        let server = server();
        let (mut conn, mut channels) = connect(&server, 6101);
        let outbound = Arc::clone(&conn.outbound);
        negotiate(&server, &mut conn, 1125);

        let mut ctx = HandlerContext {
            server: &server,
            conn: &mut conn,
        };
        let request = UdpInitRequest { port: 7777 };
        UdpInitHandler.handle(&mut ctx, &mut frame_of(request.encode())).unwrap();

        let peer: SocketAddr = "127.0.0.1:7777".parse().unwrap();
        assert_eq!(outbound.datagram_peer(), Some(peer));
        assert_eq!(
            session_manager::read(&server.directory).find_by_udp_addr(peer),
            Some(conn.session)
        );

        let datagrams = sent_datagrams(&outbound, &mut channels, &plain_datagram());
        assert_eq!(codes(&datagrams), vec![ServerCode::UdpInitReply.as_u8()]);
        assert_eq!(datagrams[0].payload().len(), 8);
        assert!(sent(&outbound, &mut channels, &plain_stream()).is_empty());
    }

    #[test]
    fn test_udp_ping_confirms_datagram_path() {
        let server = server();
        let (mut conn, _channels) = connect(&server, 6102);
        let outbound = Arc::clone(&conn.outbound);
        assert!(!outbound.is_datagram_confirmed());

        let mut ctx = HandlerContext {
            server: &server,
            conn: &mut conn,
        };
        let mut ping = Frame::new(ClientCode::UdpPing.as_u8(), 0, Some(3), bytes::Bytes::new());
        UdpPingHandler.handle(&mut ctx, &mut ping).unwrap();
        assert!(outbound.is_datagram_confirmed());
    }

    #[test]
    fn test_udp_ping_over_stream_does_not_confirm() {
        let server = server();
        let (mut conn, _channels) = connect(&server, 6103);
        let outbound = Arc::clone(&conn.outbound);

        let mut ctx = HandlerContext {
            server: &server,
            conn: &mut conn,
        };
        let mut ping = Frame::new(ClientCode::UdpPing.as_u8(), 0, None, bytes::Bytes::new());
        UdpPingHandler.handle(&mut ctx, &mut ping).unwrap();
        assert!(!outbound.is_datagram_confirmed());
    }
}
