//! Version negotiation and key exchange

use crate::context::HandlerContext;
use crate::encoder::CryptKeyView;
use crate::error::{HandshakeError, PipelineError};
use crate::registry::PacketHandler;
use crate::session_manager;
use log::{debug, info, warn};
use shared::messages::CryptKeyRequest;
use shared::{CipherContext, CipherKey, Expansion, Frame, LoginError};
use std::sync::Arc;

pub struct HandshakeHandler;

impl HandshakeHandler {
    fn reject(ctx: &HandlerContext<'_>, request: &CryptKeyRequest, error: HandshakeError) -> Result<(), PipelineError> {
        warn!(
            "Session {} from {}: handshake rejected: {}",
            ctx.conn.session, ctx.conn.addr, error
        );
        let code = match error {
            HandshakeError::UnsupportedBuild(_) => LoginError::ClientVersionTooLow,
            HandshakeError::ExpansionNotAllowed { .. } | HandshakeError::UnknownExpansion(_) => {
                LoginError::NotAuthorizedToUseExpansionVersion
            }
        };
        if let Some(encoder) = ctx.server.encoders.nearest(request.build) {
            ctx.send(&encoder.login_denied(request.build, code))?;
            ctx.system_message(&encoder, &error.to_string())?;
        }
        Err(PipelineError::Handshake(error))
    }
}

impl PacketHandler for HandshakeHandler {
    fn name(&self) -> &'static str {
        "handshake"
    }

    fn handle(&self, ctx: &mut HandlerContext<'_>, frame: &mut Frame) -> Result<(), PipelineError> {
        let request = CryptKeyRequest::decode(frame)?;
        if ctx.conn.encoder.is_some() {
            debug!("Session {}: repeated handshake ignored", ctx.conn.session);
            return Ok(());
        }

        let Some(expansion) = Expansion::from_u8(request.expansion) else {
            return Self::reject(ctx, &request, HandshakeError::UnknownExpansion(request.expansion));
        };
        let encoder = match ctx.server.encoders.select(request.build, expansion) {
            Ok(encoder) => encoder,
            Err(e) => return Self::reject(ctx, &request, e),
        };

        let stream_key = CipherKey::generate();
        let datagram_key = CipherKey::generate();

        // The key reply itself still goes out in the clear.
        ctx.send(&encoder.crypt_key(&CryptKeyView {
            build: request.build,
            stream_key: &stream_key,
            datagram_key: &datagram_key,
        }))?;

        ctx.conn.outbound.set_ciphers(
            CipherContext::Keyed(stream_key.clone()),
            CipherContext::Keyed(datagram_key.clone()),
        );
        ctx.conn.stream_rx.set_cipher(CipherContext::Keyed(stream_key));
        ctx.conn.datagram_rx.set_cipher(CipherContext::Keyed(datagram_key));

        ctx.send(&encoder.session_id(ctx.conn.session))?;

        session_manager::write(&ctx.server.directory).bind_encoder(ctx.conn.session, Arc::clone(&encoder));
        ctx.conn.build = Some(request.build);
        ctx.conn.family = request.build.family();
        ctx.conn.encoder = Some(Arc::clone(&encoder));

        info!(
            "Session {}: client {} ({:?}) bound to encoder {} in family {}",
            ctx.conn.session,
            request.build,
            expansion,
            encoder.version(),
            ctx.conn.family
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::testing::{codes, connect, plain_stream, sent, server};
    use crate::handlers::frame_of;
    use shared::{ClientBuild, FrameCodec, ProtocolFamily, ServerCode};

    fn request(build: u16, expansion: u8) -> Frame {
        frame_of(
            CryptKeyRequest {
                client_type: 1,
                build: ClientBuild(build),
                expansion,
            }
            .encode(),
        )
    }

    #[test]
    fn test_handshake_binds_encoder_and_keys() {
        let server = server();
        let (mut conn, mut channels) = connect(&server, 5000);
        let outbound = Arc::clone(&conn.outbound);

        let mut ctx = HandlerContext {
            server: &server,
            conn: &mut conn,
        };
        HandshakeHandler.handle(&mut ctx, &mut request(1125, 2)).unwrap();

        assert_eq!(conn.encoder.as_ref().unwrap().version(), 1125);
        assert_eq!(conn.family, ProtocolFamily::V172);
        assert!(conn.stream_rx.cipher().is_keyed());

        let mut batches = Vec::new();
        while let Ok(batch) = channels.stream.try_recv() {
            batches.push(batch);
            while let Some(next) = outbound.complete_stream() {
                batches.push(next);
            }
        }
        let wire: Vec<u8> = batches.iter().flat_map(|b| b.iter().copied()).collect();

        let plain = plain_stream();
        let shared::DecodeOutcome::Frame { frame, consumed } = plain.decode(&wire).unwrap() else {
            panic!("crypt key frame missing");
        };
        assert_eq!(frame.code(), ServerCode::CryptKey.as_u8());

        // Recover the stream key from the reply: [len:u32le][text][major][minor][len:u16][key]
        let payload = frame.payload();
        let text_len = u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]) as usize;
        let at = 4 + text_len + 2;
        let key_len = u16::from_be_bytes([payload[at], payload[at + 1]]) as usize;
        let key = CipherKey::new(payload[at + 2..at + 2 + key_len].to_vec()).unwrap();

        let mut keyed = FrameCodec::stream(u16::MAX as usize);
        keyed.set_cipher(CipherContext::Keyed(key));
        let shared::DecodeOutcome::Frame { frame, .. } = keyed.decode(&wire[consumed..]).unwrap() else {
            panic!("session id frame missing");
        };
        assert_eq!(frame.code(), ServerCode::SessionId.as_u8());
        assert_eq!(&frame.payload()[..], &conn.session.to_le_bytes());

        let handle = session_manager::read(&server.directory).handle(conn.session).unwrap();
        assert_eq!(handle.encoder.unwrap().version(), 1125);
    }

    #[test]
    fn test_unknown_build_is_refused_with_message() {
        let server = server();
        let (mut conn, mut channels) = connect(&server, 5001);
        let outbound = Arc::clone(&conn.outbound);
        let mut ctx = HandlerContext {
            server: &server,
            conn: &mut conn,
        };

        let err = HandshakeHandler.handle(&mut ctx, &mut request(1099, 0)).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Handshake(HandshakeError::UnsupportedBuild(ClientBuild(1099)))
        ));
        assert!(err.is_graceful());
        assert!(conn.encoder.is_none());

        let frames = sent(&outbound, &mut channels, &plain_stream());
        assert_eq!(
            codes(&frames),
            vec![ServerCode::LoginDenied.as_u8(), ServerCode::Message.as_u8()]
        );
        assert_eq!(frames[0].payload()[0], LoginError::ClientVersionTooLow as u8);
    }

    #[test]
    fn test_expansion_beyond_build_is_refused() {
        let server = server();
        let (mut conn, mut channels) = connect(&server, 5002);
        let outbound = Arc::clone(&conn.outbound);
        let mut ctx = HandlerContext {
            server: &server,
            conn: &mut conn,
        };

        let err = HandshakeHandler.handle(&mut ctx, &mut request(168, 2)).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Handshake(HandshakeError::ExpansionNotAllowed { .. })
        ));

        let err = HandshakeHandler.handle(&mut ctx, &mut request(168, 9)).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Handshake(HandshakeError::UnknownExpansion(9))
        ));

        let frames = sent(&outbound, &mut channels, &plain_stream());
        assert_eq!(
            frames[0].payload()[0],
            LoginError::NotAuthorizedToUseExpansionVersion as u8
        );
    }
}
