//! Client-initiated endings: quitting and crash reports

use crate::context::HandlerContext;
use crate::error::PipelineError;
use crate::registry::PacketHandler;
use crate::world::PlayerId;
use log::{error, info};
use shared::messages::CrashReport;
use shared::Frame;
use std::sync::PoisonError;

fn save(ctx: &HandlerContext<'_>, player: Option<PlayerId>) {
    if let Some(snapshot) = player.and_then(|id| ctx.server.world.player(id)) {
        ctx.server.persistence.save_player(&snapshot);
    }
}

pub struct QuitHandler;

impl PacketHandler for QuitHandler {
    fn name(&self) -> &'static str {
        "quit"
    }

    fn handle(&self, ctx: &mut HandlerContext<'_>, frame: &mut Frame) -> Result<(), PipelineError> {
        let encoder = ctx.encoder(frame.code())?;
        let level = ctx
            .conn
            .player
            .and_then(|id| ctx.server.world.player(id))
            .map_or(0, |p| p.level);

        ctx.send(&encoder.quit(true, level))?;
        save(ctx, ctx.conn.player);
        info!("Session {}: client quit", ctx.conn.session);
        Err(PipelineError::Quit)
    }
}

/// Logs what the client says went wrong along with the recent traffic
pub struct CrashHandler;

impl PacketHandler for CrashHandler {
    fn name(&self) -> &'static str {
        "crash-report"
    }

    fn handle(&self, ctx: &mut HandlerContext<'_>, frame: &mut Frame) -> Result<(), PipelineError> {
        let report = CrashReport::decode(frame)?;
        error!(
            "Session {}: client crashed in {} after {}s (account {})",
            ctx.conn.session,
            report.dll_name,
            report.uptime_secs,
            ctx.conn.account.as_ref().map_or("-", |a| a.name.as_str())
        );
        ctx.conn
            .history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .dump(ctx.conn.session, "client crash");
        save(ctx, ctx.conn.player);
        Err(PipelineError::CrashReported)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::testing::{codes, connect, negotiate, plain_stream, sent, server_with};
    use crate::context::Collaborators;
    use crate::handlers::{enter_world, frame_of};
    use crate::world::InMemoryPersistence;
    use shared::{ClientCode, ServerCode};
    use std::sync::Arc;

    #[test]
    fn test_quit_replies_saves_and_closes_gracefully() {
        let persistence = Arc::new(InMemoryPersistence::new());
        let server = server_with(Collaborators {
            persistence: Arc::clone(&persistence) as _,
            ..Collaborators::in_memory()
        });
        let (mut conn, mut channels) = connect(&server, 6200);
        let outbound = Arc::clone(&conn.outbound);
        negotiate(&server, &mut conn, 1125);
        enter_world(&server, &mut conn, "tristan");
        let player = conn.player.unwrap();
        sent(&outbound, &mut channels, &plain_stream());

        let mut ctx = HandlerContext {
            server: &server,
            conn: &mut conn,
        };
        let mut quit = Frame::new(ClientCode::QuitRequest.as_u8(), 0, None, bytes::Bytes::new());
        let err = QuitHandler.handle(&mut ctx, &mut quit).unwrap_err();
        assert!(matches!(err, PipelineError::Quit));
        assert!(err.is_graceful());
        assert_eq!(persistence.saved(), vec![player]);

        let frames = sent(&outbound, &mut channels, &plain_stream());
        assert_eq!(codes(&frames), vec![ServerCode::Quit.as_u8()]);
        assert_eq!(frames[0].payload()[0], 1);
    }

    #[test]
    fn test_crash_report_is_fatal_and_not_graceful() {
        let persistence = Arc::new(InMemoryPersistence::new());
        let server = server_with(Collaborators {
            persistence: Arc::clone(&persistence) as _,
            ..Collaborators::in_memory()
        });
        let (mut conn, _channels) = connect(&server, 6201);
        negotiate(&server, &mut conn, 168);
        enter_world(&server, &mut conn, "bedivere");

        let mut ctx = HandlerContext {
            server: &server,
            conn: &mut conn,
        };
        let report = CrashReport {
            dll_name: "game.dll".to_string(),
            uptime_secs: 95,
        };
        let err = CrashHandler.handle(&mut ctx, &mut frame_of(report.encode())).unwrap_err();
        assert!(matches!(err, PipelineError::CrashReported));
        assert!(!err.is_graceful());
        assert_eq!(persistence.saved().len(), 1);
    }

    #[test]
    fn test_crash_before_login_saves_nothing() {
        let persistence = Arc::new(InMemoryPersistence::new());
        let server = server_with(Collaborators {
            persistence: Arc::clone(&persistence) as _,
            ..Collaborators::in_memory()
        });
        let (mut conn, _channels) = connect(&server, 6202);
        let mut ctx = HandlerContext {
            server: &server,
            conn: &mut conn,
        };
        let report = CrashReport {
            dll_name: "video.dll".to_string(),
            uptime_secs: 1,
        };
        assert!(CrashHandler.handle(&mut ctx, &mut frame_of(report.encode())).is_err());
        assert!(persistence.saved().is_empty());
    }
}
