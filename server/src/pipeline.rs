//! Per-connection packet pipeline
//!
//! One task per accepted socket owns the [`Connection`]: it accumulates
//! stream bytes, cuts them into frames, takes datagrams routed to it by the
//! network layer, and dispatches every frame through the registry and the
//! precondition gate. The two writer tasks it spawns drain the send queues.
//! When the loop ends, for whatever reason, [`teardown`] saves and removes
//! the player and releases the session.

use crate::context::{Connection, HandlerContext, ServerContext};
use crate::diagnostics::{Direction, PacketHistory};
use crate::error::PipelineError;
use crate::handlers::observers;
use crate::outbound::{self, Outbound, OutboundSettings};
use crate::session_manager::{self, ConnectionEvent};
use bytes::{Buf, Bytes, BytesMut};
use log::{debug, error, info, warn};
use shared::{DecodeOutcome, Frame};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::mpsc;

/// How long a graceful close waits for queued frames to go out
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Runs an accepted TCP connection to completion
pub async fn run_connection(server: Arc<ServerContext>, stream: TcpStream, addr: SocketAddr, udp: Arc<UdpSocket>) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!("Cannot disable Nagle for {}: {}", addr, e);
    }
    let (reader, writer) = stream.into_split();
    serve(server, addr, reader, writer, udp).await;
}

/// Runs the pipeline over any byte stream
pub async fn serve<R, W>(server: Arc<ServerContext>, addr: SocketAddr, reader: R, writer: W, udp: Arc<UdpSocket>)
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let Some(session) = session_manager::write(&server.directory).add_session(addr) else {
        warn!("Server full, refusing connection from {}", addr);
        return;
    };

    let history = Arc::new(Mutex::new(PacketHistory::new(server.config.diagnostics_capacity)));
    let (outbound, channels) = Outbound::new(
        session,
        OutboundSettings::from_config(&server.config),
        Arc::clone(&history),
        Arc::clone(&server.pool),
    );
    let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
    session_manager::write(&server.directory).attach(session, Arc::clone(&outbound), inbox_tx);

    let stream_writer = tokio::spawn(outbound::run_stream_writer(
        Arc::clone(&outbound),
        channels.stream,
        writer,
    ));
    let datagram_writer = tokio::spawn(outbound::run_datagram_writer(
        Arc::clone(&outbound),
        channels.datagram,
        udp,
    ));

    let mut conn = Connection::new(session, addr, outbound, history, server.config.max_inbound_payload);
    let result = receive(&server, &mut conn, reader, inbox_rx).await;
    teardown(&server, &mut conn, result).await;

    if let Err(e) = stream_writer.await {
        error!("Session {}: stream writer panicked: {}", session, e);
    }
    datagram_writer.abort();
}

async fn receive<R>(
    server: &ServerContext,
    conn: &mut Connection,
    mut reader: R,
    mut inbox: mpsc::UnboundedReceiver<ConnectionEvent>,
) -> Result<(), PipelineError>
where
    R: AsyncRead + Unpin,
{
    let mut accumulator = BytesMut::with_capacity(server.config.receive_buffer_size);
    let mut closed = conn.outbound.closed_signal();

    loop {
        if *closed.borrow_and_update() {
            return Err(PipelineError::Disconnected);
        }
        accumulator.reserve(server.config.receive_buffer_size);
        tokio::select! {
            read = reader.read_buf(&mut accumulator) => {
                if read? == 0 {
                    debug!("Session {}: peer closed the stream", conn.session);
                    return Ok(());
                }
                session_manager::write(&server.directory).touch(conn.session);
                drain_stream(server, conn, &mut accumulator).await?;
            }
            event = inbox.recv() => match event {
                Some(ConnectionEvent::Datagram(bytes)) => {
                    session_manager::write(&server.directory).touch(conn.session);
                    receive_datagram(server, conn, bytes).await?;
                }
                Some(ConnectionEvent::TimedOut) => {
                    info!("Session {}: idle timeout", conn.session);
                    return Ok(());
                }
                None => return Ok(()),
            },
            _ = closed.changed() => return Err(PipelineError::Disconnected),
        }
    }
}

/// Dispatches every complete frame at the front of the accumulator
async fn drain_stream(server: &ServerContext, conn: &mut Connection, accumulator: &mut BytesMut) -> Result<(), PipelineError> {
    loop {
        match conn.stream_rx.decode(accumulator) {
            Ok(DecodeOutcome::NeedMoreData) => return Ok(()),
            Ok(DecodeOutcome::Frame { frame, consumed }) => {
                accumulator.advance(consumed);
                dispatch(server, conn, frame).await?;
            }
            Err(e) => {
                lock_history(conn).dump(conn.session, &format!("framing error: {}", e));
                return Err(e.into());
            }
        }
    }
}

/// Datagrams carry a single frame; broken ones are dropped
async fn receive_datagram(server: &ServerContext, conn: &mut Connection, bytes: Bytes) -> Result<(), PipelineError> {
    match conn.datagram_rx.decode(&bytes) {
        Ok(DecodeOutcome::Frame { frame, .. }) => dispatch(server, conn, frame).await,
        Ok(DecodeOutcome::NeedMoreData) => {
            debug!("Session {}: truncated datagram of {} bytes", conn.session, bytes.len());
            Ok(())
        }
        Err(e) => {
            warn!("Session {}: dropping datagram: {}", conn.session, e);
            Ok(())
        }
    }
}

/// Resolves, authorizes and runs the handler for one frame
///
/// Unknown codes and frames the connection is not yet allowed to send are
/// skipped. Anything the handler returns as an error ends the connection.
async fn dispatch(server: &ServerContext, conn: &mut Connection, mut frame: Frame) -> Result<(), PipelineError> {
    let code = frame.code();
    lock_history(conn).record(Direction::Inbound, frame.transport(), code, frame.payload().clone());

    let Some(handler) = server.registry.resolve(conn.family, code) else {
        warn!(
            "Session {}: no handler for 0x{:02X} ({} bytes)",
            conn.session,
            code,
            frame.payload().len()
        );
        return Ok(());
    };
    if !server.gate.authorize(code, conn.state) {
        return Ok(());
    }

    let _permit = server.monitor.acquire().await?;
    let _activity = server.monitor.begin(conn.session, code, handler.name());
    let mut ctx = HandlerContext { server, conn };
    handler.handle(&mut ctx, &mut frame)
}

fn lock_history(conn: &Connection) -> std::sync::MutexGuard<'_, PacketHistory> {
    conn.history.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Releases everything the connection held
///
/// Graceful closes first wait for queued stream frames. The player, if any,
/// is saved, hidden from observers and removed from the world.
async fn teardown(server: &ServerContext, conn: &mut Connection, result: Result<(), PipelineError>) {
    let already_saved = matches!(result, Err(PipelineError::Quit) | Err(PipelineError::CrashReported));
    match &result {
        Ok(()) => info!("Session {}: connection closed", conn.session),
        Err(e) if e.is_graceful() => {
            info!("Session {}: closing: {}", conn.session, e);
            if !conn.outbound.drain(DRAIN_TIMEOUT).await {
                debug!("Session {}: queued frames not flushed before close", conn.session);
            }
        }
        Err(e) => warn!("Session {}: dropping connection: {}", conn.session, e),
    }

    conn.outbound.set_in_world(false);
    if let Some(player) = conn.player.take() {
        if let Some(snapshot) = server.world.player(player) {
            if !already_saved {
                server.persistence.save_player(&snapshot);
            }
            for (_, handle) in observers(server, player, &snapshot.position) {
                if let Some(encoder) = &handle.encoder {
                    if let Err(e) = handle.outbound.send(&encoder.object_delete(snapshot.object_id)) {
                        debug!("Session {}: cannot remove {}: {}", handle.session, snapshot.name, e);
                    }
                }
            }
        }
        server.world.leave_world(player);
    }
    conn.movement = None;

    session_manager::write(&server.directory).remove_session(conn.session);
    conn.outbound.close();
    conn.outbound.discard_pending();
}
