//! Per-connection send side
//!
//! [`Outbound`] turns [`OutPacket`]s into encrypted wire frames and feeds the
//! two [`TransportQueue`]s. The queues are drained by one writer task per
//! transport ([`run_stream_writer`], [`run_datagram_writer`]): the writer
//! transmits a batch, asks the queue for the next one and goes back to
//! waiting once the queue reports idle.
//!
//! Datagram sends degrade to the stream when the peer never completed UDP
//! init, or when an in-world peer stopped answering datagram pings for longer
//! than the liveness window. Forced datagram sends skip the liveness check.

use crate::buffer_pool::BufferPool;
use crate::config::{OversizePolicy, ServerConfig};
use crate::diagnostics::{Direction, PacketHistory};
use crate::error::PipelineError;
use crate::transport::TransportQueue;
use bytes::BytesMut;
use log::{debug, error, warn};
use shared::{CipherContext, FrameCodec, FrameHeader, OutPacket, Transport};
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch, Notify};

/// Send-side limits taken from the server configuration
#[derive(Debug, Clone)]
pub struct OutboundSettings {
    pub max_frame: usize,
    pub batch_budget: usize,
    pub oversize_policy: OversizePolicy,
    pub datagram_liveness: Duration,
}

impl OutboundSettings {
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            max_frame: config.max_outbound_frame,
            batch_budget: config.batch_budget,
            oversize_policy: config.oversize_policy,
            datagram_liveness: config.datagram_liveness(),
        }
    }
}

struct StreamSide {
    codec: FrameCodec,
    queue: TransportQueue,
}

struct DatagramSide {
    codec: FrameCodec,
    queue: TransportQueue,
    peer: Option<SocketAddr>,
    confirmed: bool,
    last_ping: Option<Instant>,
}

/// Receiving ends for the writer tasks
pub struct OutboundChannels {
    pub stream: mpsc::UnboundedReceiver<BytesMut>,
    pub datagram: mpsc::UnboundedReceiver<BytesMut>,
}

pub struct Outbound {
    session: u16,
    settings: OutboundSettings,
    stream: Mutex<StreamSide>,
    datagram: Mutex<DatagramSide>,
    sequence: AtomicU16,
    in_world: AtomicBool,
    stream_tx: mpsc::UnboundedSender<BytesMut>,
    datagram_tx: mpsc::UnboundedSender<BytesMut>,
    history: Arc<Mutex<PacketHistory>>,
    pool: Arc<BufferPool>,
    closed: watch::Sender<bool>,
    /// Signalled whenever the stream queue goes idle or the connection closes
    stream_idle: Notify,
}

impl std::fmt::Debug for Outbound {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Outbound")
            .field("session", &self.session)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Outbound {
    pub fn new(
        session: u16,
        settings: OutboundSettings,
        history: Arc<Mutex<PacketHistory>>,
        pool: Arc<BufferPool>,
    ) -> (Arc<Self>, OutboundChannels) {
        let (stream_tx, stream_rx) = mpsc::unbounded_channel();
        let (datagram_tx, datagram_rx) = mpsc::unbounded_channel();
        let (closed, _) = watch::channel(false);
        let max = u16::MAX as usize;

        let outbound = Arc::new(Self {
            session,
            stream: Mutex::new(StreamSide {
                codec: FrameCodec::stream(max),
                queue: TransportQueue::new(settings.batch_budget, true),
            }),
            datagram: Mutex::new(DatagramSide {
                codec: FrameCodec::datagram(max),
                queue: TransportQueue::new(settings.batch_budget, false),
                peer: None,
                confirmed: false,
                last_ping: None,
            }),
            settings,
            sequence: AtomicU16::new(0),
            in_world: AtomicBool::new(false),
            stream_tx,
            datagram_tx,
            history,
            pool,
            closed,
            stream_idle: Notify::new(),
        });

        (
            outbound,
            OutboundChannels {
                stream: stream_rx,
                datagram: datagram_rx,
            },
        )
    }

    pub fn session(&self) -> u16 {
        self.session
    }

    pub fn history(&self) -> &Arc<Mutex<PacketHistory>> {
        &self.history
    }

    /// Queues a packet on the stream transport
    pub fn send(&self, packet: &OutPacket) -> Result<(), PipelineError> {
        if self.is_closed() {
            return Err(PipelineError::Disconnected);
        }

        let mut side = lock(&self.stream);
        let header = FrameHeader {
            code: packet.code,
            session: self.session,
            sequence: None,
        };
        let bytes = side.codec.encode(header, &packet.payload)?;
        if bytes.len() > self.settings.max_frame {
            drop(side);
            return self.reject_oversize(packet.code, bytes.len());
        }

        self.record(Transport::Stream, packet);
        if let Some(batch) = side.queue.enqueue(bytes) {
            self.stream_tx
                .send(batch)
                .map_err(|_| PipelineError::Disconnected)?;
        }
        Ok(())
    }

    /// Queues a packet on the datagram transport, or on the stream when the
    /// datagram path cannot be used
    pub fn send_datagram(&self, packet: &OutPacket, forced: bool) -> Result<(), PipelineError> {
        if self.is_closed() {
            return Err(PipelineError::Disconnected);
        }

        let mut side = lock(&self.datagram);
        if self.in_world.load(Ordering::Relaxed) && side.confirmed {
            let stale = side
                .last_ping
                .map_or(true, |at| at.elapsed() > self.settings.datagram_liveness);
            if stale {
                debug!("Session {} datagram path went stale", self.session);
                side.confirmed = false;
            }
        }

        if side.peer.is_none() || (!forced && !side.confirmed) {
            drop(side);
            return self.send(packet);
        }

        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let header = FrameHeader {
            code: packet.code,
            session: self.session,
            sequence: Some(sequence),
        };
        let bytes = side.codec.encode(header, &packet.payload)?;
        if bytes.len() > self.settings.max_frame {
            drop(side);
            return self.reject_oversize(packet.code, bytes.len());
        }

        self.record(Transport::Datagram, packet);
        if let Some(batch) = side.queue.enqueue(bytes) {
            self.datagram_tx
                .send(batch)
                .map_err(|_| PipelineError::Disconnected)?;
        }
        Ok(())
    }

    fn record(&self, transport: Transport, packet: &OutPacket) {
        lock(&self.history).record(
            Direction::Outbound,
            transport,
            packet.code,
            packet.payload.clone(),
        );
    }

    fn reject_oversize(&self, code: u8, len: usize) -> Result<(), PipelineError> {
        match self.settings.oversize_policy {
            OversizePolicy::Drop => {
                error!(
                    "Session {}: dropping outbound frame 0x{:02X} of {} bytes (limit {})",
                    self.session, code, len, self.settings.max_frame
                );
                Ok(())
            }
            OversizePolicy::Disconnect => {
                error!(
                    "Session {}: outbound frame 0x{:02X} of {} bytes exceeds limit {}, disconnecting",
                    self.session, code, len, self.settings.max_frame
                );
                self.close();
                Err(PipelineError::OversizeOutbound { code, len })
            }
        }
    }

    /// Switches both send directions to the negotiated keys
    ///
    /// Frames already queued keep the encryption they were encoded with.
    pub fn set_ciphers(&self, stream: CipherContext, datagram: CipherContext) {
        lock(&self.stream).codec.set_cipher(stream);
        lock(&self.datagram).codec.set_cipher(datagram);
    }

    pub fn set_datagram_peer(&self, peer: SocketAddr) {
        lock(&self.datagram).peer = Some(peer);
    }

    pub fn datagram_peer(&self) -> Option<SocketAddr> {
        lock(&self.datagram).peer
    }

    /// Marks the datagram path alive after a datagram ping
    pub fn confirm_datagram(&self) {
        let mut side = lock(&self.datagram);
        side.confirmed = true;
        side.last_ping = Some(Instant::now());
    }

    pub fn is_datagram_confirmed(&self) -> bool {
        lock(&self.datagram).confirmed
    }

    pub fn set_in_world(&self, in_world: bool) {
        self.in_world.store(in_world, Ordering::Relaxed);
    }

    /// Next datagram sequence number that will be written
    pub fn next_sequence(&self) -> u16 {
        self.sequence.load(Ordering::Relaxed)
    }

    pub fn complete_stream(&self) -> Option<BytesMut> {
        let next = lock(&self.stream).queue.complete(&self.pool);
        if next.is_none() {
            self.stream_idle.notify_waiters();
        }
        next
    }

    pub fn complete_datagram(&self) -> Option<BytesMut> {
        lock(&self.datagram).queue.complete(&self.pool)
    }

    pub fn is_stream_idle(&self) -> bool {
        lock(&self.stream).queue.is_idle()
    }

    /// Waits until every queued stream frame has been written
    ///
    /// Returns `false` when the timeout expires or the connection closes
    /// first.
    pub async fn drain(&self, timeout: Duration) -> bool {
        let wait = async {
            loop {
                let idle = self.stream_idle.notified();
                tokio::pin!(idle);
                idle.as_mut().enable();
                if self.is_stream_idle() {
                    return true;
                }
                if self.is_closed() {
                    return false;
                }
                idle.await;
            }
        };
        tokio::time::timeout(timeout, wait).await.unwrap_or(false)
    }

    pub fn close(&self) {
        self.closed.send_replace(true);
        self.stream_idle.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    pub fn closed_signal(&self) -> watch::Receiver<bool> {
        self.closed.subscribe()
    }

    pub fn release(&self, buf: BytesMut) {
        self.pool.release(buf);
    }

    /// Returns every still-queued buffer to the pool
    pub fn discard_pending(&self) {
        while let Some(buf) = self.complete_stream() {
            self.pool.release(buf);
        }
        while let Some(buf) = self.complete_datagram() {
            self.pool.release(buf);
        }
    }
}

/// Writes stream batches until the connection closes
pub async fn run_stream_writer<W>(
    outbound: Arc<Outbound>,
    mut rx: mpsc::UnboundedReceiver<BytesMut>,
    mut writer: W,
) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut closed = outbound.closed_signal();
    let result = loop {
        // A receiver subscribed after close() sees `true` as already seen
        if *closed.borrow_and_update() {
            break Ok(());
        }
        tokio::select! {
            batch = rx.recv() => {
                let Some(mut batch) = batch else { break Ok(()) };
                loop {
                    if let Err(e) = writer.write_all(&batch).await {
                        warn!("Session {} stream write failed: {}", outbound.session(), e);
                        outbound.close();
                        break;
                    }
                    outbound.release(batch);
                    match outbound.complete_stream() {
                        Some(next) => batch = next,
                        None => break,
                    }
                }
                if outbound.is_closed() {
                    break Ok(());
                }
            }
            _ = closed.changed() => break Ok(()),
        }
    };
    let _ = writer.shutdown().await;
    result
}

/// Sends datagram frames to the peer recorded at UDP init
pub async fn run_datagram_writer(
    outbound: Arc<Outbound>,
    mut rx: mpsc::UnboundedReceiver<BytesMut>,
    socket: Arc<UdpSocket>,
) {
    let mut closed = outbound.closed_signal();
    loop {
        if *closed.borrow_and_update() {
            break;
        }
        tokio::select! {
            frame = rx.recv() => {
                let Some(mut frame) = frame else { break };
                loop {
                    if let Some(peer) = outbound.datagram_peer() {
                        if let Err(e) = socket.send_to(&frame, peer).await {
                            warn!("Session {} datagram to {} failed: {}", outbound.session(), peer, e);
                        }
                    }
                    outbound.release(frame);
                    match outbound.complete_datagram() {
                        Some(next) => frame = next,
                        None => break,
                    }
                }
            }
            _ = closed.changed() => break,
        }
    }
}
