//! Shared server context and per-connection state seen by handlers

use crate::buffer_pool::BufferPool;
use crate::config::ServerConfig;
use crate::diagnostics::PacketHistory;
use crate::dispatch::DispatchMonitor;
use crate::encoder::{Encoder, EncoderChain};
use crate::error::PipelineError;
use crate::gate::PreconditionGate;
use crate::handlers;
use crate::movement::MovementState;
use crate::outbound::Outbound;
use crate::registry::HandlerRegistry;
use crate::session_manager::{Directory, SessionManager};
use crate::world::{
    Account, AccountStore, InMemoryAccounts, InMemoryPersistence, InMemoryWorld, Persistence,
    PlayerId, WorldState,
};
use log::info;
use shared::{ClientBuild, ConnectionState, FrameCodec, OutPacket, ProtocolFamily};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, RwLock};

/// External systems the core calls into
#[derive(Clone)]
pub struct Collaborators {
    pub world: Arc<dyn WorldState>,
    pub accounts: Arc<dyn AccountStore>,
    pub persistence: Arc<dyn Persistence>,
}

impl Collaborators {
    pub fn in_memory() -> Self {
        Self {
            world: Arc::new(InMemoryWorld::new()),
            accounts: Arc::new(InMemoryAccounts::new()),
            persistence: Arc::new(InMemoryPersistence::new()),
        }
    }
}

/// Process-wide state, read-only after start-up apart from the directory
pub struct ServerContext {
    pub config: ServerConfig,
    pub registry: HandlerRegistry,
    pub gate: PreconditionGate,
    pub encoders: EncoderChain,
    pub monitor: Arc<DispatchMonitor>,
    pub directory: Directory,
    pub world: Arc<dyn WorldState>,
    pub accounts: Arc<dyn AccountStore>,
    pub persistence: Arc<dyn Persistence>,
    pub pool: Arc<BufferPool>,
    /// Datagram address advertised to clients at UDP init
    pub udp_addr: SocketAddr,
}

impl ServerContext {
    pub fn new(config: ServerConfig, collaborators: Collaborators, udp_addr: SocketAddr) -> Self {
        let mut registry = HandlerRegistry::new();
        let mut gate = PreconditionGate::new();
        handlers::install(&mut registry, &mut gate);
        info!(
            "Registered {} handlers for v168 clients and {} for v172+",
            registry.len(ProtocolFamily::V168),
            registry.len(ProtocolFamily::V172)
        );

        Self {
            monitor: Arc::new(DispatchMonitor::new(
                config.worker_count(),
                config.slow_handler_threshold(),
            )),
            directory: Arc::new(RwLock::new(SessionManager::new(config.max_clients))),
            pool: Arc::new(BufferPool::new(config.batch_budget, config.buffer_pool_size)),
            registry,
            gate,
            encoders: EncoderChain::standard(),
            world: collaborators.world,
            accounts: collaborators.accounts,
            persistence: collaborators.persistence,
            config,
            udp_addr,
        }
    }
}

/// Everything one connection owns
///
/// Only the connection's own task touches this; other connections reach it
/// through its directory entry.
pub struct Connection {
    pub session: u16,
    pub addr: SocketAddr,
    pub state: ConnectionState,
    pub build: Option<ClientBuild>,
    pub family: ProtocolFamily,
    pub encoder: Option<Arc<Encoder>>,
    pub account: Option<Account>,
    pub player: Option<PlayerId>,
    pub movement: Option<MovementState>,
    pub outbound: Arc<Outbound>,
    pub stream_rx: FrameCodec,
    pub datagram_rx: FrameCodec,
    pub history: Arc<Mutex<PacketHistory>>,
}

impl Connection {
    pub fn new(
        session: u16,
        addr: SocketAddr,
        outbound: Arc<Outbound>,
        history: Arc<Mutex<PacketHistory>>,
        max_payload: usize,
    ) -> Self {
        Self {
            session,
            addr,
            state: ConnectionState::Connecting,
            build: None,
            family: ProtocolFamily::V168,
            encoder: None,
            account: None,
            player: None,
            movement: None,
            outbound,
            stream_rx: FrameCodec::stream(max_payload),
            datagram_rx: FrameCodec::datagram(max_payload),
            history,
        }
    }

    /// Moves the lifecycle forward, ignoring backwards transitions
    pub fn advance(&mut self, next: ConnectionState) -> bool {
        if self.state.can_advance_to(next) {
            self.state = next;
            true
        } else {
            false
        }
    }
}

/// What a handler gets to work with
pub struct HandlerContext<'a> {
    pub server: &'a ServerContext,
    pub conn: &'a mut Connection,
}

impl HandlerContext<'_> {
    /// Encoder bound at handshake; handling `code` before it is an error
    pub fn encoder(&self, code: u8) -> Result<Arc<Encoder>, PipelineError> {
        self.conn
            .encoder
            .clone()
            .ok_or(PipelineError::NotNegotiated(code))
    }

    pub fn build(&self) -> ClientBuild {
        self.conn.build.unwrap_or(ClientBuild(shared::MIN_BUILD))
    }

    pub fn send(&self, packet: &OutPacket) -> Result<(), PipelineError> {
        self.conn.outbound.send(packet)
    }

    pub fn send_all(&self, packets: &[OutPacket]) -> Result<(), PipelineError> {
        packets.iter().try_for_each(|p| self.send(p))
    }

    pub fn system_message(&self, encoder: &Encoder, text: &str) -> Result<(), PipelineError> {
        self.send(&encoder.system_message(self.conn.session, text))
    }
}
