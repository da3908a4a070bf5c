//! Process-wide directory of live connections
//!
//! Each accepted socket gets a [`Session`] entry holding:
//! - The session id written into every frame header
//! - Activity tracking for the idle-timeout checker
//! - The datagram address recorded at UDP init, used to route inbound
//!   datagrams to the owning connection
//! - Handles other connections need to reach this one: its send side, its
//!   bound encoder and the player it controls
//!
//! The directory never owns per-connection pipeline state. Connections keep
//! their codecs, accumulators and movement state to themselves and publish
//! only what observers need.

use crate::encoder::Encoder;
use crate::outbound::Outbound;
use crate::world::PlayerId;
use bytes::Bytes;
use log::info;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// Events delivered to a connection task from outside its socket
#[derive(Debug)]
pub enum ConnectionEvent {
    /// Raw datagram received from this connection's UDP peer
    Datagram(Bytes),
    /// The idle-timeout checker gave up on the connection
    TimedOut,
}

/// What other connections may use to talk to a connection
#[derive(Clone)]
pub struct ConnectionHandle {
    pub session: u16,
    pub outbound: Arc<Outbound>,
    pub encoder: Option<Arc<Encoder>>,
    pub player: Option<PlayerId>,
}

#[derive(Debug)]
pub struct Session {
    pub id: u16,
    pub addr: SocketAddr,
    pub last_seen: Instant,
    pub udp_addr: Option<SocketAddr>,
    pub player: Option<PlayerId>,
    timeout_reported: bool,
    outbound: Option<Arc<Outbound>>,
    encoder: Option<Arc<Encoder>>,
    inbox: Option<mpsc::UnboundedSender<ConnectionEvent>>,
}

impl Session {
    pub fn new(id: u16, addr: SocketAddr) -> Self {
        Self {
            id,
            addr,
            last_seen: Instant::now(),
            udp_addr: None,
            player: None,
            timeout_reported: false,
            outbound: None,
            encoder: None,
            inbox: None,
        }
    }

    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }

    fn handle(&self) -> Option<ConnectionHandle> {
        Some(ConnectionHandle {
            session: self.id,
            outbound: Arc::clone(self.outbound.as_ref()?),
            encoder: self.encoder.clone(),
            player: self.player,
        })
    }
}

pub struct SessionManager {
    sessions: HashMap<u16, Session>,
    /// Datagram peer address to session, kept in step with `Session::udp_addr`
    by_udp_addr: HashMap<SocketAddr, u16>,
    next_session_id: u16,
    max_clients: usize,
}

pub type Directory = Arc<RwLock<SessionManager>>;

/// Read access that survives a panicked writer
pub fn read(directory: &RwLock<SessionManager>) -> RwLockReadGuard<'_, SessionManager> {
    directory.read().unwrap_or_else(PoisonError::into_inner)
}

pub fn write(directory: &RwLock<SessionManager>) -> RwLockWriteGuard<'_, SessionManager> {
    directory.write().unwrap_or_else(PoisonError::into_inner)
}

impl SessionManager {
    pub fn new(max_clients: usize) -> Self {
        Self {
            sessions: HashMap::new(),
            by_udp_addr: HashMap::new(),
            next_session_id: 1,
            max_clients,
        }
    }

    /// Allocates a session id for a new connection
    ///
    /// Returns `None` when the server is full. Ids start at 1, skip ids still
    /// in use and wrap around before reaching `u16::MAX`.
    pub fn add_session(&mut self, addr: SocketAddr) -> Option<u16> {
        if self.sessions.len() >= self.max_clients {
            return None;
        }

        let mut id = self.next_session_id;
        while self.sessions.contains_key(&id) {
            id = Self::following(id);
        }
        self.next_session_id = Self::following(id);

        info!("Session {} connected from {}", id, addr);
        self.sessions.insert(id, Session::new(id, addr));
        Some(id)
    }

    fn following(id: u16) -> u16 {
        if id >= u16::MAX - 1 {
            1
        } else {
            id + 1
        }
    }

    /// Publishes the connection's send side and event inbox
    pub fn attach(
        &mut self,
        id: u16,
        outbound: Arc<Outbound>,
        inbox: mpsc::UnboundedSender<ConnectionEvent>,
    ) -> bool {
        match self.sessions.get_mut(&id) {
            Some(session) => {
                session.outbound = Some(outbound);
                session.inbox = Some(inbox);
                true
            }
            None => false,
        }
    }

    pub fn remove_session(&mut self, id: u16) -> bool {
        if let Some(session) = self.sessions.remove(&id) {
            if let Some(addr) = session.udp_addr {
                if self.by_udp_addr.get(&addr) == Some(&id) {
                    self.by_udp_addr.remove(&addr);
                }
            }
            info!("Session {} disconnected", session.id);
            true
        } else {
            false
        }
    }

    pub fn get(&self, id: u16) -> Option<&Session> {
        self.sessions.get(&id)
    }

    pub fn touch(&mut self, id: u16) {
        if let Some(session) = self.sessions.get_mut(&id) {
            session.last_seen = Instant::now();
        }
    }

    /// Sessions silent for longer than `timeout`
    ///
    /// Each session is reported once; removal happens when its connection
    /// task tears down.
    pub fn check_timeouts(&mut self, timeout: Duration) -> Vec<u16> {
        let mut timed_out: Vec<u16> = self
            .sessions
            .values_mut()
            .filter(|s| !s.timeout_reported && s.is_timed_out(timeout))
            .map(|s| {
                s.timeout_reported = true;
                s.id
            })
            .collect();
        timed_out.sort_unstable();
        timed_out
    }

    pub fn inbox(&self, id: u16) -> Option<mpsc::UnboundedSender<ConnectionEvent>> {
        self.sessions.get(&id)?.inbox.clone()
    }

    /// Routes datagrams from `addr` to session `id`
    ///
    /// A session rebinding drops its previous address. An address taken
    /// over from another session is unbound there.
    pub fn bind_udp(&mut self, id: u16, addr: SocketAddr) {
        let Some(session) = self.sessions.get_mut(&id) else {
            return;
        };
        if let Some(previous) = session.udp_addr.replace(addr) {
            self.by_udp_addr.remove(&previous);
        }
        if let Some(other) = self.by_udp_addr.insert(addr, id) {
            if other != id {
                if let Some(session) = self.sessions.get_mut(&other) {
                    session.udp_addr = None;
                }
            }
        }
    }

    pub fn find_by_udp_addr(&self, addr: SocketAddr) -> Option<u16> {
        self.by_udp_addr.get(&addr).copied()
    }

    pub fn bind_encoder(&mut self, id: u16, encoder: Arc<Encoder>) {
        if let Some(session) = self.sessions.get_mut(&id) {
            session.encoder = Some(encoder);
        }
    }

    pub fn bind_player(&mut self, id: u16, player: Option<PlayerId>) {
        if let Some(session) = self.sessions.get_mut(&id) {
            session.player = player;
        }
    }

    pub fn handle(&self, id: u16) -> Option<ConnectionHandle> {
        self.sessions.get(&id)?.handle()
    }

    pub fn handle_for_player(&self, player: PlayerId) -> Option<ConnectionHandle> {
        self.sessions
            .values()
            .find(|s| s.player == Some(player))
            .and_then(Session::handle)
    }

    pub fn session_ids(&self) -> Vec<u16> {
        let mut ids: Vec<u16> = self.sessions.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
