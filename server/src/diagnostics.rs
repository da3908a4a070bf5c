//! Bounded history of recently sent and received frames
//!
//! Kept per connection and dumped to the log when the connection dies on a
//! framing error or when the client reports a crash.

use bytes::Bytes;
use log::error;
use shared::Transport;
use std::collections::VecDeque;
use std::fmt::Write;
use std::time::Instant;

/// Bytes of payload shown per record in a dump
const DUMP_PREVIEW: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

#[derive(Debug, Clone)]
pub struct FrameRecord {
    pub direction: Direction,
    pub transport: Transport,
    pub code: u8,
    pub payload: Bytes,
    pub at: Instant,
}

#[derive(Debug)]
pub struct PacketHistory {
    records: VecDeque<FrameRecord>,
    capacity: usize,
}

impl PacketHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn record(&mut self, direction: Direction, transport: Transport, code: u8, payload: Bytes) {
        if self.capacity == 0 {
            return;
        }
        if self.records.len() == self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(FrameRecord {
            direction,
            transport,
            code,
            payload,
            at: Instant::now(),
        });
    }

    /// Oldest first
    pub fn records(&self) -> impl Iterator<Item = &FrameRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Renders the history as one line per frame, oldest first
    pub fn render(&self) -> Vec<String> {
        let now = Instant::now();
        self.records
            .iter()
            .map(|r| {
                let mut line = format!(
                    "{:>6}ms ago {} {:?} 0x{:02X} len={} ",
                    now.duration_since(r.at).as_millis(),
                    match r.direction {
                        Direction::Inbound => "<-",
                        Direction::Outbound => "->",
                    },
                    r.transport,
                    r.code,
                    r.payload.len()
                );
                for byte in r.payload.iter().take(DUMP_PREVIEW) {
                    let _ = write!(line, "{:02X}", byte);
                }
                if r.payload.len() > DUMP_PREVIEW {
                    line.push_str("..");
                }
                line
            })
            .collect()
    }

    pub fn dump(&self, session: u16, reason: &str) {
        error!(
            "Session {}: {} - last {} frames follow",
            session,
            reason,
            self.records.len()
        );
        for line in self.render() {
            error!("Session {}: {}", session, line);
        }
    }
}
