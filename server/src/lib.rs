//! # Game Server Network Core
//!
//! This library accepts persistent client connections, speaks the framed,
//! checksummed and encrypted wire protocol over a reliable stream and a
//! best-effort datagram transport, and routes every decoded message to its
//! handler. Outgoing state is rendered by the encoder matching each client's
//! build.
//!
//! ## Data Flow
//!
//! Bytes arrive on a connection's socket and are accumulated until a whole
//! frame is present. The frame codec decrypts and verifies it, the handler
//! registry picks the handler for the connection's protocol family, the
//! precondition gate checks the connection state, and the handler runs.
//! Movement frames go through the movement validator. Replies and broadcasts
//! are rendered by the bound encoder and queued on the transport queues.
//!
//! ## Module Organization
//!
//! ### Wire Side
//! - `transport`: per-transport send queue with single-in-flight coalescing
//! - `outbound`: frame encoding, datagram fallback and the writer tasks
//! - `buffer_pool`: reusable send buffers
//! - `diagnostics`: ring of recent frames dumped on protocol errors
//!
//! ### Dispatch
//! - `registry`: handler lookup per protocol family and opcode
//! - `gate`: connection-state preconditions per opcode
//! - `dispatch`: bounded dispatch concurrency and the slow-handler watchdog
//! - `pipeline`: the per-connection receive loop and teardown
//! - `handlers`: the message handlers themselves
//!
//! ### Game Side
//! - `encoder`: one flat operation table per protocol version
//! - `movement`: per-player kinematic state and anti-cheat rules
//! - `world`: traits for the world, account and persistence collaborators
//!
//! ### Plumbing
//! - `config`: TOML configuration with defaults
//! - `context`: server-wide context and per-connection state
//! - `session_manager`: directory of live connections
//! - `network`: listeners, datagram routing and housekeeping tasks
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::context::Collaborators;
//! use server::network::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = Server::bind(ServerConfig::default(), Collaborators::in_memory()).await?;
//!     server.run().await
//! }
//! ```

pub mod buffer_pool;
pub mod config;
pub mod context;
pub mod diagnostics;
pub mod dispatch;
pub mod encoder;
pub mod error;
pub mod gate;
pub mod handlers;
pub mod movement;
pub mod network;
pub mod outbound;
pub mod pipeline;
pub mod registry;
pub mod session_manager;
pub mod transport;
pub mod world;
