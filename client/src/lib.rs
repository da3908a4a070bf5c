//! # Headless Protocol Client
//!
//! A scriptable client that speaks the server's wire protocol without any
//! game logic on top. It drives the same sequence a real game client goes
//! through and is used by the integration tests and for smoke testing a
//! running server.
//!
//! ## Session Walkthrough
//!
//! 1. `connect` opens the stream transport
//! 2. `handshake` announces the build, installs both cipher keys and reads
//!    the session id
//! 3. `login` and `enter_world` authenticate and load the character
//! 4. `init_udp` and `udp_ping` open and confirm the datagram path
//! 5. `send_position`, `ping` and `quit` exercise the in-world traffic
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::Client;
//! use shared::ClientBuild;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut client = Client::connect("127.0.0.1:10300".parse()?, ClientBuild(1125)).await?;
//!     client.handshake(0).await?;
//!     client.login("arthur", "excalibur").await?;
//!     client.enter_world().await?;
//!     client.quit().await?;
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod network;

pub use error::ClientError;
pub use network::{parse_crypt_key, Client};
