//! webverse-client: Rust client library for the WebVerse daemon.
//!
//! Finds a running daemon through its discovery files, connects over
//! secure WebSocket, answers the identification handshake, keeps the
//! connection alive with heartbeats, and offers typed request senders.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::path::Path;
//! use webverse_client::{ClientConfig, ClientIdentity, DaemonClient, DaemonInfo};
//!
//! # async fn example() -> webverse_core::WebVerseResult<()> {
//! let info = DaemonInfo::discover(Path::new("."))?;
//! let mut app = DaemonClient::connect(&info.url(), ClientIdentity::main_app(), ClientConfig::default()).await?;
//! app.wait_identified().await?;
//!
//! while let Some(command) = app.next_command().await {
//!     println!("{}", command.topic());
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod discovery;
pub mod tls;

pub use client::{identification_reply, ClientConfig, ClientIdentity, DaemonClient};
pub use discovery::DaemonInfo;

// Re-export core types for convenience.
pub use webverse_core::{ClientType, ConnectionId, Message, TabId, WebVerseError, WebVerseResult};
