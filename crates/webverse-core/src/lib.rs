//! webverse-core: Shared protocol library for the WebVerse daemon.
//!
//! Provides the JSON message types exchanged between the daemon and its
//! clients, the text codec, client role definitions, and the names of the
//! discovery files the daemon leaves behind for peers.

pub mod codec;
pub mod discovery;
pub mod error;
pub mod messages;

// Re-export commonly used items at crate root.
pub use codec::{decode, encode};
pub use error::{WebVerseError, WebVerseResult};
pub use messages::{ClientType, ConnectionId, Message, RequestKind, TabId};
