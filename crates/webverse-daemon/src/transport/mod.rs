//! Network transport: TLS WebSocket listener and frame helpers.

pub mod websocket;

pub use websocket::{recv_text, start_listener, WebSocketConnection};
