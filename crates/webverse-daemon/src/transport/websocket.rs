//! Secure WebSocket listener using tokio-rustls and tokio-tungstenite.
//!
//! Accepted TCP streams go through the TLS handshake and the WebSocket
//! upgrade on their own task; only fully upgraded connections reach the
//! receiver returned by [`start_listener`].

use futures_util::{Stream, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_rustls::server::TlsStream;
use tokio_rustls::TlsAcceptor;
use tokio_tungstenite::tungstenite::{self, Message as WsMessage};
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, error, trace, warn};
use webverse_core::{WebVerseError, WebVerseResult};

/// A WebSocket stream running over TLS.
pub type SecureWebSocket = WebSocketStream<TlsStream<TcpStream>>;

/// A handle to an accepted, upgraded WebSocket connection.
pub struct WebSocketConnection {
    pub ws_stream: SecureWebSocket,
    pub remote_addr: SocketAddr,
}

/// Maximum text frame accepted from a peer (1 MiB).
pub const MAX_WS_FRAME_SIZE: usize = 1_048_576;

/// Start accepting connections on an already-bound listener.
///
/// Returns a receiver that yields upgraded connections.
pub fn start_listener(
    tcp_listener: TcpListener,
    tls_config: Arc<rustls::ServerConfig>,
) -> mpsc::Receiver<WebSocketConnection> {
    let acceptor = TlsAcceptor::from(tls_config);
    let (tx, rx) = mpsc::channel::<WebSocketConnection>(64);

    tokio::spawn(async move {
        loop {
            match tcp_listener.accept().await {
                Ok((stream, addr)) => {
                    let tx = tx.clone();
                    let acceptor = acceptor.clone();
                    tokio::spawn(async move {
                        let tls_stream = match acceptor.accept(stream).await {
                            Ok(s) => s,
                            Err(e) => {
                                warn!(remote = %addr, error = %e, "TLS handshake failed");
                                return;
                            }
                        };
                        match tokio_tungstenite::accept_async(tls_stream).await {
                            Ok(ws_stream) => {
                                debug!(remote = %addr, "WebSocket connection accepted");
                                let conn = WebSocketConnection {
                                    ws_stream,
                                    remote_addr: addr,
                                };
                                if tx.send(conn).await.is_err() {
                                    warn!("WebSocket connection channel closed");
                                }
                            }
                            Err(e) => {
                                warn!(remote = %addr, error = %e, "WebSocket handshake failed");
                            }
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "TCP accept failed");
                }
            }
        }
    });

    rx
}

/// Receive the next text frame from a WebSocket read half.
///
/// Returns `None` when the peer closes. Binary frames holding UTF-8 are read
/// as text; other binary frames are dropped with a warning and control frames
/// are skipped. Frames above [`MAX_WS_FRAME_SIZE`] are dropped with a warning.
pub async fn recv_text<S>(stream: &mut S) -> WebVerseResult<Option<String>>
where
    S: Stream<Item = Result<WsMessage, tungstenite::Error>> + Unpin,
{
    loop {
        match stream.next().await {
            Some(Ok(WsMessage::Text(text))) => {
                if within_limit(text.len()) {
                    return Ok(Some(text.to_string()));
                }
            }
            Some(Ok(WsMessage::Binary(data))) => {
                if !within_limit(data.len()) {
                    continue;
                }
                match String::from_utf8(data) {
                    Ok(text) => return Ok(Some(text)),
                    Err(e) => {
                        warn!(size = e.as_bytes().len(), "dropping binary frame that is not UTF-8");
                    }
                }
            }
            Some(Ok(WsMessage::Close(_))) => return Ok(None),
            Some(Ok(other)) => {
                trace!(kind = ?frame_kind(&other), "ignoring control frame");
            }
            Some(Err(e)) => {
                return Err(WebVerseError::Transport(format!("WS recv failed: {e}")));
            }
            None => return Ok(None),
        }
    }
}

fn within_limit(size: usize) -> bool {
    if size > MAX_WS_FRAME_SIZE {
        warn!(size, max = MAX_WS_FRAME_SIZE, "dropping oversized frame");
        return false;
    }
    true
}

fn frame_kind(msg: &WsMessage) -> &'static str {
    match msg {
        WsMessage::Text(_) => "text",
        WsMessage::Binary(_) => "binary",
        WsMessage::Ping(_) => "ping",
        WsMessage::Pong(_) => "pong",
        WsMessage::Close(_) => "close",
        WsMessage::Frame(_) => "frame",
    }
}
