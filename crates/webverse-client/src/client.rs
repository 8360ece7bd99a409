//! Daemon client: handshake, heartbeats, typed requests and inbound commands.

use crate::tls;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{Connector, WebSocketStream};
use tracing::{debug, info, trace, warn};
use webverse_core::messages::{
    ConnectionPayload, FocusedTabRequestPayload, IdentificationResponsePayload, NewTabPayload,
    SettingsUpdatePayload, UrlPayload,
};
use webverse_core::{
    codec, ClientType, ConnectionId, Message, TabId, WebVerseError, WebVerseResult,
};

/// How a client introduces itself to the daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    pub client_type: ClientType,
    /// Owning main application. Not sent by main applications.
    pub window_id: Option<ConnectionId>,
    pub tab_id: Option<TabId>,
}

impl ClientIdentity {
    pub fn main_app() -> Self {
        Self {
            client_type: ClientType::MainApp,
            window_id: None,
            tab_id: None,
        }
    }

    /// A runtime, focused runtime or settings page owned by `window_id`.
    pub fn dependent(client_type: ClientType, window_id: ConnectionId, tab_id: Option<TabId>) -> Self {
        Self {
            client_type,
            window_id: Some(window_id),
            tab_id,
        }
    }
}

/// Connection options.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Time between heartbeats once identified.
    pub heartbeat_interval: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(5),
        }
    }
}

/// Build the IDENTIFICATION-RESP answering `message`, if it is an
/// IDENTIFICATION-REQ.
pub fn identification_reply(message: &Message, identity: &ClientIdentity) -> Option<Message> {
    let Message::IdentificationRequest(req) = message else {
        return None;
    };
    let window_id = if identity.client_type.is_main_app() {
        None
    } else {
        identity.window_id.clone()
    };
    Some(Message::IdentificationResponse(IdentificationResponsePayload {
        client_type: identity.client_type,
        connection_id: req.connection_id.clone(),
        window_id,
        tab_id: identity.tab_id.clone(),
    }))
}

/// A live connection to the daemon.
pub struct DaemonClient {
    outbound: mpsc::UnboundedSender<Message>,
    commands: mpsc::UnboundedReceiver<Message>,
    identified: watch::Receiver<Option<ConnectionId>>,
    task: JoinHandle<()>,
}

impl DaemonClient {
    /// Connect to the daemon at `url` (`wss://host:port`).
    pub async fn connect(
        url: &str,
        identity: ClientIdentity,
        config: ClientConfig,
    ) -> WebVerseResult<Self> {
        let connector = Connector::Rustls(tls::client_config()?);
        let (ws_stream, _response) =
            tokio_tungstenite::connect_async_tls_with_config(url, None, false, Some(connector))
                .await
                .map_err(|e| WebVerseError::Transport(format!("WebSocket connect error: {e}")))?;

        info!(url, client_type = %identity.client_type, "connected to daemon");
        Ok(Self::from_stream(ws_stream, identity, config))
    }

    /// Drive an already established WebSocket.
    pub fn from_stream<S>(
        ws_stream: WebSocketStream<S>,
        identity: ClientIdentity,
        config: ClientConfig,
    ) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (identified_tx, identified_rx) = watch::channel(None);

        let task = tokio::spawn(async move {
            if let Err(e) = run_connection(
                ws_stream,
                identity,
                config,
                outbound_rx,
                commands_tx,
                identified_tx,
            )
            .await
            {
                warn!(error = %e, "daemon connection ended with error");
            }
        });

        Self {
            outbound: outbound_tx,
            commands: commands_rx,
            identified: identified_rx,
            task,
        }
    }

    /// Connection ID assigned by the daemon, once identified.
    pub fn connection_id(&self) -> Option<ConnectionId> {
        self.identified.borrow().clone()
    }

    /// Wait until the identification handshake has completed.
    pub async fn wait_identified(&mut self) -> WebVerseResult<ConnectionId> {
        let id = self
            .identified
            .wait_for(Option::is_some)
            .await
            .map_err(|_| WebVerseError::Transport("connection closed before identification".into()))?;
        id.clone()
            .ok_or_else(|| WebVerseError::Transport("connection closed before identification".into()))
    }

    /// Next command the daemon delivered, or `None` once the connection closed.
    pub async fn next_command(&mut self) -> Option<Message> {
        self.commands.recv().await
    }

    pub fn request_new_tab(&self, tab_type: &str) -> WebVerseResult<()> {
        self.send_request(|connection_id| {
            Message::NewTabRequest(NewTabPayload {
                connection_id,
                tab_type: tab_type.to_string(),
            })
        })
    }

    pub fn request_focused_tab(&self, runtime_type: &str, url: &str) -> WebVerseResult<()> {
        self.send_request(|connection_id| {
            Message::FocusedTabRequest(FocusedTabRequestPayload {
                connection_id,
                runtime_type: runtime_type.to_string(),
                url: url.to_string(),
            })
        })
    }

    pub fn request_history_add(&self, url: &str) -> WebVerseResult<()> {
        self.send_request(|connection_id| {
            Message::HistoryAddRequest(UrlPayload {
                connection_id,
                url: url.to_string(),
            })
        })
    }

    /// Push storage limits from the settings page.
    pub fn request_settings_update(
        &self,
        storage_entries: u64,
        storage_key_length: u64,
        storage_entry_length: u64,
    ) -> WebVerseResult<()> {
        self.send_request(|connection_id| {
            Message::SettingsUpdateRequest(SettingsUpdatePayload {
                connection_id,
                storage_entries,
                storage_key_length,
                storage_entry_length,
            })
        })
    }

    pub fn request_close(&self) -> WebVerseResult<()> {
        self.send_request(|connection_id| Message::CloseRequest(ConnectionPayload { connection_id }))
    }

    pub fn request_load_world(&self, url: &str) -> WebVerseResult<()> {
        self.send_request(|connection_id| {
            Message::LoadWorldRequest(UrlPayload {
                connection_id,
                url: url.to_string(),
            })
        })
    }

    /// Close the connection and wait for the background task.
    pub async fn close(self) {
        drop(self.outbound);
        let _ = self.task.await;
    }

    fn send_request(&self, build: impl FnOnce(ConnectionId) -> Message) -> WebVerseResult<()> {
        let connection_id = self
            .connection_id()
            .ok_or_else(|| WebVerseError::InvalidMessage("not identified yet".into()))?;
        self.outbound
            .send(build(connection_id))
            .map_err(|_| WebVerseError::Transport("connection closed".into()))
    }
}

async fn run_connection<S>(
    ws_stream: WebSocketStream<S>,
    identity: ClientIdentity,
    config: ClientConfig,
    mut outbound: mpsc::UnboundedReceiver<Message>,
    commands: mpsc::UnboundedSender<Message>,
    identified: watch::Sender<Option<ConnectionId>>,
) -> WebVerseResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (mut sink, mut stream) = ws_stream.split();
    let mut heartbeat = tokio::time::interval(config.heartbeat_interval);

    loop {
        let reply = tokio::select! {
            out = outbound.recv() => match out {
                Some(message) => Some(message),
                None => {
                    let _ = sink.send(WsMessage::Close(None)).await;
                    break;
                }
            },
            _ = heartbeat.tick() => {
                let connection_id = identified.borrow().clone();
                connection_id.map(Message::heartbeat)
            }
            inbound = stream.next() => match inbound {
                Some(Ok(WsMessage::Text(text))) => match codec::decode(&text) {
                    Ok(message) => handle_inbound(message, &identity, &commands),
                    Err(e) => {
                        warn!(error = %e, "dropping malformed frame from daemon");
                        None
                    }
                },
                Some(Ok(WsMessage::Close(_))) | None => {
                    debug!("daemon closed the connection");
                    break;
                }
                Some(Ok(_)) => None,
                Some(Err(e)) => {
                    return Err(WebVerseError::Transport(format!("WS recv failed: {e}")));
                }
            },
        };

        if let Some(message) = reply {
            let text = codec::encode(&message)?;
            sink.send(WsMessage::text(text))
                .await
                .map_err(|e| WebVerseError::Transport(format!("WS send failed: {e}")))?;

            // Requests only go out once the daemon has our answer.
            if let Message::IdentificationResponse(p) = &message {
                info!(conn_id = %p.connection_id, client_type = %identity.client_type, "identified to daemon");
                identified.send_replace(Some(p.connection_id.clone()));
            }
        }
    }

    Ok(())
}

/// Process one message from the daemon, returning any reply to send.
fn handle_inbound(
    message: Message,
    identity: &ClientIdentity,
    commands: &mpsc::UnboundedSender<Message>,
) -> Option<Message> {
    if let Some(reply) = identification_reply(&message, identity) {
        return Some(reply);
    }

    if message.topic().ends_with("-CMD") {
        trace!(topic = message.topic(), "command received");
        let _ = commands.send(message);
    } else {
        debug!(topic = message.topic(), "ignoring message from daemon");
    }
    None
}
