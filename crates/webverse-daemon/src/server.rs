//! Daemon server: accepts secure WebSocket connections and drives the broker.
//!
//! One worker task owns the [`Broker`] and serializes every state change:
//! connection events, inbound frames and heartbeat ticks all arrive through
//! its `select!` loop. Each connection runs its own task that pumps frames
//! between the socket and the worker.

use crate::broker::{Broker, BrokerEvent};
use crate::config::HeartbeatSettings;
use crate::transport::{self, recv_text, WebSocketConnection};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info};
use webverse_core::{codec, ConnectionId, Message, WebVerseError, WebVerseResult};

/// The WebVerse daemon instance.
pub struct DaemonServer {
    heartbeat: HeartbeatSettings,
}

impl DaemonServer {
    pub fn new(heartbeat: HeartbeatSettings) -> Self {
        Self { heartbeat }
    }

    /// Serve connections on `listener` until the future is dropped.
    pub async fn run(
        self,
        listener: TcpListener,
        tls_config: Arc<rustls::ServerConfig>,
    ) -> WebVerseResult<()> {
        let local_addr = listener.local_addr()?;
        let mut conn_rx = transport::start_listener(listener, tls_config);
        let (event_tx, mut event_rx) = mpsc::unbounded_channel::<BrokerEvent>();

        let mut broker = Broker::new(self.heartbeat);
        let mut ticker = tokio::time::interval(Duration::from_secs(self.heartbeat.interval_secs));
        // The first tick completes immediately.
        ticker.tick().await;

        info!(
            addr = %local_addr,
            interval_secs = self.heartbeat.interval_secs,
            timeout = self.heartbeat.timeout,
            "webverse-daemon ready"
        );

        loop {
            tokio::select! {
                Some(conn) = conn_rx.recv() => {
                    spawn_connection(conn, event_tx.clone());
                }
                Some(event) = event_rx.recv() => {
                    broker.handle_event(event);
                }
                _ = ticker.tick() => {
                    let evicted = broker.on_tick();
                    if !evicted.is_empty() {
                        debug!(
                            evicted = evicted.len(),
                            clients = broker.directory().len(),
                            tracked = broker.heartbeats().len(),
                            connections = broker.connection_count(),
                            "heartbeat sweep"
                        );
                    }
                }
            }
        }
    }
}

/// Assign a connection ID, announce it to the broker and start pumping frames.
fn spawn_connection(conn: WebSocketConnection, events: mpsc::UnboundedSender<BrokerEvent>) {
    let connection_id = ConnectionId::generate();
    let (out_tx, out_rx) = mpsc::unbounded_channel();

    if events
        .send(BrokerEvent::Connected {
            connection_id: connection_id.clone(),
            remote_addr: conn.remote_addr,
            handle: out_tx,
        })
        .is_err()
    {
        return;
    }

    tokio::spawn(serve_connection(conn.ws_stream, connection_id, out_rx, events));
}

/// Run one connection until either side closes, then report the disconnect.
async fn serve_connection<S>(
    ws_stream: WebSocketStream<S>,
    connection_id: ConnectionId,
    outbound: mpsc::UnboundedReceiver<Message>,
    events: mpsc::UnboundedSender<BrokerEvent>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if let Err(e) = pump(ws_stream, &connection_id, outbound, &events).await {
        debug!(conn_id = %connection_id, error = %e, "connection ended with error");
    }
    let _ = events.send(BrokerEvent::Disconnected { connection_id });
}

async fn pump<S>(
    ws_stream: WebSocketStream<S>,
    connection_id: &ConnectionId,
    mut outbound: mpsc::UnboundedReceiver<Message>,
    events: &mpsc::UnboundedSender<BrokerEvent>,
) -> WebVerseResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (mut sink, mut stream) = ws_stream.split();

    loop {
        tokio::select! {
            out = outbound.recv() => match out {
                Some(message) => {
                    let text = codec::encode(&message)?;
                    sink.send(WsMessage::text(text))
                        .await
                        .map_err(|e| WebVerseError::Transport(format!("WS send failed: {e}")))?;
                }
                None => {
                    // Broker dropped the handle: the client was removed.
                    debug!(conn_id = %connection_id, "closing removed connection");
                    let _ = sink.send(WsMessage::Close(None)).await;
                    break;
                }
            },
            inbound = recv_text(&mut stream) => match inbound? {
                Some(text) => {
                    let event = BrokerEvent::Frame {
                        connection_id: connection_id.clone(),
                        text,
                    };
                    if events.send(event).is_err() {
                        break;
                    }
                }
                None => break,
            },
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::certificate;
    use tokio_tungstenite::tungstenite::protocol::Role;
    use webverse_client::{ClientConfig, ClientIdentity, DaemonClient, TabId};
    use webverse_core::messages::FocusedTabCommandPayload;
    use webverse_core::ClientType;

    async fn socket_pair() -> (WebSocketStream<tokio::io::DuplexStream>, WebSocketStream<tokio::io::DuplexStream>) {
        let (a, b) = tokio::io::duplex(16 * 1024);
        let server = WebSocketStream::from_raw_socket(a, Role::Server, None).await;
        let client = WebSocketStream::from_raw_socket(b, Role::Client, None).await;
        (server, client)
    }

    #[tokio::test]
    async fn pumps_frames_both_ways() {
        let (server_ws, mut client_ws) = socket_pair().await;
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let id = ConnectionId::from("c1");
        let task = tokio::spawn(serve_connection(server_ws, id.clone(), out_rx, events_tx));

        out_tx.send(Message::identification_request(id.clone())).unwrap();
        let frame = client_ws.next().await.unwrap().unwrap();
        assert_eq!(
            codec::decode(frame.to_text().unwrap()).unwrap(),
            Message::identification_request(id.clone())
        );

        client_ws
            .send(WsMessage::text(r#"{"topic":"HEARTBEAT","connectionID":"c1"}"#))
            .await
            .unwrap();
        match events_rx.recv().await.unwrap() {
            BrokerEvent::Frame { connection_id, text } => {
                assert_eq!(connection_id, id);
                assert!(text.contains("HEARTBEAT"));
            }
            other => panic!("unexpected event: {other:?}"),
        }

        drop(client_ws);
        task.await.unwrap();
        match events_rx.recv().await.unwrap() {
            BrokerEvent::Disconnected { connection_id } => assert_eq!(connection_id, id),
            other => panic!("unexpected event: {other:?}"),
        }
        drop(out_tx);
    }

    #[tokio::test]
    async fn dropping_handle_closes_connection() {
        let (server_ws, mut client_ws) = socket_pair().await;
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel::<Message>();
        let task = tokio::spawn(serve_connection(server_ws, "c2".into(), out_rx, events_tx));

        drop(out_tx);
        task.await.unwrap();

        assert!(matches!(
            client_ws.next().await,
            Some(Ok(WsMessage::Close(_))) | None
        ));
        assert!(matches!(
            events_rx.recv().await,
            Some(BrokerEvent::Disconnected { .. })
        ));
    }

    #[tokio::test]
    async fn routes_focused_tab_request_over_tls() {
        let bundle = certificate::generate("localhost").unwrap();
        let tls_config = certificate::server_config(&bundle).unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("wss://127.0.0.1:{}", listener.local_addr().unwrap().port());
        let daemon = tokio::spawn(
            DaemonServer::new(HeartbeatSettings::default()).run(listener, tls_config),
        );

        let mut main = DaemonClient::connect(&url, ClientIdentity::main_app(), ClientConfig::default())
            .await
            .unwrap();
        let main_id = main.wait_identified().await.unwrap();

        let identity = ClientIdentity::dependent(
            ClientType::FocusedRuntime,
            main_id.clone(),
            Some(TabId::from(10)),
        );
        let mut tab = DaemonClient::connect(&url, identity, ClientConfig::default())
            .await
            .unwrap();
        tab.wait_identified().await.unwrap();

        // The broker may still be queueing the tab's identification.
        let mut delivered = None;
        for _ in 0..20 {
            tab.request_focused_tab("steamvr", "https://x").unwrap();
            let next = tokio::time::timeout(Duration::from_millis(250), main.next_command()).await;
            if let Ok(command) = next {
                delivered = command;
                break;
            }
        }

        assert_eq!(
            delivered,
            Some(Message::FocusedTabCommand(FocusedTabCommandPayload {
                connection_id: main_id,
                runtime_type: "steamvr".into(),
                url: "https://x".into(),
            }))
        );

        tab.close().await;
        main.close().await;
        daemon.abort();
    }
}
