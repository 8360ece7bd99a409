//! Connection broker: session directory, heartbeat accounting, request routing.
//!
//! The [`Broker`] owns every piece of connection state. It is driven by a
//! single worker feeding it [`BrokerEvent`]s and heartbeat ticks, so none of
//! its state needs locking.
//!
//! Connections that never identify age on the same ticks as heartbeats and
//! are closed once they pass the heartbeat timeout.

pub mod directory;
pub mod heartbeat;
pub mod router;

pub use directory::{AddOutcome, SessionDirectory};
pub use heartbeat::HeartbeatMonitor;
pub use router::DropReason;

use crate::config::HeartbeatSettings;
use crate::handshake;
use std::collections::HashMap;
use std::net::SocketAddr;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use webverse_core::{codec, ClientType, ConnectionId, Message, TabId};

/// Outbound queue of one connection. Dropping it closes the connection.
pub type TransportHandle = mpsc::UnboundedSender<Message>;

/// Events the connection tasks feed into the broker worker.
#[derive(Debug)]
pub enum BrokerEvent {
    Connected {
        connection_id: ConnectionId,
        remote_addr: SocketAddr,
        handle: TransportHandle,
    },
    Frame {
        connection_id: ConnectionId,
        text: String,
    },
    Disconnected {
        connection_id: ConnectionId,
    },
}

/// What the broker did with one inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// Unparseable, missing `topic`, unknown topic, or missing field.
    Malformed,
    /// Identification processed with the given directory outcome.
    Identified(AddOutcome),
    HeartbeatReset,
    /// A command was queued on the main application's transport.
    Delivered { main_app: ConnectionId },
    /// Valid request with no downstream action (load world).
    Accepted,
    Dropped(DropReason),
    /// A well-formed message the daemon does not consume.
    Unhandled,
}

/// Owner of all connection and registry state.
#[derive(Debug)]
pub struct Broker {
    directory: SessionDirectory,
    heartbeats: HeartbeatMonitor,
    /// Handshake age of connections that have not identified yet.
    pending: HeartbeatMonitor,
    transports: HashMap<ConnectionId, TransportHandle>,
}

impl Broker {
    pub fn new(settings: HeartbeatSettings) -> Self {
        Self {
            directory: SessionDirectory::new(),
            heartbeats: HeartbeatMonitor::new(settings),
            pending: HeartbeatMonitor::new(settings),
            transports: HashMap::new(),
        }
    }

    /// Apply one event from a connection task.
    pub fn handle_event(&mut self, event: BrokerEvent) {
        match event {
            BrokerEvent::Connected {
                connection_id,
                remote_addr,
                handle,
            } => {
                info!(conn_id = %connection_id, remote = %remote_addr, "client connected, exchanging handshake");
                self.on_connected(connection_id, handle);
            }
            BrokerEvent::Frame {
                connection_id,
                text,
            } => {
                let outcome = self.on_frame(&connection_id, &text);
                debug!(conn_id = %connection_id, ?outcome, "frame handled");
            }
            BrokerEvent::Disconnected { connection_id } => {
                self.on_disconnected(&connection_id);
            }
        }
    }

    /// Register a new transport and send it IDENTIFICATION-REQ.
    ///
    /// The connection stays pending until its identification response
    /// arrives, or is closed by [`Broker::on_tick`] if none does in time.
    pub fn on_connected(&mut self, connection_id: ConnectionId, handle: TransportHandle) {
        if handle
            .send(handshake::identification_request(&connection_id))
            .is_err()
        {
            warn!(conn_id = %connection_id, "connection closed before handshake");
            return;
        }
        self.pending.track(connection_id.clone());
        self.transports.insert(connection_id, handle);
    }

    /// Decode and dispatch one text frame received on `origin`.
    pub fn on_frame(&mut self, origin: &ConnectionId, text: &str) -> Dispatch {
        match codec::decode(text) {
            Ok(message) => self.on_message(origin, message),
            Err(e) => {
                warn!(conn_id = %origin, error = %e, "dropping malformed frame");
                Dispatch::Malformed
            }
        }
    }

    /// Dispatch a decoded message received on `origin`.
    pub fn on_message(&mut self, origin: &ConnectionId, message: Message) -> Dispatch {
        match &message {
            Message::IdentificationResponse(resp) => {
                if !self.has_transport(origin) {
                    warn!(conn_id = %origin, "identification from a connection without transport");
                    return Dispatch::Dropped(DropReason::NoTransport);
                }
                match handshake::accept_identification(origin, resp) {
                    Ok(ident) => Dispatch::Identified(self.add_client(
                        ident.connection_id,
                        ident.window_id,
                        ident.tab_id,
                        ident.client_type,
                    )),
                    Err(e) => {
                        warn!(conn_id = %origin, error = %e, "rejecting identification");
                        Dispatch::Dropped(DropReason::OriginMismatch)
                    }
                }
            }
            Message::Heartbeat(p) => {
                if &p.connection_id != origin {
                    warn!(conn_id = %origin, named = %p.connection_id, "heartbeat names another connection");
                    return Dispatch::Dropped(DropReason::OriginMismatch);
                }
                if self.process_heartbeat(&p.connection_id) {
                    Dispatch::HeartbeatReset
                } else {
                    Dispatch::Dropped(DropReason::UnknownClient)
                }
            }
            m if m.request_kind().is_some() => self.route_request(origin, m),
            other => {
                warn!(conn_id = %origin, topic = other.topic(), "unhandled message type");
                Dispatch::Unhandled
            }
        }
    }

    /// Add an identified client and start its heartbeat counter.
    pub fn add_client(
        &mut self,
        connection_id: ConnectionId,
        window_id: Option<ConnectionId>,
        tab_id: Option<TabId>,
        client_type: ClientType,
    ) -> AddOutcome {
        let outcome =
            self.directory
                .add_client(connection_id.clone(), window_id, tab_id, client_type);
        if outcome == AddOutcome::Added {
            self.pending.forget(&connection_id);
            self.heartbeats.track(connection_id);
        }
        outcome
    }

    /// Remove a client: directory entry, registry entry, heartbeat counter
    /// and transport handle. Returns `false` if the client was unknown.
    pub fn remove_client(&mut self, connection_id: &ConnectionId) -> bool {
        match self.directory.remove_client(connection_id) {
            Some(entry) => {
                self.heartbeats.forget(connection_id);
                self.transports.remove(connection_id);
                info!(
                    conn_id = %connection_id,
                    client_type = %entry.client_type,
                    tab_id = ?entry.tab_id,
                    connected_secs = entry.identified_at.elapsed().as_secs(),
                    "client removed"
                );
                true
            }
            None => false,
        }
    }

    /// Reset the heartbeat age of a known client.
    pub fn process_heartbeat(&mut self, connection_id: &ConnectionId) -> bool {
        self.heartbeats.reset(connection_id)
    }

    /// Advance heartbeat ages and evict clients that timed out.
    ///
    /// Returns the evicted connection IDs. Pending connections that stayed
    /// unidentified past the timeout are closed too but not reported, since
    /// they never were clients.
    pub fn on_tick(&mut self) -> Vec<ConnectionId> {
        let expired = self.heartbeats.tick();
        for connection_id in &expired {
            warn!(conn_id = %connection_id, "client timed out");
            self.remove_client(connection_id);
        }
        for connection_id in self.pending.tick() {
            warn!(conn_id = %connection_id, "handshake timed out, closing connection");
            self.pending.forget(&connection_id);
            self.transports.remove(&connection_id);
        }
        expired
    }

    /// Forget a connection whose transport closed.
    pub fn on_disconnected(&mut self, connection_id: &ConnectionId) {
        info!(conn_id = %connection_id, "connection closed");
        if self.directory.contains(connection_id) {
            self.remove_client(connection_id);
        } else {
            self.pending.forget(connection_id);
            self.transports.remove(connection_id);
        }
    }

    pub fn directory(&self) -> &SessionDirectory {
        &self.directory
    }

    pub fn heartbeats(&self) -> &HeartbeatMonitor {
        &self.heartbeats
    }

    /// Whether `connection_id` has a transport but no identification yet.
    pub fn is_pending(&self, connection_id: &ConnectionId) -> bool {
        self.pending.is_tracked(connection_id)
    }

    pub fn has_transport(&self, connection_id: &ConnectionId) -> bool {
        self.transports.contains_key(connection_id)
    }

    /// Open transports, identified or not.
    pub fn connection_count(&self) -> usize {
        self.transports.len()
    }
}
