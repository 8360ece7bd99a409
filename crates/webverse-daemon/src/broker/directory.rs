//! Session directory: identified clients and the main-application registry.
//!
//! A connection enters the directory once its identification response is
//! accepted. Main applications are additionally listed in the registry, in
//! identification order, with at most one entry per connection ID.

use std::collections::HashMap;
use std::time::Instant;
use tracing::{debug, info, warn};
use webverse_core::{ClientType, ConnectionId, TabId};

/// An identified client.
#[derive(Debug, Clone)]
pub struct ClientEntry {
    /// Declared role.
    pub client_type: ClientType,
    /// Owning main application (always `None` for main applications).
    pub main_app: Option<ConnectionId>,
    /// Tab the client belongs to, if it reported one.
    pub tab_id: Option<TabId>,
    /// When the client identified itself.
    pub identified_at: Instant,
}

/// Result of [`SessionDirectory::add_client`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Added,
    /// The connection already has a directory entry; nothing changed.
    AlreadyExists,
}

/// Directory of identified clients.
#[derive(Debug, Default)]
pub struct SessionDirectory {
    clients: HashMap<ConnectionId, ClientEntry>,
    main_apps: Vec<ConnectionId>,
}

impl SessionDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a newly identified client.
    ///
    /// `window_id` names the owning main application and is ignored for
    /// main applications themselves. Never overwrites an existing entry.
    pub fn add_client(
        &mut self,
        connection_id: ConnectionId,
        window_id: Option<ConnectionId>,
        tab_id: Option<TabId>,
        client_type: ClientType,
    ) -> AddOutcome {
        if self.clients.contains_key(&connection_id) {
            warn!(conn_id = %connection_id, "client already exists");
            return AddOutcome::AlreadyExists;
        }

        let main_app = if client_type.is_main_app() {
            // Registry entries are only made alongside directory entries.
            debug_assert!(!self.main_apps.contains(&connection_id));
            self.main_apps.push(connection_id.clone());
            None
        } else {
            if window_id.is_none() {
                warn!(
                    conn_id = %connection_id,
                    client_type = %client_type,
                    "dependent client identified without an owning main app"
                );
            }
            window_id
        };

        info!(
            conn_id = %connection_id,
            client_type = %client_type,
            main_app = ?main_app.as_ref().map(ConnectionId::as_str),
            "client added"
        );

        self.clients.insert(
            connection_id,
            ClientEntry {
                client_type,
                main_app,
                tab_id,
                identified_at: Instant::now(),
            },
        );

        AddOutcome::Added
    }

    /// Remove a client and, for main applications, its registry entry.
    ///
    /// Returns the removed entry, or `None` if the ID was unknown.
    pub fn remove_client(&mut self, connection_id: &ConnectionId) -> Option<ClientEntry> {
        match self.clients.remove(connection_id) {
            Some(entry) => {
                self.main_apps.retain(|id| id != connection_id);
                debug!(conn_id = %connection_id, client_type = %entry.client_type, "client removed");
                Some(entry)
            }
            None => {
                warn!(conn_id = %connection_id, "cannot remove unknown client");
                None
            }
        }
    }

    pub fn get(&self, connection_id: &ConnectionId) -> Option<&ClientEntry> {
        self.clients.get(connection_id)
    }

    pub fn contains(&self, connection_id: &ConnectionId) -> bool {
        self.clients.contains_key(connection_id)
    }

    /// Whether `connection_id` is a registered main application.
    pub fn is_main_app(&self, connection_id: &ConnectionId) -> bool {
        self.main_apps.contains(connection_id)
    }

    /// Registered main applications, in identification order.
    pub fn main_apps(&self) -> &[ConnectionId] {
        &self.main_apps
    }

    /// Number of identified clients.
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
