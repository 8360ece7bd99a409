//! WebVerse daemon message types.
//!
//! Every frame on the wire is a JSON object whose `topic` field selects the
//! variant. Requests (`-REQ`) flow from clients to the daemon; commands
//! (`-CMD`) flow from the daemon to a main application.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque identifier the daemon assigns to every accepted connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Generate a fresh, globally unique connection ID.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ConnectionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Tab identifier a dependent client reports about itself.
///
/// Tabs send either a string or a number; the daemon stores it as received.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TabId {
    Number(serde_json::Number),
    Text(String),
}

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TabId::Number(n) => write!(f, "{n}"),
            TabId::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for TabId {
    fn from(s: &str) -> Self {
        TabId::Text(s.to_string())
    }
}

impl From<String> for TabId {
    fn from(s: String) -> Self {
        TabId::Text(s)
    }
}

impl From<u64> for TabId {
    fn from(n: u64) -> Self {
        TabId::Number(n.into())
    }
}

/// Role a client declares in its identification response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClientType {
    /// Top-level application window owning tabs and runtimes.
    #[serde(rename = "WV-MAIN-APP")]
    MainApp,
    /// A runtime tab page.
    #[serde(rename = "WV-RUNTIME")]
    Runtime,
    /// An out-of-process focused runtime (desktop / VR).
    #[serde(rename = "WV-FOCUSED-RUNTIME")]
    FocusedRuntime,
    /// The settings page.
    #[serde(rename = "WV-SETTINGS")]
    Settings,
}

impl ClientType {
    /// Wire name of the role.
    pub fn as_str(&self) -> &'static str {
        match self {
            ClientType::MainApp => "WV-MAIN-APP",
            ClientType::Runtime => "WV-RUNTIME",
            ClientType::FocusedRuntime => "WV-FOCUSED-RUNTIME",
            ClientType::Settings => "WV-SETTINGS",
        }
    }

    pub fn is_main_app(&self) -> bool {
        matches!(self, ClientType::MainApp)
    }
}

impl fmt::Display for ClientType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kinds of request a dependent client may send to its main application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    NewTab,
    FocusedTab,
    HistoryAdd,
    SettingsUpdate,
    Close,
    LoadWorld,
}

impl RequestKind {
    /// Whether a client holding `role` may issue this request.
    pub fn permits(&self, role: ClientType) -> bool {
        match self {
            RequestKind::NewTab | RequestKind::HistoryAdd => role == ClientType::Runtime,
            RequestKind::FocusedTab | RequestKind::Close => {
                matches!(role, ClientType::Runtime | ClientType::FocusedRuntime)
            }
            RequestKind::SettingsUpdate => role == ClientType::Settings,
            // Accepted from anyone, never routed.
            RequestKind::LoadWorld => true,
        }
    }

    /// Human-readable label used in log lines.
    pub fn label(&self) -> &'static str {
        match self {
            RequestKind::NewTab => "new tab",
            RequestKind::FocusedTab => "focused tab",
            RequestKind::HistoryAdd => "history add",
            RequestKind::SettingsUpdate => "settings update",
            RequestKind::Close => "close",
            RequestKind::LoadWorld => "load world",
        }
    }
}

// ── Payloads ────────────────────────────────────────────────────────────

/// Payload carrying only a connection ID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionPayload {
    #[serde(rename = "connectionID")]
    pub connection_id: ConnectionId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentificationResponsePayload {
    pub client_type: ClientType,
    #[serde(rename = "connectionID")]
    pub connection_id: ConnectionId,
    /// Owning main application (absent for the main application itself).
    #[serde(rename = "windowID", default, skip_serializing_if = "Option::is_none")]
    pub window_id: Option<ConnectionId>,
    #[serde(rename = "tabID", default, skip_serializing_if = "Option::is_none")]
    pub tab_id: Option<TabId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTabPayload {
    #[serde(rename = "connectionID")]
    pub connection_id: ConnectionId,
    pub tab_type: String,
}

/// Focused-tab request as sent by a tab: the runtime kind is in `type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FocusedTabRequestPayload {
    #[serde(rename = "connectionID")]
    pub connection_id: ConnectionId,
    #[serde(rename = "type")]
    pub runtime_type: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FocusedTabCommandPayload {
    #[serde(rename = "connectionID")]
    pub connection_id: ConnectionId,
    pub runtime_type: String,
    pub url: String,
}

/// Payload carrying a connection ID and a URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlPayload {
    #[serde(rename = "connectionID")]
    pub connection_id: ConnectionId,
    pub url: String,
}

/// Storage limits pushed from the settings page to the main application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsUpdatePayload {
    #[serde(rename = "connectionID")]
    pub connection_id: ConnectionId,
    pub storage_entries: u64,
    pub storage_key_length: u64,
    pub storage_entry_length: u64,
}

// ── Message ─────────────────────────────────────────────────────────────

/// A decoded daemon message. The `topic` field on the wire selects the variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "topic")]
pub enum Message {
    #[serde(rename = "IDENTIFICATION-REQ")]
    IdentificationRequest(ConnectionPayload),
    #[serde(rename = "IDENTIFICATION-RESP")]
    IdentificationResponse(IdentificationResponsePayload),
    #[serde(rename = "HEARTBEAT")]
    Heartbeat(ConnectionPayload),

    #[serde(rename = "NEW-TAB-REQ")]
    NewTabRequest(NewTabPayload),
    #[serde(rename = "NEW-TAB-CMD")]
    NewTabCommand(NewTabPayload),
    #[serde(rename = "FOCUSED-TAB-REQ")]
    FocusedTabRequest(FocusedTabRequestPayload),
    #[serde(rename = "FOCUSED-TAB-CMD")]
    FocusedTabCommand(FocusedTabCommandPayload),
    #[serde(rename = "HIST-ADD-REQ")]
    HistoryAddRequest(UrlPayload),
    #[serde(rename = "HIST-ADD-CMD")]
    HistoryAddCommand(UrlPayload),
    #[serde(rename = "SET-UPD-REQ")]
    SettingsUpdateRequest(SettingsUpdatePayload),
    #[serde(rename = "SET-UPD-CMD")]
    SettingsUpdateCommand(SettingsUpdatePayload),
    #[serde(rename = "CLOSE-REQ")]
    CloseRequest(ConnectionPayload),
    #[serde(rename = "CLOSE-CMD")]
    CloseCommand(ConnectionPayload),
    #[serde(rename = "LOAD-WORLD-REQ")]
    LoadWorldRequest(UrlPayload),
}

impl Message {
    /// Every topic the protocol defines.
    pub const TOPICS: &'static [&'static str] = &[
        "IDENTIFICATION-REQ",
        "IDENTIFICATION-RESP",
        "HEARTBEAT",
        "NEW-TAB-REQ",
        "NEW-TAB-CMD",
        "FOCUSED-TAB-REQ",
        "FOCUSED-TAB-CMD",
        "HIST-ADD-REQ",
        "HIST-ADD-CMD",
        "SET-UPD-REQ",
        "SET-UPD-CMD",
        "CLOSE-REQ",
        "CLOSE-CMD",
        "LOAD-WORLD-REQ",
    ];

    /// Wire topic of this message.
    pub fn topic(&self) -> &'static str {
        match self {
            Message::IdentificationRequest(_) => "IDENTIFICATION-REQ",
            Message::IdentificationResponse(_) => "IDENTIFICATION-RESP",
            Message::Heartbeat(_) => "HEARTBEAT",
            Message::NewTabRequest(_) => "NEW-TAB-REQ",
            Message::NewTabCommand(_) => "NEW-TAB-CMD",
            Message::FocusedTabRequest(_) => "FOCUSED-TAB-REQ",
            Message::FocusedTabCommand(_) => "FOCUSED-TAB-CMD",
            Message::HistoryAddRequest(_) => "HIST-ADD-REQ",
            Message::HistoryAddCommand(_) => "HIST-ADD-CMD",
            Message::SettingsUpdateRequest(_) => "SET-UPD-REQ",
            Message::SettingsUpdateCommand(_) => "SET-UPD-CMD",
            Message::CloseRequest(_) => "CLOSE-REQ",
            Message::CloseCommand(_) => "CLOSE-CMD",
            Message::LoadWorldRequest(_) => "LOAD-WORLD-REQ",
        }
    }

    /// The connection ID the message names.
    pub fn connection_id(&self) -> &ConnectionId {
        match self {
            Message::IdentificationRequest(p)
            | Message::Heartbeat(p)
            | Message::CloseRequest(p)
            | Message::CloseCommand(p) => &p.connection_id,
            Message::IdentificationResponse(p) => &p.connection_id,
            Message::NewTabRequest(p) | Message::NewTabCommand(p) => &p.connection_id,
            Message::FocusedTabRequest(p) => &p.connection_id,
            Message::FocusedTabCommand(p) => &p.connection_id,
            Message::HistoryAddRequest(p)
            | Message::HistoryAddCommand(p)
            | Message::LoadWorldRequest(p) => &p.connection_id,
            Message::SettingsUpdateRequest(p) | Message::SettingsUpdateCommand(p) => {
                &p.connection_id
            }
        }
    }

    /// The request kind, for messages a dependent client sends to be routed.
    pub fn request_kind(&self) -> Option<RequestKind> {
        match self {
            Message::NewTabRequest(_) => Some(RequestKind::NewTab),
            Message::FocusedTabRequest(_) => Some(RequestKind::FocusedTab),
            Message::HistoryAddRequest(_) => Some(RequestKind::HistoryAdd),
            Message::SettingsUpdateRequest(_) => Some(RequestKind::SettingsUpdate),
            Message::CloseRequest(_) => Some(RequestKind::Close),
            Message::LoadWorldRequest(_) => Some(RequestKind::LoadWorld),
            _ => None,
        }
    }

    /// Build the command a request turns into when delivered to `main_app`.
    ///
    /// Returns `None` for messages that are not routable requests.
    pub fn to_command(&self, main_app: &ConnectionId) -> Option<Message> {
        let connection_id = main_app.clone();
        match self {
            Message::NewTabRequest(p) => Some(Message::NewTabCommand(NewTabPayload {
                connection_id,
                tab_type: p.tab_type.clone(),
            })),
            Message::FocusedTabRequest(p) => {
                Some(Message::FocusedTabCommand(FocusedTabCommandPayload {
                    connection_id,
                    runtime_type: p.runtime_type.clone(),
                    url: p.url.clone(),
                }))
            }
            Message::HistoryAddRequest(p) => Some(Message::HistoryAddCommand(UrlPayload {
                connection_id,
                url: p.url.clone(),
            })),
            Message::SettingsUpdateRequest(p) => {
                Some(Message::SettingsUpdateCommand(SettingsUpdatePayload {
                    connection_id,
                    storage_entries: p.storage_entries,
                    storage_key_length: p.storage_key_length,
                    storage_entry_length: p.storage_entry_length,
                }))
            }
            Message::CloseRequest(_) => {
                Some(Message::CloseCommand(ConnectionPayload { connection_id }))
            }
            _ => None,
        }
    }

    pub fn identification_request(connection_id: ConnectionId) -> Self {
        Message::IdentificationRequest(ConnectionPayload { connection_id })
    }

    pub fn heartbeat(connection_id: ConnectionId) -> Self {
        Message::Heartbeat(ConnectionPayload { connection_id })
    }
}
