//! Identification handshake.
//!
//! 1. On accept the daemon assigns a connection ID and sends IDENTIFICATION-REQ
//! 2. The client answers IDENTIFICATION-RESP with its role (and owner, for
//!    dependent clients)
//! 3. The daemon adds the client to the session directory

use tracing::debug;
use webverse_core::messages::IdentificationResponsePayload;
use webverse_core::{ClientType, ConnectionId, Message, TabId, WebVerseError, WebVerseResult};

/// A validated identification, ready for the session directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identification {
    pub connection_id: ConnectionId,
    pub client_type: ClientType,
    pub window_id: Option<ConnectionId>,
    pub tab_id: Option<TabId>,
}

/// Build the IDENTIFICATION-REQ sent to a freshly accepted connection.
pub fn identification_request(connection_id: &ConnectionId) -> Message {
    Message::identification_request(connection_id.clone())
}

/// Check an IDENTIFICATION-RESP received on connection `origin`.
///
/// The response must name the ID that was assigned to the transport it
/// arrived on.
pub fn accept_identification(
    origin: &ConnectionId,
    resp: &IdentificationResponsePayload,
) -> WebVerseResult<Identification> {
    if &resp.connection_id != origin {
        return Err(WebVerseError::InvalidMessage(format!(
            "identification for {} arrived on connection {origin}",
            resp.connection_id
        )));
    }

    debug!(
        conn_id = %origin,
        client_type = %resp.client_type,
        "received IDENTIFICATION-RESP"
    );

    Ok(Identification {
        connection_id: resp.connection_id.clone(),
        client_type: resp.client_type,
        window_id: resp.window_id.clone(),
        tab_id: resp.tab_id.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(conn: &str, window: Option<&str>) -> IdentificationResponsePayload {
        IdentificationResponsePayload {
            client_type: ClientType::Runtime,
            connection_id: conn.into(),
            window_id: window.map(ConnectionId::from),
            tab_id: Some("1".into()),
        }
    }

    #[test]
    fn request_carries_assigned_id() {
        let id = ConnectionId::generate();
        assert_eq!(identification_request(&id), Message::identification_request(id));
    }

    #[test]
    fn accepts_matching_response() {
        let ident = accept_identification(&"c1".into(), &response("c1", Some("main"))).unwrap();
        assert_eq!(ident.client_type, ClientType::Runtime);
        assert_eq!(ident.window_id, Some(ConnectionId::from("main")));
        assert_eq!(ident.tab_id, Some(TabId::from("1")));
    }

    #[test]
    fn rejects_response_for_another_connection() {
        assert!(accept_identification(&"c1".into(), &response("c2", None)).is_err());
    }
}
