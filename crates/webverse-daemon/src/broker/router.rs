//! Request routing: dependent client to owning main application.
//!
//! A request is delivered only if all of these hold, checked in order:
//! the sender is a live identified client, its role may issue the request,
//! it has an owner, and that owner is a registered main application with an
//! open transport. The command carries the main application's ID.

use super::{Broker, Dispatch};
use tracing::{info, warn};
use webverse_core::{ConnectionId, Message, RequestKind};

/// Why a message was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Sender has no live directory entry.
    UnknownClient,
    /// `connectionID` does not match the transport the frame arrived on.
    OriginMismatch,
    RoleNotPermitted,
    /// Sender identified without a `windowID`.
    NoOwner,
    /// Owner is not in the main-application registry.
    MainAppNotRegistered,
    /// No open transport for the target.
    NoTransport,
    /// The target transport closed while the command was queued.
    SendFailed,
}

impl Broker {
    /// Route a request received on `origin` to the sender's main application.
    pub(super) fn route_request(&mut self, origin: &ConnectionId, message: &Message) -> Dispatch {
        let Some(kind) = message.request_kind() else {
            return Dispatch::Unhandled;
        };
        let sender = message.connection_id();

        if sender != origin {
            warn!(conn_id = %origin, named = %sender, request = kind.label(), "request names another connection");
            return Dispatch::Dropped(DropReason::OriginMismatch);
        }

        let entry = match self.directory.get(sender) {
            Some(entry) if self.heartbeats.is_tracked(sender) => entry,
            _ => {
                warn!(conn_id = %sender, request = kind.label(), "request from unknown client");
                return Dispatch::Dropped(DropReason::UnknownClient);
            }
        };

        if !kind.permits(entry.client_type) {
            warn!(
                conn_id = %sender,
                client_type = %entry.client_type,
                request = kind.label(),
                "role may not issue this request"
            );
            return Dispatch::Dropped(DropReason::RoleNotPermitted);
        }

        if kind == RequestKind::LoadWorld {
            if let Message::LoadWorldRequest(p) = message {
                info!(conn_id = %sender, url = %p.url, "load world requested");
            }
            return Dispatch::Accepted;
        }

        let Some(main_app) = entry.main_app.clone() else {
            warn!(conn_id = %sender, request = kind.label(), "client has no main app");
            return Dispatch::Dropped(DropReason::NoOwner);
        };

        if !self.directory.is_main_app(&main_app) {
            warn!(
                conn_id = %sender,
                main_app = %main_app,
                request = kind.label(),
                "main app not registered"
            );
            return Dispatch::Dropped(DropReason::MainAppNotRegistered);
        }

        let Some(handle) = self.transports.get(&main_app) else {
            warn!(main_app = %main_app, request = kind.label(), "main app has no transport");
            return Dispatch::Dropped(DropReason::NoTransport);
        };

        let Some(command) = message.to_command(&main_app) else {
            return Dispatch::Unhandled;
        };

        if handle.send(command).is_err() {
            warn!(main_app = %main_app, request = kind.label(), "main app transport closed");
            return Dispatch::Dropped(DropReason::SendFailed);
        }

        info!(
            conn_id = %sender,
            main_app = %main_app,
            request = kind.label(),
            "request routed"
        );
        Dispatch::Delivered { main_app }
    }
}

#[cfg(test)]
mod tests {
    use super::super::fixtures::*;
    use super::*;
    use webverse_core::messages::{FocusedTabCommandPayload, NewTabPayload, UrlPayload};
    use webverse_core::ClientType;

    fn frame(topic: &str, id: &str, extra: serde_json::Value) -> String {
        let mut value = serde_json::json!({ "topic": topic, "connectionID": id });
        if let (Some(obj), Some(extra)) = (value.as_object_mut(), extra.as_object()) {
            obj.extend(extra.clone());
        }
        value.to_string()
    }

    fn new_tab(id: &str) -> String {
        frame("NEW-TAB-REQ", id, serde_json::json!({ "tabType": "runtime" }))
    }

    #[test]
    fn new_tab_request_reaches_main_app() {
        let mut b = broker();
        let mut main = join(&mut b, "M", ClientType::MainApp, None);
        let mut tab = join(&mut b, "T", ClientType::Runtime, Some("M"));

        assert_eq!(
            b.on_frame(&"T".into(), &new_tab("T")),
            Dispatch::Delivered { main_app: "M".into() }
        );
        assert_eq!(
            main.try_recv().unwrap(),
            Message::NewTabCommand(NewTabPayload {
                connection_id: "M".into(),
                tab_type: "runtime".into(),
            })
        );
        assert!(main.try_recv().is_err());
        assert!(tab.try_recv().is_err());
    }

    #[test]
    fn settings_client_cannot_open_tabs() {
        let mut b = broker();
        let mut main = join(&mut b, "M", ClientType::MainApp, None);
        let _s = join(&mut b, "S", ClientType::Settings, Some("M"));

        assert_eq!(
            b.on_frame(&"S".into(), &new_tab("S")),
            Dispatch::Dropped(DropReason::RoleNotPermitted)
        );
        assert!(main.try_recv().is_err());
    }

    #[test]
    fn settings_update_is_forwarded_with_limits() {
        let mut b = broker();
        let mut main = join(&mut b, "M", ClientType::MainApp, None);
        let _s = join(&mut b, "S", ClientType::Settings, Some("M"));

        let req = frame(
            "SET-UPD-REQ",
            "S",
            serde_json::json!({
                "storageEntries": 100,
                "storageKeyLength": 64,
                "storageEntryLength": 512,
            }),
        );
        assert_eq!(
            b.on_frame(&"S".into(), &req),
            Dispatch::Delivered { main_app: "M".into() }
        );
        match main.try_recv().unwrap() {
            Message::SettingsUpdateCommand(p) => {
                assert_eq!(p.connection_id.as_str(), "M");
                assert_eq!(p.storage_entries, 100);
                assert_eq!(p.storage_key_length, 64);
                assert_eq!(p.storage_entry_length, 512);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn focused_runtime_can_close_but_not_add_history() {
        let mut b = broker();
        let mut main = join(&mut b, "M", ClientType::MainApp, None);
        let _f = join(&mut b, "F", ClientType::FocusedRuntime, Some("M"));

        let hist = frame("HIST-ADD-REQ", "F", serde_json::json!({ "url": "https://a" }));
        assert_eq!(
            b.on_frame(&"F".into(), &hist),
            Dispatch::Dropped(DropReason::RoleNotPermitted)
        );

        let close = frame("CLOSE-REQ", "F", serde_json::json!({}));
        assert_eq!(
            b.on_frame(&"F".into(), &close),
            Dispatch::Delivered { main_app: "M".into() }
        );
        assert_eq!(
            main.try_recv().unwrap(),
            Message::CloseCommand(webverse_core::messages::ConnectionPayload {
                connection_id: "M".into(),
            })
        );
    }

    #[test]
    fn focused_tab_renames_type_to_runtime_type() {
        let mut b = broker();
        let mut main = join(&mut b, "M", ClientType::MainApp, None);
        let _t = join(&mut b, "T", ClientType::Runtime, Some("M"));

        let req = frame(
            "FOCUSED-TAB-REQ",
            "T",
            serde_json::json!({ "type": "steamvr", "url": "https://x" }),
        );
        b.on_frame(&"T".into(), &req);
        assert_eq!(
            main.try_recv().unwrap(),
            Message::FocusedTabCommand(FocusedTabCommandPayload {
                connection_id: "M".into(),
                runtime_type: "steamvr".into(),
                url: "https://x".into(),
            })
        );
    }

    #[test]
    fn history_add_is_forwarded() {
        let mut b = broker();
        let mut main = join(&mut b, "M", ClientType::MainApp, None);
        let _t = join(&mut b, "T", ClientType::Runtime, Some("M"));

        let req = frame("HIST-ADD-REQ", "T", serde_json::json!({ "url": "https://a" }));
        b.on_frame(&"T".into(), &req);
        assert_eq!(
            main.try_recv().unwrap(),
            Message::HistoryAddCommand(UrlPayload {
                connection_id: "M".into(),
                url: "https://a".into(),
            })
        );
    }

    #[test]
    fn request_after_main_app_left_is_dropped() {
        let mut b = broker();
        let _main = join(&mut b, "M", ClientType::MainApp, None);
        let _t = join(&mut b, "T", ClientType::Runtime, Some("M"));

        b.on_disconnected(&"M".into());
        assert_eq!(
            b.on_frame(&"T".into(), &new_tab("T")),
            Dispatch::Dropped(DropReason::MainAppNotRegistered)
        );
    }

    #[test]
    fn owner_that_is_not_a_main_app_is_rejected() {
        let mut b = broker();
        let mut other = join(&mut b, "R", ClientType::Runtime, Some("M"));
        let _t = join(&mut b, "T", ClientType::Runtime, Some("R"));

        assert_eq!(
            b.on_frame(&"T".into(), &new_tab("T")),
            Dispatch::Dropped(DropReason::MainAppNotRegistered)
        );
        assert!(other.try_recv().is_err());
    }

    #[test]
    fn client_without_owner_cannot_route() {
        let mut b = broker();
        let _main = join(&mut b, "M", ClientType::MainApp, None);
        let _t = join(&mut b, "T", ClientType::Runtime, None);

        assert_eq!(
            b.on_frame(&"T".into(), &new_tab("T")),
            Dispatch::Dropped(DropReason::NoOwner)
        );
    }

    #[test]
    fn pending_connection_cannot_route() {
        let mut b = broker();
        let mut main = join(&mut b, "M", ClientType::MainApp, None);
        let _p = connect(&mut b, "P");

        assert_eq!(
            b.on_frame(&"P".into(), &new_tab("P")),
            Dispatch::Dropped(DropReason::UnknownClient)
        );
        assert!(main.try_recv().is_err());
    }

    #[test]
    fn requests_from_unknown_ids_change_nothing() {
        let mut b = broker();
        let mut main = join(&mut b, "M", ClientType::MainApp, None);
        let _p = connect(&mut b, "P");

        let requests = [
            new_tab("P"),
            frame("FOCUSED-TAB-REQ", "P", serde_json::json!({ "type": "steamvr", "url": "u" })),
            frame("HIST-ADD-REQ", "P", serde_json::json!({ "url": "u" })),
            frame(
                "SET-UPD-REQ",
                "P",
                serde_json::json!({ "storageEntries": 1, "storageKeyLength": 1, "storageEntryLength": 1 }),
            ),
            frame("CLOSE-REQ", "P", serde_json::json!({})),
            frame("LOAD-WORLD-REQ", "P", serde_json::json!({ "url": "u" })),
        ];
        for req in &requests {
            assert_eq!(
                b.on_frame(&"P".into(), req),
                Dispatch::Dropped(DropReason::UnknownClient),
                "{req}"
            );
        }
        assert_eq!(b.directory().len(), 1);
        assert_eq!(b.heartbeats().len(), 1);
        assert_eq!(b.connection_count(), 2);
        assert!(main.try_recv().is_err());
    }

    #[test]
    fn spoofed_sender_is_dropped() {
        let mut b = broker();
        let mut main = join(&mut b, "M", ClientType::MainApp, None);
        let _t = join(&mut b, "T", ClientType::Runtime, Some("M"));
        let _s = join(&mut b, "S", ClientType::Settings, Some("M"));

        // Settings page claims to be the runtime tab.
        assert_eq!(
            b.on_frame(&"S".into(), &new_tab("T")),
            Dispatch::Dropped(DropReason::OriginMismatch)
        );
        assert!(main.try_recv().is_err());
    }

    #[test]
    fn main_app_requests_are_not_permitted() {
        let mut b = broker();
        let mut main = join(&mut b, "M", ClientType::MainApp, None);
        assert_eq!(
            b.on_frame(&"M".into(), &new_tab("M")),
            Dispatch::Dropped(DropReason::RoleNotPermitted)
        );
        assert!(main.try_recv().is_err());
    }

    #[test]
    fn load_world_is_accepted_from_any_role_without_routing() {
        let mut b = broker();
        let mut main = join(&mut b, "M", ClientType::MainApp, None);
        let _s = join(&mut b, "S", ClientType::Settings, Some("M"));

        for id in ["M", "S"] {
            let req = frame("LOAD-WORLD-REQ", id, serde_json::json!({ "url": "https://w" }));
            assert_eq!(b.on_frame(&id.into(), &req), Dispatch::Accepted);
        }
        assert!(main.try_recv().is_err());
    }

    #[test]
    fn closed_main_app_transport_reports_send_failure() {
        let mut b = broker();
        let main = join(&mut b, "M", ClientType::MainApp, None);
        let _t = join(&mut b, "T", ClientType::Runtime, Some("M"));

        drop(main);
        assert_eq!(
            b.on_frame(&"T".into(), &new_tab("T")),
            Dispatch::Dropped(DropReason::SendFailed)
        );
    }

    #[test]
    fn commands_go_only_to_the_owning_main_app() {
        let mut b = broker();
        let mut m1 = join(&mut b, "M1", ClientType::MainApp, None);
        let mut m2 = join(&mut b, "M2", ClientType::MainApp, None);
        let _t1 = join(&mut b, "T1", ClientType::Runtime, Some("M1"));
        let _t2 = join(&mut b, "T2", ClientType::Runtime, Some("M2"));

        b.on_frame(&"T2".into(), &new_tab("T2"));
        assert!(m1.try_recv().is_err());
        match m2.try_recv().unwrap() {
            Message::NewTabCommand(p) => assert_eq!(p.connection_id.as_str(), "M2"),
            other => panic!("unexpected command: {other:?}"),
        }
        assert_eq!(b.directory().main_apps(), &[ConnectionId::from("M1"), ConnectionId::from("M2")]);
    }
}
