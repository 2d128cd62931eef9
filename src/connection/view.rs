//! Routes connection-level events to the clients sharing one connection
//! (§4.6).
//!
//! Grounded in `core/client_view.py`'s `ClientView.emit`. The original
//! dispatches by calling into each client's event bus directly; here
//! [`ClientView`] only computes *where* an event should go — the scheduler
//! (which owns the actual [`Client`](crate::client::Client) objects) applies
//! the decision, since Rust has no convenient equivalent to the original's
//! per-client event bus registration.

use std::collections::HashSet;
use std::sync::Mutex;

use crate::protocol::ServerMsg;

use super::events::ConnectionEvent;
use super::ConnectionMode;

/// What an incoming [`ConnectionEvent`] resolves to once routed through a
/// [`ClientView`].
#[derive(Debug, Clone)]
pub enum RouteTarget {
    /// Deliver to every client member of this view.
    Broadcast,
    /// Deliver only to the named client.
    Client(String),
    /// No member cares about this event.
    Drop,
}

/// A set of clients sharing one connection (§4.6, §4.7). Membership is
/// tracked by `unique_id`; the view holds no reference to the clients
/// themselves.
pub struct ClientView {
    mode: ConnectionMode,
    members: Mutex<HashSet<String>>,
}

impl ClientView {
    pub fn new(mode: ConnectionMode) -> Self {
        Self {
            mode,
            members: Mutex::new(HashSet::new()),
        }
    }

    pub fn add(&self, unique_id: impl Into<String>) {
        self.members.lock().expect("view lock poisoned").insert(unique_id.into());
    }

    pub fn discard(&self, unique_id: &str) {
        self.members.lock().expect("view lock poisoned").remove(unique_id);
    }

    pub fn contains(&self, unique_id: &str) -> bool {
        self.members.lock().expect("view lock poisoned").contains(unique_id)
    }

    pub fn len(&self) -> usize {
        self.members.lock().expect("view lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn members(&self) -> Vec<String> {
        self.members.lock().expect("view lock poisoned").iter().cloned().collect()
    }

    /// Resolves an incoming event to its recipient(s) (§4.6). A view with no
    /// members never routes anything, mirroring the original's early
    /// `len(self) == 0` return.
    pub fn route(&self, event: &ConnectionEvent) -> RouteTarget {
        if self.is_empty() {
            return RouteTarget::Drop;
        }

        let is_multi = self.mode == ConnectionMode::Multi;

        match event {
            ConnectionEvent::Incoming(msg, _v, for_) => {
                if !is_multi {
                    return RouteTarget::Broadcast;
                }

                // A bare `connected` message with no `for` tag is the
                // connection-level establishment signal in MULTI mode.
                if matches!(msg, ServerMsg::Connected(_)) && for_.is_none() {
                    return RouteTarget::Broadcast;
                }

                let target = for_.clone().or_else(|| self.unique_id_hint(msg));
                match target {
                    Some(unique_id) if self.contains(&unique_id) => RouteTarget::Client(unique_id),
                    _ => RouteTarget::Drop,
                }
            }
            ConnectionEvent::Established(_) => {
                if is_multi {
                    // Dropped in favor of the per-client `connected` message.
                    RouteTarget::Drop
                } else {
                    RouteTarget::Broadcast
                }
            }
            ConnectionEvent::Lost(_) | ConnectionEvent::Suspect => RouteTarget::Broadcast,
        }
    }

    /// `add_connection`/`remove_connection` replies carry their target's
    /// `unique_id` in `data` rather than in the envelope's `for` (§4.6).
    fn unique_id_hint(&self, msg: &ServerMsg) -> Option<String> {
        match msg {
            ServerMsg::AddConnection(data) => Some(data.unique_id.clone()),
            ServerMsg::RemoveConnection(data) => Some(data.unique_id.clone()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::messages::{ConnectedData, MultiPrinterAddedData};

    #[test]
    fn empty_view_drops_everything() {
        let view = ClientView::new(ConnectionMode::Multi);
        let event = ConnectionEvent::Established(1);
        assert!(matches!(view.route(&event), RouteTarget::Drop));
    }

    #[test]
    fn single_mode_broadcasts_incoming() {
        let view = ClientView::new(ConnectionMode::Single);
        view.add("printer-a");
        let event = ConnectionEvent::Incoming(ServerMsg::Pong, 1, None);
        assert!(matches!(view.route(&event), RouteTarget::Broadcast));
    }

    #[test]
    fn multi_mode_bare_connected_becomes_broadcast() {
        let view = ClientView::new(ConnectionMode::Multi);
        view.add("printer-a");
        let event = ConnectionEvent::Incoming(
            ServerMsg::Connected(ConnectedData {
                intervals: Default::default(),
                name: None,
                short_id: None,
                in_setup: false,
            }),
            1,
            None,
        );
        assert!(matches!(view.route(&event), RouteTarget::Broadcast));
    }

    #[test]
    fn multi_mode_routes_by_for_tag() {
        let view = ClientView::new(ConnectionMode::Multi);
        view.add("printer-a");
        view.add("printer-b");
        let event = ConnectionEvent::Incoming(ServerMsg::Pong, 1, Some("printer-b".to_string()));
        match view.route(&event) {
            RouteTarget::Client(id) => assert_eq!(id, "printer-b"),
            other => panic!("expected Client route, got {other:?}"),
        }
    }

    #[test]
    fn multi_mode_add_connection_routes_by_data_unique_id() {
        let view = ClientView::new(ConnectionMode::Multi);
        view.add("printer-a");
        let event = ConnectionEvent::Incoming(
            ServerMsg::AddConnection(MultiPrinterAddedData {
                unique_id: "printer-a".to_string(),
                status: true,
                pid: Some(1),
            }),
            1,
            None,
        );
        match view.route(&event) {
            RouteTarget::Client(id) => assert_eq!(id, "printer-a"),
            other => panic!("expected Client route, got {other:?}"),
        }
    }

    #[test]
    fn multi_mode_established_is_swallowed() {
        let view = ClientView::new(ConnectionMode::Multi);
        view.add("printer-a");
        let event = ConnectionEvent::Established(1);
        assert!(matches!(view.route(&event), RouteTarget::Drop));
    }
}
