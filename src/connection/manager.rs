//! Wires clients onto connections (§4.7): SINGLE mode gives every client its
//! own socket, MULTI mode shares one socket across all of them.
//!
//! Grounded in `core/client_connection_manager.py`'s `ClientConnectionManager`
//! (`allocate`/`deallocate`/`_allocate_new_connection`).

use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use crate::client::Client;
use crate::config::{ConfigHandle, PrinterConfig};

use super::connection::{Connection, ConnectionHint};
use super::view::ClientView;
use super::ConnectionMode;

struct Slot {
    view: Arc<ClientView>,
    connection: Arc<Connection>,
}

/// Allocates/deallocates clients onto connections, one [`ClientView`] per
/// connection (§4.7).
pub struct ConnectionManager {
    mode: ConnectionMode,
    slots: Vec<Slot>,
    allocations: HashMap<String, usize>,
}

impl ConnectionManager {
    pub fn new(mode: ConnectionMode) -> Self {
        Self {
            mode,
            slots: Vec::new(),
            allocations: HashMap::new(),
        }
    }

    pub fn is_allocated(&self, unique_id: &str) -> bool {
        self.allocations.contains_key(unique_id)
    }

    pub fn connection_for(&self, unique_id: &str) -> Option<Arc<Connection>> {
        self.allocations
            .get(unique_id)
            .map(|&idx| Arc::clone(&self.slots[idx].connection))
    }

    pub fn view_for(&self, unique_id: &str) -> Option<Arc<ClientView>> {
        self.allocations
            .get(unique_id)
            .map(|&idx| Arc::clone(&self.slots[idx].view))
    }

    /// All distinct connections currently in play, for the scheduler's event
    /// fan-in and for final teardown.
    pub fn connections(&self) -> impl Iterator<Item = Arc<Connection>> + '_ {
        self.slots.iter().map(|slot| Arc::clone(&slot.connection))
    }

    pub fn views(&self) -> impl Iterator<Item = Arc<ClientView>> + '_ {
        self.slots.iter().map(|slot| Arc::clone(&slot.view))
    }

    /// Every `(view, connection)` pair currently in play, in slot order —
    /// used by the scheduler to discover connections it hasn't yet wired an
    /// event forwarder for.
    pub fn slots(&self) -> impl Iterator<Item = (Arc<ClientView>, Arc<Connection>)> + '_ {
        self.slots.iter().map(|slot| (Arc::clone(&slot.view), Arc::clone(&slot.connection)))
    }

    /// Reuses a slot whose view has gone empty (the remove/re-add cycle of a
    /// printer churning through setup, §4.9's remove notification) rather
    /// than growing `self.slots` without bound; only falls back to creating
    /// a fresh connection when nothing is free.
    fn allocate_new_slot(&mut self) -> usize {
        if self.mode == ConnectionMode::Multi && !self.slots.is_empty() {
            return 0;
        }

        if let Some(idx) = self.slots.iter().position(|slot| slot.view.is_empty()) {
            return idx;
        }

        let connection = Arc::new(Connection::new());
        let view = Arc::new(ClientView::new(self.mode));
        self.slots.push(Slot { view, connection });
        self.slots.len() - 1
    }

    fn connection_hint(&self, config: ConfigHandle) -> ConnectionHint {
        let config = if self.mode == ConnectionMode::Single {
            config
        } else {
            ConfigHandle::new(PrinterConfig::blank())
        };
        ConnectionHint { mode: self.mode, config }
    }

    /// Registers `client` with a connection, connecting it if this is the
    /// first member of a fresh slot (§4.7). Returns the connection the
    /// client was wired to.
    pub fn allocate(&mut self, client: &mut Client) -> Arc<Connection> {
        let unique_id = client.unique_id();
        if let Some(connection) = self.connection_for(&unique_id) {
            return connection;
        }

        let idx = self.allocate_new_slot();
        let slot = &self.slots[idx];

        if slot.connection.connected() {
            client.on_connection_established(slot.connection.v());
        }

        slot.view.add(unique_id.clone());
        self.allocations.insert(unique_id, idx);

        let hint = self.connection_hint(client.config().clone());
        slot.connection.connect(hint);

        Arc::clone(&slot.connection)
    }

    /// Removes `client` from its connection, collapsing its state back to
    /// CONNECTING via a synthetic lost event, and disconnects the underlying
    /// connection once its view is empty (§4.7).
    pub async fn deallocate(&mut self, client: &mut Client) {
        let unique_id = client.unique_id();
        let Some(idx) = self.allocations.remove(&unique_id) else {
            return;
        };

        let slot = &self.slots[idx];
        slot.view.discard(&unique_id);
        client.on_connection_lost(slot.connection.v());

        if slot.view.is_empty() {
            slot.connection.disconnect().await;
        }
    }

    pub fn stop(&self) {
        for slot in &self.slots {
            slot.connection.stop();
        }
        info!("connection manager stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigHandle as Handle;

    fn client() -> Client {
        Client::new(Handle::new(PrinterConfig::blank()))
    }

    #[test]
    fn single_mode_gives_each_client_its_own_slot() {
        let mut manager = ConnectionManager::new(ConnectionMode::Single);
        let mut a = client();
        let mut b = client();

        let conn_a = manager.allocate(&mut a);
        let conn_b = manager.allocate(&mut b);

        assert!(!Arc::ptr_eq(&conn_a, &conn_b));
    }

    #[test]
    fn multi_mode_shares_one_slot() {
        let mut manager = ConnectionManager::new(ConnectionMode::Multi);
        let mut a = client();
        let mut b = client();

        let conn_a = manager.allocate(&mut a);
        let conn_b = manager.allocate(&mut b);

        assert!(Arc::ptr_eq(&conn_a, &conn_b));
    }

    #[test]
    fn allocate_is_idempotent() {
        let mut manager = ConnectionManager::new(ConnectionMode::Single);
        let mut a = client();

        let first = manager.allocate(&mut a);
        let second = manager.allocate(&mut a);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(manager.slots.len(), 1);
    }

    #[tokio::test]
    async fn deallocate_frees_the_slot_for_reuse() {
        let mut manager = ConnectionManager::new(ConnectionMode::Single);
        let mut a = client();
        manager.allocate(&mut a);
        assert_eq!(manager.slots.len(), 1);

        manager.deallocate(&mut a).await;

        let mut b = client();
        manager.allocate(&mut b);
        assert_eq!(
            manager.slots.len(),
            1,
            "a removed printer's slot must be reused instead of leaking a new one"
        );
    }
}
